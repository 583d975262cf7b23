//! Message padding codec.
//!
//! The device only accepts messages of at least `MIN_MESSAGE_SIZE` bytes whose
//! length is a multiple of `MESSAGE_ALIGNMENT`. Short or misaligned inputs get
//! zero bytes appended; existing bytes are never altered or dropped.

use std::borrow::Cow;

/// Smallest message the device accepts.
pub const MIN_MESSAGE_SIZE: usize = 64;

/// Transmitted lengths are multiples of this.
pub const MESSAGE_ALIGNMENT: usize = 16;

/// Length `len` bytes occupy on the wire.
#[inline]
pub fn padded_len(len: usize) -> usize {
    if len < MIN_MESSAGE_SIZE {
        MIN_MESSAGE_SIZE
    } else {
        match len % MESSAGE_ALIGNMENT {
            0 => len,
            rem => len + (MESSAGE_ALIGNMENT - rem),
        }
    }
}

/// Pad `input` for transmission. Borrows when no padding is needed.
pub fn pad_message(input: &[u8]) -> Cow<'_, [u8]> {
    let target = padded_len(input.len());
    if target == input.len() {
        return Cow::Borrowed(input);
    }
    let mut out = Vec::with_capacity(target);
    out.extend_from_slice(input);
    out.resize(target, 0);
    Cow::Owned(out)
}
