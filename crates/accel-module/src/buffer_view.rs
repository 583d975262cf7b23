//! `BufferView` — bounded access to one slot's native buffer region.
//!
//! The driver hands out raw addresses for each slot's input and output
//! buffer. Those addresses never leave this module: a view only offers
//! length-checked copy-in and copy-out, and its lifetime is tied to the
//! device session borrow it was created from, so it cannot outlive the
//! job that acquired it.

use std::marker::PhantomData;
use std::ptr::NonNull;

use accel_core::error::{AccelError, Result};
use accel_core::status::StatusCode;

pub struct BufferView<'a> {
    ptr: NonNull<u8>,
    len: usize,
    _borrow: PhantomData<&'a mut [u8]>,
}

impl<'a> BufferView<'a> {
    /// Wrap a native region.
    ///
    /// # Safety
    /// - `ptr` must be null or valid for reads and writes of `len` bytes
    ///   for `'a`.
    /// - No other live view may cover the same region.
    pub unsafe fn from_raw(ptr: *mut u8, len: usize) -> Result<Self> {
        let ptr = NonNull::new(ptr).ok_or_else(|| AccelError::DeviceOperation {
            status: StatusCode::DRIVER_ERROR,
            last_error: 0,
            message: "driver returned a null buffer pointer".into(),
        })?;
        Ok(Self {
            ptr,
            len,
            _borrow: PhantomData,
        })
    }

    /// Size of the region in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.len
    }

    /// Copy `src` to the start of the region.
    pub fn copy_in(&mut self, src: &[u8]) -> Result<()> {
        self.check(src.len())?;
        // Safety: bounds checked above; src is host memory and cannot
        // overlap the native region.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr(), src.len());
        }
        Ok(())
    }

    /// Copy the first `len` bytes of the region into a fresh buffer.
    pub fn copy_out(&self, len: usize) -> Result<Vec<u8>> {
        self.check(len)?;
        let mut out = vec![0u8; len];
        // Safety: bounds checked above.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr(), out.as_mut_ptr(), len);
        }
        Ok(out)
    }

    #[inline]
    fn check(&self, requested: usize) -> Result<()> {
        if requested > self.len {
            return Err(AccelError::BufferBounds {
                requested,
                capacity: self.len,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for BufferView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Address deliberately omitted.
        f.debug_struct("BufferView").field("len", &self.len).finish()
    }
}
