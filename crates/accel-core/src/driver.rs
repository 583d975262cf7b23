//! Native driver abstraction.
//!
//! A `NativeDriver` is the capability surface of the vendor driver library.
//! Every method is a single native call that reports a raw `StatusCode`;
//! classification happens in exactly one place (the status verifier), so
//! implementors must never interpret codes themselves.
//!
//! # Implementors
//!
//! - `DylibDriver` (default): loads the vendor shared library at run time
//!   and forwards each call through a resolved C function pointer.
//!
//! - `MockDriver` (feature = "mock"): in-process simulation with fault
//!   injection. Only for tests: the device "computes" with a closure.

use std::ffi::{c_char, c_void, CStr};

use crate::status::StatusCode;

/// Opaque native device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct RawHandle(pub *mut c_void);

// Safety: the handle is an opaque token; the native driver serializes
// access to the state behind it.
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

impl RawHandle {
    pub const NULL: Self = Self(std::ptr::null_mut());

    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// Log callback handed to the native driver: `(severity flags, C string)`.
pub type NativeLogFn = unsafe extern "C" fn(flags: u32, message: *const c_char);

/// Inputs to presence check and handle creation.
///
/// `None` paths are passed as null so the driver uses its built-in defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenParams<'a> {
    pub version_definitions: Option<&'a CStr>,
    pub version_manifest: Option<&'a CStr>,
    pub log: Option<NativeLogFn>,
}

/// The native driver capability surface.
///
/// **Contract:**
/// - Out-parameters are only meaningful when the returned code is benign.
/// - `input_buffer_ptr` / `output_buffer_ptr` return regions of at least
///   `buffer_size` bytes that stay valid until `close_handle`.
/// - `wait_output_buffer` may block for as long as the device takes.
/// - `last_error` / `last_error_text` describe the most recent failure.
pub trait NativeDriver: Send + Sync {
    fn is_device_present(&self, params: &OpenParams<'_>) -> StatusCode;

    fn create_handle(
        &self,
        endpoint: u32,
        params: &OpenParams<'_>,
        handle: &mut RawHandle,
    ) -> StatusCode;

    fn close_handle(&self, handle: RawHandle) -> StatusCode;

    fn read_shell_register(&self, handle: RawHandle, index: u32, value: &mut u32) -> StatusCode;

    fn write_shell_register(&self, handle: RawHandle, index: u32, value: u32) -> StatusCode;

    fn read_soft_register(&self, handle: RawHandle, address: u64, value: &mut u64) -> StatusCode;

    fn write_soft_register(&self, handle: RawHandle, address: u64, value: u64) -> StatusCode;

    fn number_shell_registers(&self, handle: RawHandle, count: &mut u32) -> StatusCode;

    fn number_buffers(&self, handle: RawHandle, count: &mut u32) -> StatusCode;

    fn buffer_size(&self, handle: RawHandle, size: &mut u32) -> StatusCode;

    fn input_buffer_ptr(&self, handle: RawHandle, slot: u32, ptr: &mut *mut u8) -> StatusCode;

    fn output_buffer_ptr(&self, handle: RawHandle, slot: u32, ptr: &mut *mut u8) -> StatusCode;

    fn input_buffer_full(&self, handle: RawHandle, slot: u32, full: &mut bool) -> StatusCode;

    /// Hand `len` bytes of the slot's input region to the device.
    fn send_input_buffer(&self, handle: RawHandle, slot: u32, len: u32) -> StatusCode;

    /// Block until the slot's output is ready; `received` is its length.
    fn wait_output_buffer(&self, handle: RawHandle, slot: u32, received: &mut u32) -> StatusCode;

    fn discard_output_buffer(&self, handle: RawHandle, slot: u32) -> StatusCode;

    fn last_error(&self) -> u32;

    fn last_error_text(&self) -> String;
}

/// Convert a possibly-null C string from the driver into an owned `String`.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
pub unsafe fn c_str_lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}
