//! Raw C ABI of the vendor driver library.
//!
//! Mirrors the driver's exported header: every entry point returns a
//! status `u32` and reports values through out-pointers. `BOOL` is `i32`.

use std::ffi::{c_char, c_void};

use accel_core::driver::NativeLogFn;

// ── Library name ──

cfg_if::cfg_if! {
    if #[cfg(target_os = "windows")] {
        pub const DEFAULT_LIBRARY: &str = "FPGACoreLib.dll";
    } else if #[cfg(target_os = "macos")] {
        pub const DEFAULT_LIBRARY: &str = "libFPGACoreLib.dylib";
    } else {
        pub const DEFAULT_LIBRARY: &str = "libFPGACoreLib.so";
    }
}

// ── Call parameters ──

/// Handle creation flags (none defined for job dispatch).
pub const CREATE_FLAGS: u32 = 0;

/// `WaitOutputBuffer` blocks on the completion interrupt, not a spin.
pub const WAIT_USE_INTERRUPT: i32 = 1;

/// `WaitOutputBuffer` timeout meaning "forever".
pub const WAIT_INFINITE: u32 = u32::MAX;

/// Size of the buffer handed to `GetLastErrorText`.
pub const ERROR_TEXT_LEN: usize = 1024;

// ── Entry point signatures ──

pub type FnIsDevicePresent = unsafe extern "C" fn(
    ver_definitions: *const c_char,
    ver_manifest: *const c_char,
    log: Option<NativeLogFn>,
) -> u32;

pub type FnCreateHandle = unsafe extern "C" fn(
    handle: *mut *mut c_void,
    endpoint: u32,
    flags: u32,
    ver_definitions: *const c_char,
    ver_manifest: *const c_char,
    log: Option<NativeLogFn>,
) -> u32;

pub type FnCloseHandle = unsafe extern "C" fn(handle: *mut c_void) -> u32;

pub type FnReadShellRegister =
    unsafe extern "C" fn(handle: *mut c_void, index: u32, value: *mut u32) -> u32;

pub type FnWriteShellRegister =
    unsafe extern "C" fn(handle: *mut c_void, index: u32, value: u32) -> u32;

pub type FnReadSoftRegister =
    unsafe extern "C" fn(handle: *mut c_void, address: u64, value: *mut u64) -> u32;

pub type FnWriteSoftRegister =
    unsafe extern "C" fn(handle: *mut c_void, address: u64, value: u64) -> u32;

/// Shared shape of the three capability queries.
pub type FnGetCount = unsafe extern "C" fn(handle: *mut c_void, value: *mut u32) -> u32;

pub type FnGetBufferPointer =
    unsafe extern "C" fn(handle: *mut c_void, slot: u32, ptr: *mut *mut u32) -> u32;

pub type FnGetInputBufferFull =
    unsafe extern "C" fn(handle: *mut c_void, slot: u32, full: *mut i32) -> u32;

pub type FnSendInputBuffer =
    unsafe extern "C" fn(handle: *mut c_void, slot: u32, size_bytes: u32) -> u32;

pub type FnWaitOutputBuffer = unsafe extern "C" fn(
    handle: *mut c_void,
    slot: u32,
    bytes_received: *mut u32,
    use_interrupt: i32,
    timeout_ms: u32,
) -> u32;

pub type FnDiscardOutputBuffer = unsafe extern "C" fn(handle: *mut c_void, slot: u32) -> u32;

pub type FnGetLastError = unsafe extern "C" fn() -> u32;

pub type FnGetLastErrorText = unsafe extern "C" fn(buf: *mut c_char, len: u32) -> u32;

// ── Exported symbol names (NUL-terminated for dlsym) ──

pub mod symbols {
    pub const IS_DEVICE_PRESENT: &[u8] = b"FPGA_IsDevicePresent\0";
    pub const CREATE_HANDLE: &[u8] = b"FPGA_CreateHandle\0";
    pub const CLOSE_HANDLE: &[u8] = b"FPGA_CloseHandle\0";
    pub const READ_SHELL_REGISTER: &[u8] = b"FPGA_ReadShellRegister\0";
    pub const WRITE_SHELL_REGISTER: &[u8] = b"FPGA_WriteShellRegister\0";
    pub const READ_SOFT_REGISTER: &[u8] = b"FPGA_ReadSoftRegister\0";
    pub const WRITE_SOFT_REGISTER: &[u8] = b"FPGA_WriteSoftRegister\0";
    pub const GET_NUMBER_SHELL_REGISTERS: &[u8] = b"FPGA_GetNumberShellRegisters\0";
    pub const GET_NUMBER_BUFFERS: &[u8] = b"FPGA_GetNumberBuffers\0";
    pub const GET_BUFFER_SIZE: &[u8] = b"FPGA_GetBufferSize\0";
    pub const GET_INPUT_BUFFER_POINTER: &[u8] = b"FPGA_GetInputBufferPointer\0";
    pub const GET_OUTPUT_BUFFER_POINTER: &[u8] = b"FPGA_GetOutputBufferPointer\0";
    pub const GET_INPUT_BUFFER_FULL: &[u8] = b"FPGA_GetInputBufferFull\0";
    pub const SEND_INPUT_BUFFER: &[u8] = b"FPGA_SendInputBuffer\0";
    pub const WAIT_OUTPUT_BUFFER: &[u8] = b"FPGA_WaitOutputBuffer\0";
    pub const DISCARD_OUTPUT_BUFFER: &[u8] = b"FPGA_DiscardOutputBuffer\0";
    pub const GET_LAST_ERROR: &[u8] = b"FPGA_GetLastError\0";
    pub const GET_LAST_ERROR_TEXT: &[u8] = b"FPGA_GetLastErrorText\0";
}

/// Every resolved entry point. Valid while the library stays loaded.
#[derive(Clone, Copy)]
pub struct DriverSymbols {
    pub is_device_present: FnIsDevicePresent,
    pub create_handle: FnCreateHandle,
    pub close_handle: FnCloseHandle,
    pub read_shell_register: FnReadShellRegister,
    pub write_shell_register: FnWriteShellRegister,
    pub read_soft_register: FnReadSoftRegister,
    pub write_soft_register: FnWriteSoftRegister,
    pub get_number_shell_registers: FnGetCount,
    pub get_number_buffers: FnGetCount,
    pub get_buffer_size: FnGetCount,
    pub get_input_buffer_pointer: FnGetBufferPointer,
    pub get_output_buffer_pointer: FnGetBufferPointer,
    pub get_input_buffer_full: FnGetInputBufferFull,
    pub send_input_buffer: FnSendInputBuffer,
    pub wait_output_buffer: FnWaitOutputBuffer,
    pub discard_output_buffer: FnDiscardOutputBuffer,
    pub get_last_error: FnGetLastError,
    pub get_last_error_text: FnGetLastErrorText,
}
