//! `DylibDriver` — default `NativeDriver` implementation.
//!
//! Loads the vendor driver shared library with `dlopen`, resolves every
//! entry point up front (a missing symbol fails the load, not the first
//! call), and forwards each trait method to the C function. Unloads the
//! library on drop.

use std::ffi::{c_char, c_void, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use accel_core::driver::{NativeDriver, OpenParams, RawHandle};
use accel_core::error::{AccelError, Result};
use accel_core::status::StatusCode;
use accel_core::kdebug;

use crate::accel_sys::{self, symbols, DriverSymbols};

pub struct DylibDriver {
    /// `dlopen` handle; closed on drop.
    lib: *mut c_void,
    syms: DriverSymbols,
    path: PathBuf,
}

// Safety: the library handle is only passed to dlclose once, on drop.
// The driver's entry points are documented thread-safe.
unsafe impl Send for DylibDriver {}
unsafe impl Sync for DylibDriver {}

impl DylibDriver {
    /// Load the driver library at `path` and resolve all entry points.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| AccelError::Library(format!("path contains NUL: {}", path.display())))?;

        // Safety: c_path is NUL-terminated.
        let lib = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if lib.is_null() {
            return Err(AccelError::Library(format!(
                "dlopen {}: {}",
                path.display(),
                dl_error()
            )));
        }

        // Safety: lib is a live dlopen handle.
        match unsafe { resolve_all(lib) } {
            Ok(syms) => {
                kdebug!("accel: loaded driver library {}", path.display());
                Ok(Self {
                    lib,
                    syms,
                    path: path.to_path_buf(),
                })
            }
            Err(e) => {
                unsafe { libc::dlclose(lib) };
                Err(e)
            }
        }
    }
}

impl Drop for DylibDriver {
    fn drop(&mut self) {
        // Safety: lib came from dlopen and is closed exactly once.
        unsafe { libc::dlclose(self.lib) };
        kdebug!("accel: unloaded driver library {}", self.path.display());
    }
}

/// Last `dlerror()` message.
fn dl_error() -> String {
    // Safety: dlerror returns null or a thread-local C string.
    unsafe { accel_core::driver::c_str_lossy(libc::dlerror()) }
}

/// # Safety
/// `lib` must be a live dlopen handle and `T` a function pointer type
/// matching the symbol's real signature.
unsafe fn resolve<T: Copy>(lib: *mut c_void, name: &'static [u8]) -> Result<T> {
    let sym = libc::dlsym(lib, name.as_ptr() as *const c_char);
    if sym.is_null() {
        let printable = String::from_utf8_lossy(&name[..name.len() - 1]);
        return Err(AccelError::Library(format!("missing symbol {}", printable)));
    }
    Ok(std::mem::transmute_copy::<*mut c_void, T>(&sym))
}

unsafe fn resolve_all(lib: *mut c_void) -> Result<DriverSymbols> {
    Ok(DriverSymbols {
        is_device_present: resolve(lib, symbols::IS_DEVICE_PRESENT)?,
        create_handle: resolve(lib, symbols::CREATE_HANDLE)?,
        close_handle: resolve(lib, symbols::CLOSE_HANDLE)?,
        read_shell_register: resolve(lib, symbols::READ_SHELL_REGISTER)?,
        write_shell_register: resolve(lib, symbols::WRITE_SHELL_REGISTER)?,
        read_soft_register: resolve(lib, symbols::READ_SOFT_REGISTER)?,
        write_soft_register: resolve(lib, symbols::WRITE_SOFT_REGISTER)?,
        get_number_shell_registers: resolve(lib, symbols::GET_NUMBER_SHELL_REGISTERS)?,
        get_number_buffers: resolve(lib, symbols::GET_NUMBER_BUFFERS)?,
        get_buffer_size: resolve(lib, symbols::GET_BUFFER_SIZE)?,
        get_input_buffer_pointer: resolve(lib, symbols::GET_INPUT_BUFFER_POINTER)?,
        get_output_buffer_pointer: resolve(lib, symbols::GET_OUTPUT_BUFFER_POINTER)?,
        get_input_buffer_full: resolve(lib, symbols::GET_INPUT_BUFFER_FULL)?,
        send_input_buffer: resolve(lib, symbols::SEND_INPUT_BUFFER)?,
        wait_output_buffer: resolve(lib, symbols::WAIT_OUTPUT_BUFFER)?,
        discard_output_buffer: resolve(lib, symbols::DISCARD_OUTPUT_BUFFER)?,
        get_last_error: resolve(lib, symbols::GET_LAST_ERROR)?,
        get_last_error_text: resolve(lib, symbols::GET_LAST_ERROR_TEXT)?,
    })
}

#[inline]
fn opt_ptr(s: Option<&std::ffi::CStr>) -> *const c_char {
    s.map_or(std::ptr::null(), |s| s.as_ptr())
}

// Safety (all calls below): the symbols were resolved from a library that
// stays loaded for `self`'s lifetime, and every out-pointer refers to a
// live local or caller-provided location.
impl NativeDriver for DylibDriver {
    fn is_device_present(&self, params: &OpenParams<'_>) -> StatusCode {
        StatusCode(unsafe {
            (self.syms.is_device_present)(
                opt_ptr(params.version_definitions),
                opt_ptr(params.version_manifest),
                params.log,
            )
        })
    }

    fn create_handle(
        &self,
        endpoint: u32,
        params: &OpenParams<'_>,
        handle: &mut RawHandle,
    ) -> StatusCode {
        let mut raw: *mut c_void = std::ptr::null_mut();
        let code = unsafe {
            (self.syms.create_handle)(
                &mut raw,
                endpoint,
                accel_sys::CREATE_FLAGS,
                opt_ptr(params.version_definitions),
                opt_ptr(params.version_manifest),
                params.log,
            )
        };
        *handle = RawHandle(raw);
        StatusCode(code)
    }

    fn close_handle(&self, handle: RawHandle) -> StatusCode {
        StatusCode(unsafe { (self.syms.close_handle)(handle.0) })
    }

    fn read_shell_register(&self, handle: RawHandle, index: u32, value: &mut u32) -> StatusCode {
        StatusCode(unsafe { (self.syms.read_shell_register)(handle.0, index, value) })
    }

    fn write_shell_register(&self, handle: RawHandle, index: u32, value: u32) -> StatusCode {
        StatusCode(unsafe { (self.syms.write_shell_register)(handle.0, index, value) })
    }

    fn read_soft_register(&self, handle: RawHandle, address: u64, value: &mut u64) -> StatusCode {
        StatusCode(unsafe { (self.syms.read_soft_register)(handle.0, address, value) })
    }

    fn write_soft_register(&self, handle: RawHandle, address: u64, value: u64) -> StatusCode {
        StatusCode(unsafe { (self.syms.write_soft_register)(handle.0, address, value) })
    }

    fn number_shell_registers(&self, handle: RawHandle, count: &mut u32) -> StatusCode {
        StatusCode(unsafe { (self.syms.get_number_shell_registers)(handle.0, count) })
    }

    fn number_buffers(&self, handle: RawHandle, count: &mut u32) -> StatusCode {
        StatusCode(unsafe { (self.syms.get_number_buffers)(handle.0, count) })
    }

    fn buffer_size(&self, handle: RawHandle, size: &mut u32) -> StatusCode {
        StatusCode(unsafe { (self.syms.get_buffer_size)(handle.0, size) })
    }

    fn input_buffer_ptr(&self, handle: RawHandle, slot: u32, ptr: &mut *mut u8) -> StatusCode {
        let mut raw: *mut u32 = std::ptr::null_mut();
        let code = unsafe { (self.syms.get_input_buffer_pointer)(handle.0, slot, &mut raw) };
        *ptr = raw as *mut u8;
        StatusCode(code)
    }

    fn output_buffer_ptr(&self, handle: RawHandle, slot: u32, ptr: &mut *mut u8) -> StatusCode {
        let mut raw: *mut u32 = std::ptr::null_mut();
        let code = unsafe { (self.syms.get_output_buffer_pointer)(handle.0, slot, &mut raw) };
        *ptr = raw as *mut u8;
        StatusCode(code)
    }

    fn input_buffer_full(&self, handle: RawHandle, slot: u32, full: &mut bool) -> StatusCode {
        let mut raw: i32 = 0;
        let code = unsafe { (self.syms.get_input_buffer_full)(handle.0, slot, &mut raw) };
        *full = raw != 0;
        StatusCode(code)
    }

    fn send_input_buffer(&self, handle: RawHandle, slot: u32, len: u32) -> StatusCode {
        StatusCode(unsafe { (self.syms.send_input_buffer)(handle.0, slot, len) })
    }

    fn wait_output_buffer(&self, handle: RawHandle, slot: u32, received: &mut u32) -> StatusCode {
        StatusCode(unsafe {
            (self.syms.wait_output_buffer)(
                handle.0,
                slot,
                received,
                accel_sys::WAIT_USE_INTERRUPT,
                accel_sys::WAIT_INFINITE,
            )
        })
    }

    fn discard_output_buffer(&self, handle: RawHandle, slot: u32) -> StatusCode {
        StatusCode(unsafe { (self.syms.discard_output_buffer)(handle.0, slot) })
    }

    fn last_error(&self) -> u32 {
        unsafe { (self.syms.get_last_error)() }
    }

    fn last_error_text(&self) -> String {
        let mut buf = vec![0 as c_char; accel_sys::ERROR_TEXT_LEN];
        let code = unsafe { (self.syms.get_last_error_text)(buf.as_mut_ptr(), buf.len() as u32) };
        if code != StatusCode::SUCCESS.0 {
            return String::new();
        }
        // Guarantee termination even if the driver filled the whole buffer.
        if let Some(last) = buf.last_mut() {
            *last = 0;
        }
        unsafe { accel_core::driver::c_str_lossy(buf.as_ptr()) }
    }
}
