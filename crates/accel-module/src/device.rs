//! `Device` — an open driver handle and the calls made through it.
//!
//! `Device::open` performs presence check, handle creation, and the
//! capability queries. The handle and the driver binding live together
//! in a `Session` behind a read/write lock:
//!
//! - every operation takes the read side for its whole duration
//! - `close` takes the write side, so it waits for in-flight calls and
//!   leaves nothing behind that could touch the handle afterwards
//!
//! ```text
//! Device<D>
//!   ├── caps: Capabilities          (immutable, lock-free reads)
//!   └── state: RwLock<Option<Session<D>>>
//!                  └── driver: D, handle: RawHandle
//! ```

use std::sync::RwLock;

use accel_core::driver::{NativeDriver, OpenParams, RawHandle};
use accel_core::error::{AccelError, Result};
use accel_core::status::StatusCode;
use accel_core::{kdebug, kinfo, kwarn};

use crate::buffer_view::BufferView;
use crate::verifier::verify;

/// Immutable device capabilities, queried once at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub shell_registers: u32,
    pub buffer_count: u32,
    pub buffer_size: u32,
}

/// A live handle plus the driver it belongs to.
pub struct Session<D: NativeDriver> {
    driver: D,
    handle: RawHandle,
    buffer_size: u32,
}

impl<D: NativeDriver> Session<D> {
    /// Verify the result of a native call made through this session.
    #[inline]
    pub fn check(&self, code: StatusCode) -> Result<()> {
        verify(&self.driver, code)
    }

    #[inline]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    #[inline]
    pub fn handle(&self) -> RawHandle {
        self.handle
    }

    fn query_capabilities(&self) -> Result<Capabilities> {
        let mut caps = Capabilities {
            shell_registers: 0,
            buffer_count: 0,
            buffer_size: 0,
        };
        self.check(
            self.driver
                .number_shell_registers(self.handle, &mut caps.shell_registers),
        )?;
        self.check(self.driver.number_buffers(self.handle, &mut caps.buffer_count))?;
        self.check(self.driver.buffer_size(self.handle, &mut caps.buffer_size))?;
        Ok(caps)
    }

    // ── Slot protocol primitives ──

    pub fn input_full(&self, slot: u32) -> Result<bool> {
        let mut full = false;
        self.check(self.driver.input_buffer_full(self.handle, slot, &mut full))?;
        Ok(full)
    }

    pub fn send(&self, slot: u32, len: u32) -> Result<()> {
        self.check(self.driver.send_input_buffer(self.handle, slot, len))
    }

    /// Block until the slot's output is ready; returns its length.
    pub fn wait_output(&self, slot: u32) -> Result<u32> {
        let mut received = 0u32;
        self.check(self.driver.wait_output_buffer(self.handle, slot, &mut received))?;
        Ok(received)
    }

    pub fn discard(&self, slot: u32) -> Result<()> {
        self.check(self.driver.discard_output_buffer(self.handle, slot))
    }

    /// Bounded view over the slot's input region, valid while `self` is borrowed.
    pub fn input_view(&self, slot: u32) -> Result<BufferView<'_>> {
        let mut ptr = std::ptr::null_mut();
        self.check(self.driver.input_buffer_ptr(self.handle, slot, &mut ptr))?;
        // Safety: the driver guarantees `buffer_size` bytes until close,
        // and close cannot run while this session is borrowed.
        unsafe { BufferView::from_raw(ptr, self.buffer_size as usize) }
    }

    /// Bounded view over the slot's output region, valid while `self` is borrowed.
    pub fn output_view(&self, slot: u32) -> Result<BufferView<'_>> {
        let mut ptr = std::ptr::null_mut();
        self.check(self.driver.output_buffer_ptr(self.handle, slot, &mut ptr))?;
        // Safety: as for input_view.
        unsafe { BufferView::from_raw(ptr, self.buffer_size as usize) }
    }
}

pub struct Device<D: NativeDriver> {
    state: RwLock<Option<Session<D>>>,
    caps: Capabilities,
    endpoint: u32,
}

impl<D: NativeDriver> Device<D> {
    /// Check presence, open a handle on `endpoint`, and query capabilities.
    ///
    /// Absent device or failed handle creation is a `Connection` error.
    pub fn open(driver: D, endpoint: u32, params: &OpenParams<'_>) -> Result<Self> {
        let present = driver.is_device_present(params);
        if present != StatusCode::SUCCESS {
            return Err(AccelError::Connection(format!(
                "no device present: {} {}",
                present,
                driver.last_error_text()
            )));
        }

        let mut handle = RawHandle::NULL;
        let code = driver.create_handle(endpoint, params, &mut handle);
        if code != StatusCode::SUCCESS || handle.is_null() {
            return Err(AccelError::Connection(format!(
                "create handle on endpoint {}: {} {}",
                endpoint,
                code,
                driver.last_error_text()
            )));
        }

        let mut session = Session {
            driver,
            handle,
            buffer_size: 0,
        };
        let caps = match session.query_capabilities() {
            Ok(caps) => caps,
            Err(e) => {
                if let Err(close_err) = session.check(session.driver.close_handle(handle)) {
                    kwarn!("accel: open: closing handle after failed query: {}", close_err);
                }
                return Err(e);
            }
        };
        session.buffer_size = caps.buffer_size;

        kinfo!(
            "accel: device open on endpoint {}: {} shell registers, {} buffers x {} bytes",
            endpoint,
            caps.shell_registers,
            caps.buffer_count,
            caps.buffer_size
        );

        Ok(Self {
            state: RwLock::new(Some(session)),
            caps,
            endpoint,
        })
    }

    #[inline]
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    #[inline]
    pub fn endpoint(&self) -> u32 {
        self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.state.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Run `f` against the live session. `Closed` once the device is closed.
    pub fn with_session<T>(&self, f: impl FnOnce(&Session<D>) -> Result<T>) -> Result<T> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        match state.as_ref() {
            Some(session) => f(session),
            None => Err(AccelError::Closed),
        }
    }

    /// Clear the PCIe enable bit, close the handle, release the driver.
    ///
    /// Idempotent: returns `false` if already closed. Failures are logged.
    pub fn close(&self) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let session = match state.take() {
            Some(session) => session,
            None => return false,
        };

        if let Err(e) = session.set_pcie_enabled(false) {
            kwarn!("accel: close: clearing PCIe enable failed: {}", e);
        }
        if let Err(e) = session.check(session.driver.close_handle(session.handle)) {
            kwarn!("accel: close: closing handle failed: {}", e);
        }
        drop(session);
        kdebug!("accel: device on endpoint {} closed", self.endpoint);
        true
    }
}

impl<D: NativeDriver> Drop for Device<D> {
    fn drop(&mut self) {
        self.close();
    }
}
