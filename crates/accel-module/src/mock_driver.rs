//! `MockDriver` — in-process `NativeDriver` simulation (testing).
//!
//! Behaves like a device with `buffer_count` slots of `buffer_size` bytes.
//! `send_input_buffer` runs a compute closure over the transmitted bytes
//! and stages the result in the slot's output region. Cloning shares the
//! simulated device, so a test can keep a clone for inspection after
//! handing one to the code under test.
//!
//! Test hooks:
//! - `fail_next` — one-shot fault injection per operation (and slot)
//! - `set_busy_polls` — report "input full" for N polls before ready
//! - `hold` / `release` — block `wait_output_buffer` on a slot
//! - `sent`, `overlaps`, `polls` — what the device observed

use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use accel_core::driver::{NativeDriver, OpenParams, RawHandle};
use accel_core::klog::LogFlags;
use accel_core::status::StatusCode;

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub present: bool,
    pub buffer_count: u32,
    pub buffer_size: u32,
    pub shell_registers: u32,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            present: true,
            buffer_count: 4,
            buffer_size: 4096,
            shell_registers: 16,
        }
    }
}

/// Operations that accept injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    Present,
    CreateHandle,
    CloseHandle,
    QueryCapabilities,
    ReadShell,
    WriteShell,
    ReadSoft,
    WriteSoft,
    BufferPointer,
    InputFull,
    Send,
    Wait,
    Discard,
}

/// Device "computation": `(slot, transmitted bytes) -> output bytes`.
pub type ComputeFn = dyn Fn(u32, &[u8]) -> Vec<u8> + Send + Sync;

struct Fault {
    op: MockOp,
    slot: Option<u32>,
    code: StatusCode,
}

/// Heap region standing in for a DMA buffer.
struct Region {
    ptr: *mut u8,
    len: usize,
}

// Safety: access is serialized by the mock's state lock or by the
// dispatcher's one-job-per-slot rule.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    fn new(len: usize) -> Self {
        let boxed = vec![0u8; len].into_boxed_slice();
        Self {
            ptr: Box::into_raw(boxed) as *mut u8,
            len,
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // Safety: ptr/len came from Box::into_raw of a boxed slice.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(self.ptr, self.len)));
        }
    }
}

#[derive(Default)]
struct SlotState {
    busy_polls: u32,
    polls: u64,
    pending: Option<u32>,
    in_flight: bool,
    held: bool,
    sent: Vec<Vec<u8>>,
    discards: usize,
}

struct MockState {
    open: bool,
    close_calls: usize,
    shell: Vec<u32>,
    soft: HashMap<u64, u64>,
    slots: Vec<SlotState>,
    faults: Vec<Fault>,
    last_error: u32,
    last_error_text: String,
    overlaps: usize,
}

struct MockInner {
    config: MockConfig,
    state: Mutex<MockState>,
    cond: Condvar,
    inputs: Vec<Region>,
    outputs: Vec<Region>,
    compute: Box<ComputeFn>,
}

#[derive(Clone)]
pub struct MockDriver {
    inner: Arc<MockInner>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new(MockConfig::default())
    }
}

impl MockDriver {
    /// A device that echoes its (padded) input.
    pub fn new(config: MockConfig) -> Self {
        Self::with_compute(config, |_, input| input.to_vec())
    }

    pub fn with_compute<F>(config: MockConfig, compute: F) -> Self
    where
        F: Fn(u32, &[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        let n = config.buffer_count as usize;
        let size = config.buffer_size as usize;
        let state = MockState {
            open: false,
            close_calls: 0,
            shell: vec![0; config.shell_registers as usize],
            soft: HashMap::new(),
            slots: (0..n).map(|_| SlotState::default()).collect(),
            faults: Vec::new(),
            last_error: 0,
            last_error_text: String::new(),
            overlaps: 0,
        };
        Self {
            inner: Arc::new(MockInner {
                inputs: (0..n).map(|_| Region::new(size)).collect(),
                outputs: (0..n).map(|_| Region::new(size)).collect(),
                config,
                state: Mutex::new(state),
                cond: Condvar::new(),
                compute: Box::new(compute),
            }),
        }
    }

    // ── Test hooks ──

    /// Make the next matching call return `code`. `slot: None` matches any slot.
    pub fn fail_next(&self, op: MockOp, slot: Option<u32>, code: StatusCode) {
        self.lock().faults.push(Fault { op, slot, code });
    }

    pub fn set_busy_polls(&self, slot: u32, polls: u32) {
        self.lock().slots[slot as usize].busy_polls = polls;
    }

    pub fn set_last_error(&self, code: u32, text: &str) {
        let mut state = self.lock();
        state.last_error = code;
        state.last_error_text = text.to_string();
    }

    /// Block `wait_output_buffer` on `slot` until `release`.
    pub fn hold(&self, slot: u32) {
        self.lock().slots[slot as usize].held = true;
    }

    pub fn release(&self, slot: u32) {
        self.lock().slots[slot as usize].held = false;
        self.inner.cond.notify_all();
    }

    pub fn release_all(&self) {
        for slot in self.lock().slots.iter_mut() {
            slot.held = false;
        }
        self.inner.cond.notify_all();
    }

    /// Wait until a job on `slot` has been sent and not yet discarded.
    pub fn wait_until_in_flight(&self, slot: u32, timeout: Duration) -> bool {
        self.wait_until(timeout, |s| s.slots[slot as usize].in_flight)
    }

    /// Wait until `slot` has received at least `count` messages.
    pub fn wait_until_sent(&self, slot: u32, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |s| s.slots[slot as usize].sent.len() >= count)
    }

    /// Every message transmitted on `slot`, in order.
    pub fn sent(&self, slot: u32) -> Vec<Vec<u8>> {
        self.lock().slots[slot as usize].sent.clone()
    }

    pub fn polls(&self, slot: u32) -> u64 {
        self.lock().slots[slot as usize].polls
    }

    pub fn discards(&self, slot: u32) -> usize {
        self.lock().slots[slot as usize].discards
    }

    /// Sends observed while the slot already had a job in flight.
    pub fn overlaps(&self) -> usize {
        self.lock().overlaps
    }

    pub fn shell_register(&self, index: u32) -> u32 {
        self.lock().shell[index as usize]
    }

    pub fn set_shell_register(&self, index: u32, value: u32) {
        self.lock().shell[index as usize] = value;
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    // ── Internals ──

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait_until(&self, timeout: Duration, pred: impl Fn(&MockState) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !pred(&state) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.inner.cond.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }

    fn token(&self) -> *mut c_void {
        Arc::as_ptr(&self.inner) as *mut c_void
    }

    /// Common preamble: fault injection, then handle and slot validation.
    fn enter(
        &self,
        state: &mut MockState,
        op: MockOp,
        handle: Option<RawHandle>,
        slot: Option<u32>,
    ) -> StatusCode {
        if let Some(pos) = state
            .faults
            .iter()
            .position(|f| f.op == op && (f.slot.is_none() || f.slot == slot))
        {
            let fault = state.faults.remove(pos);
            return fail(state, fault.code, format!("injected {:?} fault", op));
        }
        self.validate(state, handle, slot)
    }

    fn validate(&self, state: &mut MockState, handle: Option<RawHandle>, slot: Option<u32>) -> StatusCode {
        if let Some(handle) = handle {
            if !state.open || handle.0 != self.token() {
                return fail(state, StatusCode::INVALID_HANDLE, "invalid handle".into());
            }
        }
        if let Some(slot) = slot {
            if slot >= self.inner.config.buffer_count {
                return fail(
                    state,
                    StatusCode::BUFFER_INDEX_OUT_OF_RANGE,
                    format!("buffer {} out of range", slot),
                );
            }
        }
        StatusCode::SUCCESS
    }
}

fn fail(state: &mut MockState, code: StatusCode, text: String) -> StatusCode {
    state.last_error = code.0;
    state.last_error_text = text;
    code
}

macro_rules! enter {
    ($self:ident, $state:ident, $op:expr, $handle:expr, $slot:expr) => {
        let code = $self.enter(&mut $state, $op, $handle, $slot);
        if code != StatusCode::SUCCESS {
            return code;
        }
    };
}

impl NativeDriver for MockDriver {
    fn is_device_present(&self, _params: &OpenParams<'_>) -> StatusCode {
        let mut state = self.lock();
        enter!(self, state, MockOp::Present, None, None);
        if self.inner.config.present {
            StatusCode::SUCCESS
        } else {
            fail(&mut state, StatusCode::DEVICE_NOT_FOUND, "no device".into())
        }
    }

    fn create_handle(
        &self,
        endpoint: u32,
        params: &OpenParams<'_>,
        handle: &mut RawHandle,
    ) -> StatusCode {
        {
            let mut state = self.lock();
            enter!(self, state, MockOp::CreateHandle, None, None);
            state.open = true;
        }
        *handle = RawHandle(self.token());
        if let Some(log) = params.log {
            if let Ok(msg) = CString::new(format!("mock: handle created on endpoint {}", endpoint)) {
                // Safety: msg is NUL-terminated and outlives the call.
                unsafe { log(LogFlags::VERBOSE.0, msg.as_ptr()) };
            }
        }
        StatusCode::SUCCESS
    }

    fn close_handle(&self, handle: RawHandle) -> StatusCode {
        let mut state = self.lock();
        enter!(self, state, MockOp::CloseHandle, Some(handle), None);
        state.open = false;
        state.close_calls += 1;
        StatusCode::SUCCESS
    }

    fn read_shell_register(&self, handle: RawHandle, index: u32, value: &mut u32) -> StatusCode {
        let mut state = self.lock();
        enter!(self, state, MockOp::ReadShell, Some(handle), None);
        if index as usize >= state.shell.len() {
            return fail(&mut state, StatusCode::REGISTER_OUT_OF_RANGE, "no such register".into());
        }
        *value = state.shell[index as usize];
        StatusCode::SUCCESS
    }

    fn write_shell_register(&self, handle: RawHandle, index: u32, value: u32) -> StatusCode {
        let mut state = self.lock();
        enter!(self, state, MockOp::WriteShell, Some(handle), None);
        if index as usize >= state.shell.len() {
            return fail(&mut state, StatusCode::REGISTER_OUT_OF_RANGE, "no such register".into());
        }
        state.shell[index as usize] = value;
        StatusCode::SUCCESS
    }

    fn read_soft_register(&self, handle: RawHandle, address: u64, value: &mut u64) -> StatusCode {
        let mut state = self.lock();
        enter!(self, state, MockOp::ReadSoft, Some(handle), None);
        *value = state.soft.get(&address).copied().unwrap_or(0);
        StatusCode::SUCCESS
    }

    fn write_soft_register(&self, handle: RawHandle, address: u64, value: u64) -> StatusCode {
        let mut state = self.lock();
        enter!(self, state, MockOp::WriteSoft, Some(handle), None);
        state.soft.insert(address, value);
        StatusCode::SUCCESS
    }

    fn number_shell_registers(&self, handle: RawHandle, count: &mut u32) -> StatusCode {
        let mut state = self.lock();
        enter!(self, state, MockOp::QueryCapabilities, Some(handle), None);
        *count = self.inner.config.shell_registers;
        StatusCode::SUCCESS
    }

    fn number_buffers(&self, handle: RawHandle, count: &mut u32) -> StatusCode {
        let mut state = self.lock();
        enter!(self, state, MockOp::QueryCapabilities, Some(handle), None);
        *count = self.inner.config.buffer_count;
        StatusCode::SUCCESS
    }

    fn buffer_size(&self, handle: RawHandle, size: &mut u32) -> StatusCode {
        let mut state = self.lock();
        enter!(self, state, MockOp::QueryCapabilities, Some(handle), None);
        *size = self.inner.config.buffer_size;
        StatusCode::SUCCESS
    }

    fn input_buffer_ptr(&self, handle: RawHandle, slot: u32, ptr: &mut *mut u8) -> StatusCode {
        let mut state = self.lock();
        enter!(self, state, MockOp::BufferPointer, Some(handle), Some(slot));
        *ptr = self.inner.inputs[slot as usize].ptr;
        StatusCode::SUCCESS
    }

    fn output_buffer_ptr(&self, handle: RawHandle, slot: u32, ptr: &mut *mut u8) -> StatusCode {
        let mut state = self.lock();
        enter!(self, state, MockOp::BufferPointer, Some(handle), Some(slot));
        *ptr = self.inner.outputs[slot as usize].ptr;
        StatusCode::SUCCESS
    }

    fn input_buffer_full(&self, handle: RawHandle, slot: u32, full: &mut bool) -> StatusCode {
        let mut state = self.lock();
        enter!(self, state, MockOp::InputFull, Some(handle), Some(slot));
        let s = &mut state.slots[slot as usize];
        s.polls += 1;
        *full = s.busy_polls > 0;
        s.busy_polls = s.busy_polls.saturating_sub(1);
        StatusCode::SUCCESS
    }

    fn send_input_buffer(&self, handle: RawHandle, slot: u32, len: u32) -> StatusCode {
        let mut state = self.lock();
        enter!(self, state, MockOp::Send, Some(handle), Some(slot));
        if len > self.inner.config.buffer_size {
            return fail(&mut state, StatusCode::INVALID_ARGUMENT, "send length too large".into());
        }

        let input = &self.inner.inputs[slot as usize];
        // Safety: len <= region size, and the region is not written while
        // the dispatcher waits on this call.
        let bytes = unsafe { std::slice::from_raw_parts(input.ptr, len as usize) }.to_vec();
        let output = (self.inner.compute)(slot, &bytes);

        let out = &self.inner.outputs[slot as usize];
        let staged = output.len().min(out.len);
        // Safety: staged <= region size.
        unsafe { std::ptr::copy_nonoverlapping(output.as_ptr(), out.ptr, staged) };

        if state.slots[slot as usize].in_flight {
            state.overlaps += 1;
        }
        let s = &mut state.slots[slot as usize];
        s.in_flight = true;
        s.sent.push(bytes);
        // Report the true length even if it did not fit.
        s.pending = Some(output.len() as u32);
        self.inner.cond.notify_all();
        StatusCode::SUCCESS
    }

    fn wait_output_buffer(&self, handle: RawHandle, slot: u32, received: &mut u32) -> StatusCode {
        let mut state = self.lock();
        let code = self.validate(&mut state, Some(handle), Some(slot));
        if code != StatusCode::SUCCESS {
            return code;
        }
        while state.slots[slot as usize].held {
            state = match self.inner.cond.wait(state) {
                Ok(guard) => guard,
                Err(e) => e.into_inner(),
            };
        }
        let code = self.enter(&mut state, MockOp::Wait, None, Some(slot));
        if code != StatusCode::SUCCESS {
            state.slots[slot as usize].in_flight = false;
            self.inner.cond.notify_all();
            return code;
        }
        *received = state.slots[slot as usize].pending.take().unwrap_or(0);
        StatusCode::SUCCESS
    }

    fn discard_output_buffer(&self, handle: RawHandle, slot: u32) -> StatusCode {
        let mut state = self.lock();
        enter!(self, state, MockOp::Discard, Some(handle), Some(slot));
        let s = &mut state.slots[slot as usize];
        s.in_flight = false;
        s.discards += 1;
        self.inner.cond.notify_all();
        StatusCode::SUCCESS
    }

    fn last_error(&self) -> u32 {
        self.lock().last_error
    }

    fn last_error_text(&self) -> String {
        self.lock().last_error_text.clone()
    }
}
