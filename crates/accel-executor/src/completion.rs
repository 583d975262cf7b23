//! Job completions.
//!
//! A `Completion` is the one-shot cell a slot worker resolves when a job's
//! protocol run ends. The pool keeps the latest completion per slot as the
//! slot's tail; the caller holds the same cell through a `JobHandle`.
//!
//! ```text
//! submit ──► Arc<Completion> ──┬──► SlotPool tails[slot]   (is_resolved)
//!                              └──► JobHandle               (wait / poll)
//! worker ──► resolve(result) ──► condvar notify + waker wake
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};

use accel_core::error::{AccelError, Result};

struct CompletionState {
    result: Option<Result<Vec<u8>>>,
    waker: Option<Waker>,
}

/// One-shot result cell shared by a slot worker and the submitting caller.
pub struct Completion {
    resolved: AtomicBool,
    state: Mutex<CompletionState>,
    cond: Condvar,
}

impl Completion {
    pub(crate) fn new() -> Self {
        Self {
            resolved: AtomicBool::new(false),
            state: Mutex::new(CompletionState {
                result: None,
                waker: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// Placeholder tail for a slot that has never run a job.
    pub(crate) fn resolved() -> Self {
        let c = Self::new();
        c.resolved.store(true, Ordering::Release);
        c
    }

    /// Lock-free check used by the scheduler's free-slot scan.
    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// Store the job's result and wake whoever is waiting. Later calls are ignored.
    pub(crate) fn resolve(&self, result: Result<Vec<u8>>) {
        let waker = {
            let mut state = self.lock();
            if self.resolved.load(Ordering::Acquire) {
                return;
            }
            state.result = Some(result);
            self.resolved.store(true, Ordering::Release);
            state.waker.take()
        };
        self.cond.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CompletionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take(&self) -> Result<Vec<u8>> {
        self.lock().result.take().unwrap_or(Err(AccelError::Closed))
    }
}

/// The caller's side of a submitted job.
///
/// Block on it with [`JobHandle::wait`] or `.await` it. Dropping the handle
/// does not cancel the job; the slot still runs it to completion.
pub struct JobHandle {
    completion: Arc<Completion>,
    slot: Option<usize>,
}

impl JobHandle {
    pub(crate) fn new(completion: Arc<Completion>, slot: usize) -> Self {
        Self {
            completion,
            slot: Some(slot),
        }
    }

    /// A handle that is already resolved with `err`; used for rejections
    /// that happen before any slot is chosen.
    pub(crate) fn failed(err: AccelError) -> Self {
        let completion = Arc::new(Completion::new());
        completion.resolve(Err(err));
        Self {
            completion,
            slot: None,
        }
    }

    /// Slot the job was routed to, `None` if it was rejected at admission.
    #[inline]
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.completion.is_resolved()
    }

    /// Block the calling thread until the job resolves.
    pub fn wait(self) -> Result<Vec<u8>> {
        let mut state = self.completion.lock();
        while !self.completion.is_resolved() {
            state = self
                .completion
                .cond
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        drop(state);
        self.completion.take()
    }
}

impl Future for JobHandle {
    type Output = Result<Vec<u8>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        {
            let mut state = self.completion.lock();
            if !self.completion.is_resolved() {
                match &state.waker {
                    Some(w) if w.will_wake(cx.waker()) => {}
                    _ => state.waker = Some(cx.waker().clone()),
                }
                return Poll::Pending;
            }
        }
        Poll::Ready(self.completion.take())
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("slot", &self.slot)
            .field("finished", &self.is_finished())
            .finish()
    }
}
