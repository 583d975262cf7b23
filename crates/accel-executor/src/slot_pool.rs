//! `SlotPool` — round-robin scheduling with free-slot preference.
//!
//! One worker thread per device slot. Each slot has a lock-free FIFO of
//! pending jobs; its worker runs them one at a time, so a slot never has
//! two protocol runs in flight and runs its jobs in submission order.
//!
//! The scheduler state (cursor + latest completion per slot) sits behind
//! a mutex held only for the O(slots) pick. No device I/O happens under it.
//!
//! ```text
//! submit ─► lock ─► cursor+1 ─► tail resolved? ─no─► scan forward for a
//!                                   │                 resolved tail
//!                                   ▼                       │
//!                   tails[slot] = new completion ◄──────────┘
//!                   queues[slot].push(job) ─► unlock ─► unpark worker[slot]
//! ```
//!
//! The scan takes the first resolved slot forward from the cursor, not the
//! least loaded one. With every slot busy the round-robin pick stands and
//! the job queues behind that slot's work.

use accel_core::error::{AccelError, Result};
use accel_core::{kdebug, kwarn};

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crate::completion::{Completion, JobHandle};

/// Idle workers re-check their queue at least this often.
const IDLE_PARK: Duration = Duration::from_millis(10);

/// Runs one job's protocol on a slot. Called from that slot's worker only.
pub trait SlotExecutor: Send + Sync + 'static {
    fn execute(&self, slot: usize, input: &[u8]) -> Result<Vec<u8>>;
}

/// Counters snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Jobs accepted by the scheduler.
    pub submitted: u64,
    /// Jobs that resolved with output.
    pub completed: u64,
    /// Jobs that resolved with an error.
    pub failed: u64,
    /// Queued plus running jobs, per slot.
    pub queue_depth: Vec<usize>,
}

struct Job {
    input: Vec<u8>,
    completion: Arc<Completion>,
}

/// Scheduler bookkeeping guarded by the pool mutex.
struct Cursor {
    next_slot: usize,
    tails: Vec<Arc<Completion>>,
    closed: bool,
}

impl Cursor {
    fn new(slots: usize) -> Self {
        Self {
            next_slot: 0,
            tails: (0..slots).map(|_| Arc::new(Completion::resolved())).collect(),
            closed: false,
        }
    }

    /// Advance the cursor and apply free-slot preference.
    fn pick(&mut self) -> usize {
        let n = self.tails.len();
        self.next_slot = (self.next_slot + 1) % n;
        if !self.tails[self.next_slot].is_resolved() {
            let start = self.next_slot;
            if let Some(free) = (0..n)
                .map(|i| (start + i) % n)
                .find(|&slot| self.tails[slot].is_resolved())
            {
                self.next_slot = free;
            }
        }
        self.next_slot
    }
}

/// Shared state between submitters and slot workers.
struct PoolInner<E> {
    executor: E,
    cursor: Mutex<Cursor>,
    /// Pending jobs per slot: submitters → that slot's worker.
    queues: Box<[SegQueue<Job>]>,
    /// Queued + running jobs per slot.
    depth: Box<[AtomicUsize]>,
    shutdown: AtomicBool,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl<E> PoolInner<E> {
    fn lock_cursor(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn finish(&self, slot: usize, job: Job, result: Result<Vec<u8>>) {
        match &result {
            Ok(_) => self.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        self.depth[slot].fetch_sub(1, Ordering::AcqRel);
        job.completion.resolve(result);
    }
}

pub struct SlotPool<E: SlotExecutor> {
    inner: Arc<PoolInner<E>>,
    threads: Vec<Thread>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<E: SlotExecutor> SlotPool<E> {
    /// Start one worker per slot. `slots` must be at least 1.
    pub fn new(executor: E, slots: usize) -> Result<Self> {
        if slots == 0 {
            return Err(AccelError::Config("slot pool needs at least one slot".into()));
        }
        let inner = Arc::new(PoolInner {
            executor,
            cursor: Mutex::new(Cursor::new(slots)),
            queues: (0..slots).map(|_| SegQueue::new()).collect(),
            depth: (0..slots).map(|_| AtomicUsize::new(0)).collect(),
            shutdown: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let mut handles = Vec::with_capacity(slots);
        for slot in 0..slots {
            let worker = Arc::clone(&inner);
            let spawned = thread::Builder::new()
                .name(format!("accel-slot-{}", slot))
                .spawn(move || worker_loop(worker, slot));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    inner.shutdown.store(true, Ordering::SeqCst);
                    for handle in handles {
                        handle.thread().unpark();
                        let _ = handle.join();
                    }
                    return Err(AccelError::WorkerSpawn(e.to_string()));
                }
            }
        }

        let threads = handles.iter().map(|h| h.thread().clone()).collect();
        Ok(Self {
            inner,
            threads,
            handles: Mutex::new(handles),
        })
    }

    #[inline]
    pub fn slots(&self) -> usize {
        self.threads.len()
    }

    #[inline]
    pub fn executor(&self) -> &E {
        &self.inner.executor
    }

    /// Route `input` to a slot and queue it behind that slot's work.
    pub fn submit(&self, input: Vec<u8>) -> Result<JobHandle> {
        let completion = Arc::new(Completion::new());
        let slot = {
            let mut cursor = self.inner.lock_cursor();
            if cursor.closed {
                return Err(AccelError::Closed);
            }
            let slot = cursor.pick();
            cursor.tails[slot] = Arc::clone(&completion);
            self.inner.depth[slot].fetch_add(1, Ordering::AcqRel);
            self.inner.submitted.fetch_add(1, Ordering::Relaxed);
            self.inner.queues[slot].push(Job {
                input,
                completion: Arc::clone(&completion),
            });
            slot
        };
        self.threads[slot].unpark();
        Ok(JobHandle::new(completion, slot))
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            queue_depth: self
                .inner
                .depth
                .iter()
                .map(|d| d.load(Ordering::Acquire))
                .collect(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_cursor().closed
    }

    /// Stop accepting jobs, let running jobs finish, fail queued ones with
    /// `Closed`, and join the workers. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut cursor = self.inner.lock_cursor();
            if cursor.closed {
                return;
            }
            cursor.closed = true;
            self.inner.shutdown.store(true, Ordering::SeqCst);
        }

        let handles: Vec<_> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            handle.thread().unpark();
            if handle.join().is_err() {
                kwarn!("accel: slot worker panicked");
            }
        }

        // Anything a worker missed between its last pop and the flag.
        for (slot, queue) in self.inner.queues.iter().enumerate() {
            while let Some(job) = queue.pop() {
                self.inner.finish(slot, job, Err(AccelError::Closed));
            }
        }
    }

    #[cfg(test)]
    fn set_cursor(&self, next_slot: usize) {
        self.inner.lock_cursor().next_slot = next_slot;
    }
}

impl<E: SlotExecutor> Drop for SlotPool<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Slot worker main loop.
fn worker_loop<E: SlotExecutor>(inner: Arc<PoolInner<E>>, slot: usize) {
    kdebug!("accel: slot {} worker started", slot);
    loop {
        if let Some(job) = inner.queues[slot].pop() {
            let result = if inner.shutdown.load(Ordering::Acquire) {
                Err(AccelError::Closed)
            } else {
                inner.executor.execute(slot, &job.input)
            };
            inner.finish(slot, job, result);
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        thread::park_timeout(IDLE_PARK);
    }
    kdebug!("accel: slot {} worker stopped", slot);
}
