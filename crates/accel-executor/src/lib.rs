//! # accel-executor — The Job Dispatcher
//!
//! Callers hand byte buffers to a `Dispatcher`; each one becomes a job
//! that runs one round trip through a device slot:
//!
//! ```text
//! execute_job(bytes)
//!     │  reject empty / oversized / closed       → JobHandle (failed)
//!     ▼
//! SlotPool::submit
//!     │  lock: cursor+1, free-slot scan, tails[slot] = job
//!     │  push onto queues[slot], unpark worker[slot]
//!     ▼
//! worker[slot] (one thread per slot, FIFO, never overlapping)
//!     │  JobRunner: poll input-full → pad → copy in → send
//!     │             → wait → copy out → discard
//!     ▼
//! Completion::resolve(result)                    → JobHandle (wait / .await)
//! ```
//!
//! A fatal status fails only the job that saw it. The slot's worker moves
//! straight on to the next queued job.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use accel_executor::{Dispatcher, DispatcherConfig};
//!
//! let dispatcher = Dispatcher::open(&DispatcherConfig::from_env())?;
//! let output = dispatcher.execute_job(b"payload").wait()?;
//! dispatcher.teardown();
//! ```

pub mod completion;
pub mod config;
pub mod dispatcher;
pub mod runner;
pub mod slot_pool;

pub use completion::JobHandle;
pub use config::DispatcherConfig;
pub use dispatcher::Dispatcher;
pub use slot_pool::{DispatcherStats, SlotExecutor, SlotPool};

pub use accel_core::error::{AccelError, Result};
