//! Dispatcher error types.

use std::fmt;

use crate::status::StatusCode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccelError {
    /// Device absent or handle creation failed. Raised at construction only.
    Connection(String),
    /// A native call returned neither Success nor WaitTimeout.
    DeviceOperation {
        /// The code the failing call returned.
        status: StatusCode,
        /// Driver-wide last error code at the time of failure.
        last_error: u32,
        /// Driver-provided description.
        message: String,
    },
    /// Job input is larger than the device buffer.
    OversizedInput { len: usize, max: usize },
    /// Job input is empty.
    EmptyInput,
    /// A buffer view copy would leave the native region.
    BufferBounds { requested: usize, capacity: usize },
    /// The native library or one of its symbols could not be loaded.
    Library(String),
    /// The dispatcher has been torn down.
    Closed,
    /// Invalid configuration value.
    Config(String),
    /// A slot worker thread could not be started.
    WorkerSpawn(String),
}

impl AccelError {
    /// Status code carried by a `DeviceOperation` error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::DeviceOperation { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for AccelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "connection error: {}", msg),
            Self::DeviceOperation { status, last_error, message } => write!(
                f,
                "device operation failed: {} (last error {}): {}",
                status, last_error, message
            ),
            Self::OversizedInput { len, max } => {
                write!(f, "input of {} bytes exceeds buffer size {}", len, max)
            }
            Self::EmptyInput => write!(f, "input is empty"),
            Self::BufferBounds { requested, capacity } => write!(
                f,
                "buffer access of {} bytes exceeds region of {} bytes",
                requested, capacity
            ),
            Self::Library(msg) => write!(f, "native library: {}", msg),
            Self::Closed => write!(f, "dispatcher is closed"),
            Self::Config(msg) => write!(f, "invalid configuration: {}", msg),
            Self::WorkerSpawn(msg) => write!(f, "failed to start slot worker: {}", msg),
        }
    }
}

impl std::error::Error for AccelError {}

pub type Result<T> = std::result::Result<T, AccelError>;
