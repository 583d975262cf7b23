//! Native status codes and their classification.
//!
//! Every native driver entry point returns a `StatusCode`. The dispatcher
//! only cares about three classes: success, the expected wait timeout
//! (benign during polling), and everything else (fatal for the job).

use std::fmt;

/// Raw status code returned by a native driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const SUCCESS: Self = Self(0);
    pub const WAIT_TIMEOUT: Self = Self(1);
    pub const DEVICE_NOT_FOUND: Self = Self(2);
    pub const INVALID_HANDLE: Self = Self(3);
    pub const INVALID_ARGUMENT: Self = Self(4);
    pub const BUFFER_INDEX_OUT_OF_RANGE: Self = Self(5);
    pub const REGISTER_OUT_OF_RANGE: Self = Self(6);
    pub const INSUFFICIENT_MEMORY: Self = Self(7);
    pub const VERSION_MISMATCH: Self = Self(8);
    pub const DRIVER_ERROR: Self = Self(9);
    pub const HARDWARE_ERROR: Self = Self(10);
    pub const UNSUPPORTED: Self = Self(11);

    /// Classify this code.
    #[inline]
    pub fn class(self) -> StatusClass {
        match self {
            Self::SUCCESS => StatusClass::Success,
            Self::WAIT_TIMEOUT => StatusClass::RecoverableTimeout,
            _ => StatusClass::Fatal,
        }
    }

    /// True for codes that must not raise (Success, WaitTimeout).
    #[inline]
    pub fn is_benign(self) -> bool {
        self.class() != StatusClass::Fatal
    }

    /// Symbolic name, if the code is one the driver documents.
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::SUCCESS => "SUCCESS",
            Self::WAIT_TIMEOUT => "WAIT_TIMEOUT",
            Self::DEVICE_NOT_FOUND => "DEVICE_NOT_FOUND",
            Self::INVALID_HANDLE => "INVALID_HANDLE",
            Self::INVALID_ARGUMENT => "INVALID_ARGUMENT",
            Self::BUFFER_INDEX_OUT_OF_RANGE => "BUFFER_INDEX_OUT_OF_RANGE",
            Self::REGISTER_OUT_OF_RANGE => "REGISTER_OUT_OF_RANGE",
            Self::INSUFFICIENT_MEMORY => "INSUFFICIENT_MEMORY",
            Self::VERSION_MISMATCH => "VERSION_MISMATCH",
            Self::DRIVER_ERROR => "DRIVER_ERROR",
            Self::HARDWARE_ERROR => "HARDWARE_ERROR",
            Self::UNSUPPORTED => "UNSUPPORTED",
            _ => return None,
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "status {}", self.0),
        }
    }
}

/// How the dispatcher treats a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// Expected while polling; never raised.
    RecoverableTimeout,
    /// Aborts the current operation with `DeviceOperation`.
    Fatal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_codes() {
        assert_eq!(StatusCode::SUCCESS.class(), StatusClass::Success);
        assert_eq!(StatusCode::WAIT_TIMEOUT.class(), StatusClass::RecoverableTimeout);
        assert!(StatusCode::SUCCESS.is_benign());
        assert!(StatusCode::WAIT_TIMEOUT.is_benign());
    }

    #[test]
    fn test_everything_else_is_fatal() {
        for raw in 2..64u32 {
            assert_eq!(StatusCode(raw).class(), StatusClass::Fatal, "code {}", raw);
        }
        assert_eq!(StatusCode(u32::MAX).class(), StatusClass::Fatal);
    }

    #[test]
    fn test_display() {
        assert_eq!(StatusCode::HARDWARE_ERROR.to_string(), "HARDWARE_ERROR (10)");
        assert_eq!(StatusCode(4242).to_string(), "status 4242");
    }
}
