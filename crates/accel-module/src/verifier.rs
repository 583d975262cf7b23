//! Status verification — the single funnel every native call goes through.
//!
//! Success and WaitTimeout pass. Anything else becomes a `DeviceOperation`
//! error carrying the exact code plus the driver's last error and text.

use accel_core::driver::NativeDriver;
use accel_core::error::{AccelError, Result};
use accel_core::status::StatusCode;
use accel_core::kdebug;

/// Check a native return code.
#[inline]
pub fn verify<D: NativeDriver + ?Sized>(driver: &D, code: StatusCode) -> Result<()> {
    if code.is_benign() {
        return Ok(());
    }
    Err(device_error(driver, code))
}

#[cold]
fn device_error<D: NativeDriver + ?Sized>(driver: &D, code: StatusCode) -> AccelError {
    let last_error = driver.last_error();
    let message = driver.last_error_text();
    kdebug!("accel: native call failed: {} (last error {}): {}", code, last_error, message);
    AccelError::DeviceOperation {
        status: code,
        last_error,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_driver::MockDriver;

    #[test]
    fn test_benign_codes_pass() {
        let driver = MockDriver::default();
        assert!(verify(&driver, StatusCode::SUCCESS).is_ok());
        assert!(verify(&driver, StatusCode::WAIT_TIMEOUT).is_ok());
    }

    #[test]
    fn test_fatal_carries_exact_code() {
        let driver = MockDriver::default();
        for raw in [2u32, 5, 10, 99, 0xDEAD] {
            let err = verify(&driver, StatusCode(raw)).unwrap_err();
            assert_eq!(err.status(), Some(StatusCode(raw)));
        }
    }

    #[test]
    fn test_fatal_fetches_last_error() {
        let driver = MockDriver::default();
        driver.set_last_error(31, "dma engine stalled");
        match verify(&driver, StatusCode::HARDWARE_ERROR) {
            Err(AccelError::DeviceOperation { status, last_error, message }) => {
                assert_eq!(status, StatusCode::HARDWARE_ERROR);
                assert_eq!(last_error, 31);
                assert_eq!(message, "dma engine stalled");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
