//! The per-slot job protocol.
//!
//! One run per job, on the slot's worker thread, with the device session
//! read-locked for the whole run:
//!
//! ```text
//! poll input-full ─► pad ─► copy in ─► send(len) ─► wait ─► copy out ─► discard
//!   (sleep loop)                                   (blocks)
//! ```
//!
//! The readiness poll has no timeout. A device that never drains its input
//! buffer stalls the slot (and teardown, which waits for running jobs).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use accel_core::driver::NativeDriver;
use accel_core::error::{AccelError, Result};
use accel_core::kdebug;
use accel_core::padding::pad_message;
use accel_module::device::{Device, Session};

use crate::slot_pool::SlotExecutor;

/// Runs jobs against an open device.
pub struct JobRunner<D: NativeDriver> {
    device: Arc<Device<D>>,
    poll_interval: Duration,
}

impl<D: NativeDriver> JobRunner<D> {
    pub fn new(device: Arc<Device<D>>, poll_interval: Duration) -> Self {
        Self {
            device,
            poll_interval,
        }
    }
}

impl<D: NativeDriver + 'static> SlotExecutor for JobRunner<D> {
    fn execute(&self, slot: usize, input: &[u8]) -> Result<Vec<u8>> {
        self.device
            .with_session(|session| run_protocol(session, slot as u32, input, self.poll_interval))
    }
}

/// One full round trip on `slot`.
pub fn run_protocol<D: NativeDriver>(
    session: &Session<D>,
    slot: u32,
    input: &[u8],
    poll_interval: Duration,
) -> Result<Vec<u8>> {
    while session.input_full(slot)? {
        thread::sleep(poll_interval);
    }

    let message = pad_message(input);
    let len = u32::try_from(message.len()).map_err(|_| AccelError::BufferBounds {
        requested: message.len(),
        capacity: u32::MAX as usize,
    })?;

    let mut input_view = session.input_view(slot)?;
    let output_view = session.output_view(slot)?;
    input_view.copy_in(&message)?;
    session.send(slot, len)?;
    kdebug!("accel: slot {} sent {} bytes ({} padded)", slot, input.len(), len);

    let received = session.wait_output(slot)?;
    let response = output_view.copy_out(received as usize);
    // Release the region even when the copy was refused.
    let discarded = session.discard(slot);
    let response = response?;
    discarded?;

    kdebug!("accel: slot {} received {} bytes", slot, response.len());
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use accel_core::driver::OpenParams;
    use accel_core::padding::MIN_MESSAGE_SIZE;
    use accel_core::status::StatusCode;
    use accel_module::mock_driver::{MockConfig, MockDriver, MockOp};

    const POLL: Duration = Duration::from_micros(50);

    fn device(mock: &MockDriver) -> Arc<Device<MockDriver>> {
        Arc::new(Device::open(mock.clone(), 0, &OpenParams::default()).unwrap())
    }

    fn run(dev: &Device<MockDriver>, slot: u32, input: &[u8]) -> Result<Vec<u8>> {
        dev.with_session(|s| run_protocol(s, slot, input, POLL))
    }

    #[test]
    fn test_round_trip_pads_short_input() {
        let mock = MockDriver::with_compute(MockConfig::default(), |_, input| {
            input.iter().map(|b| b.wrapping_add(1)).collect()
        });
        let dev = device(&mock);

        let out = run(&dev, 1, b"abc").unwrap();
        assert_eq!(out.len(), MIN_MESSAGE_SIZE);
        assert_eq!(&out[..3], b"bcd");
        assert!(out[3..].iter().all(|&b| b == 1));

        let sent = mock.sent(1);
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][..3], b"abc");
        assert!(sent[0][3..].iter().all(|&b| b == 0));
        assert_eq!(mock.discards(1), 1);
    }

    #[test]
    fn test_aligned_input_sent_verbatim() {
        let mock = MockDriver::new(MockConfig::default());
        let dev = device(&mock);
        let input: Vec<u8> = (0..128u8).collect();
        assert_eq!(run(&dev, 0, &input).unwrap(), input);
        assert_eq!(mock.sent(0), vec![input]);
    }

    #[test]
    fn test_waits_while_input_full() {
        let mock = MockDriver::new(MockConfig::default());
        let dev = device(&mock);
        mock.set_busy_polls(2, 5);
        run(&dev, 2, &[9; 64]).unwrap();
        assert_eq!(mock.polls(2), 6);
    }

    #[test]
    fn test_fatal_status_aborts_job() {
        let mock = MockDriver::new(MockConfig::default());
        let dev = device(&mock);
        mock.fail_next(MockOp::Send, Some(3), StatusCode::HARDWARE_ERROR);

        let err = run(&dev, 3, &[1; 64]).unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::HARDWARE_ERROR));
        assert!(mock.sent(3).is_empty());
        assert_eq!(run(&dev, 3, &[2; 64]).unwrap(), vec![2; 64]);
    }

    #[test]
    fn test_fatal_readiness_poll_aborts_job() {
        let mock = MockDriver::new(MockConfig::default());
        let dev = device(&mock);
        mock.fail_next(MockOp::InputFull, Some(1), StatusCode::HARDWARE_ERROR);

        let err = run(&dev, 1, &[1; 64]).unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::HARDWARE_ERROR));
        assert!(mock.sent(1).is_empty());
        assert_eq!(mock.discards(1), 0);
    }

    #[test]
    fn test_buffer_lookup_failure_aborts_job() {
        let mock = MockDriver::new(MockConfig::default());
        let dev = device(&mock);
        mock.fail_next(MockOp::BufferPointer, Some(2), StatusCode::BUFFER_INDEX_OUT_OF_RANGE);

        let err = run(&dev, 2, &[1; 64]).unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::BUFFER_INDEX_OUT_OF_RANGE));
        assert_eq!(mock.polls(2), 1);
        assert!(mock.sent(2).is_empty());
    }

    #[test]
    fn test_discard_failure_fails_job_not_slot() {
        let mock = MockDriver::new(MockConfig::default());
        let dev = device(&mock);
        mock.fail_next(MockOp::Discard, Some(0), StatusCode::HARDWARE_ERROR);

        let err = run(&dev, 0, &[1; 64]).unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::HARDWARE_ERROR));
        assert_eq!(mock.sent(0).len(), 1);
        assert_eq!(mock.discards(0), 0);

        assert_eq!(run(&dev, 0, &[2; 64]).unwrap(), vec![2; 64]);
        assert_eq!(mock.sent(0).len(), 2);
        assert_eq!(mock.discards(0), 1);
    }

    #[test]
    fn test_oversized_output_still_discards() {
        let config = MockConfig {
            buffer_size: 256,
            ..Default::default()
        };
        let mock = MockDriver::with_compute(config, |_, _| vec![0; 1024]);
        let dev = device(&mock);

        let err = run(&dev, 0, &[1; 64]).unwrap_err();
        assert_eq!(
            err,
            AccelError::BufferBounds {
                requested: 1024,
                capacity: 256
            }
        );
        assert_eq!(mock.discards(0), 1);
    }

    #[test]
    fn test_padded_input_larger_than_buffer() {
        let config = MockConfig {
            buffer_size: 40,
            ..Default::default()
        };
        let mock = MockDriver::new(config);
        let dev = device(&mock);
        assert!(matches!(
            run(&dev, 0, &[1; 40]),
            Err(AccelError::BufferBounds { requested: 64, capacity: 40 })
        ));
        assert!(mock.sent(0).is_empty());
    }

    #[test]
    fn test_executor_reports_closed_device() {
        let mock = MockDriver::new(MockConfig::default());
        let dev = device(&mock);
        let runner = JobRunner::new(Arc::clone(&dev), POLL);
        assert_eq!(runner.execute(1, &[5; 64]).unwrap(), vec![5; 64]);
        dev.close();
        assert_eq!(runner.execute(1, &[5; 64]).unwrap_err(), AccelError::Closed);
    }
}
