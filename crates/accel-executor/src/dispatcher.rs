//! `Dispatcher` — the public face of the accelerator.
//!
//! Owns the open `Device` and the `SlotPool` that runs jobs on it.
//! Construction brings the device up (handle, config register, PCIe
//! enable); `teardown` brings it down. Both ends run exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use accel_core::constants::CONFIG_REGISTER;
use accel_core::driver::{NativeDriver, OpenParams};
use accel_core::error::{AccelError, Result};
use accel_core::klog;
use accel_core::kinfo;
use accel_core::padding::padded_len;
use accel_module::device::{Capabilities, Device};
#[cfg(unix)]
use accel_module::dylib_driver::DylibDriver;

use crate::completion::JobHandle;
use crate::config::{path_to_cstring, DispatcherConfig};
use crate::runner::JobRunner;
use crate::slot_pool::{DispatcherStats, SlotPool};

pub struct Dispatcher<D: NativeDriver + 'static> {
    device: Arc<Device<D>>,
    pool: SlotPool<JobRunner<D>>,
    sink: Option<Arc<dyn klog::LogSink>>,
    torn_down: AtomicBool,
}

#[cfg(unix)]
impl Dispatcher<DylibDriver> {
    /// Load the vendor library named by `config` and bring the device up.
    pub fn open(config: &DispatcherConfig) -> Result<Self> {
        klog::init();
        let driver = DylibDriver::load(&config.library_path)?;
        Self::with_driver(driver, config)
    }
}

impl<D: NativeDriver + 'static> Dispatcher<D> {
    /// Bring the device up through an already-bound driver.
    ///
    /// Absent device or failed handle creation is a `Connection` error.
    /// A partially opened device is closed again before returning an error.
    /// The configured log sink is installed for the dispatcher's lifetime
    /// and removed again on failure or at teardown.
    pub fn with_driver(driver: D, config: &DispatcherConfig) -> Result<Self> {
        let sink = config.log_sink.clone();
        if let Some(sink) = &sink {
            klog::set_sink(Some(Arc::clone(sink)));
        }

        match Self::bring_up(driver, config) {
            Ok((device, pool)) => Ok(Self {
                device,
                pool,
                sink,
                torn_down: AtomicBool::new(false),
            }),
            Err(e) => {
                if let Some(sink) = &sink {
                    klog::remove_sink(sink);
                }
                Err(e)
            }
        }
    }

    fn bring_up(
        driver: D,
        config: &DispatcherConfig,
    ) -> Result<(Arc<Device<D>>, SlotPool<JobRunner<D>>)> {
        let definitions = config
            .version_definitions_file
            .as_deref()
            .map(path_to_cstring)
            .transpose()?;
        let manifest = config
            .version_manifest_file
            .as_deref()
            .map(path_to_cstring)
            .transpose()?;
        let params = OpenParams {
            version_definitions: definitions.as_deref(),
            version_manifest: manifest.as_deref(),
            log: Some(klog::native_log),
        };

        let device = Arc::new(Device::open(driver, config.endpoint, &params)?);
        device.write_shell(CONFIG_REGISTER, 0)?;
        device.set_pcie_enabled(true)?;

        let caps = device.capabilities();
        if caps.buffer_count == 0 {
            return Err(AccelError::Connection("device reports no buffers".into()));
        }

        let runner = JobRunner::new(Arc::clone(&device), config.poll_interval);
        let pool = SlotPool::new(runner, caps.buffer_count as usize)?;

        kinfo!(
            "accel: dispatcher ready on endpoint {} with {} slots",
            config.endpoint,
            caps.buffer_count
        );
        Ok((device, pool))
    }

    /// Queue `input` on a slot. Safe to call from any number of threads.
    ///
    /// Empty input, input whose padded length exceeds `buffer_size`, and
    /// any call after teardown resolve the handle with an error before
    /// touching the device.
    pub fn execute_job(&self, input: &[u8]) -> JobHandle {
        if input.is_empty() {
            return JobHandle::failed(AccelError::EmptyInput);
        }
        let max = self.buffer_size();
        if padded_len(input.len()) > max {
            return JobHandle::failed(AccelError::OversizedInput {
                len: input.len(),
                max,
            });
        }
        if self.is_closed() {
            return JobHandle::failed(AccelError::Closed);
        }
        match self.pool.submit(input.to_vec()) {
            Ok(handle) => handle,
            Err(e) => JobHandle::failed(e),
        }
    }

    /// `execute_job` and block for the result.
    pub fn run_job(&self, input: &[u8]) -> Result<Vec<u8>> {
        self.execute_job(input).wait()
    }

    // ── Capabilities ──

    #[inline]
    pub fn capabilities(&self) -> Capabilities {
        self.device.capabilities()
    }

    #[inline]
    pub fn shell_register_count(&self) -> usize {
        self.device.capabilities().shell_registers as usize
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.device.capabilities().buffer_count as usize
    }

    /// Size of each slot's input and output region.
    ///
    /// An input is accepted when its padded length fits, so with a buffer
    /// under 64 bytes nothing is accepted and with an unaligned buffer the
    /// limit is `buffer_size` rounded down to a multiple of 16.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.device.capabilities().buffer_size as usize
    }

    // ── Registers ──
    //
    // Pass-throughs, no caching. Not serialized against each other: two
    // callers doing read-modify-write on the same register can race.

    pub fn pcie_enabled(&self) -> Result<bool> {
        self.device.pcie_enabled()
    }

    pub fn set_pcie_enabled(&self, enabled: bool) -> Result<()> {
        self.device.set_pcie_enabled(enabled)
    }

    pub fn read_shell_register(&self, index: u32) -> Result<u32> {
        self.device.read_shell(index)
    }

    pub fn write_shell_register(&self, index: u32, value: u32) -> Result<()> {
        self.device.write_shell(index, value)
    }

    pub fn read_soft_register(&self, address: u64) -> Result<u64> {
        self.device.read_soft(address)
    }

    pub fn write_soft_register(&self, address: u64, value: u64) -> Result<()> {
        self.device.write_soft(address, value)
    }

    // ── Lifecycle ──

    pub fn stats(&self) -> DispatcherStats {
        self.pool.stats()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Stop the slot workers, then disable PCIe and close the device.
    ///
    /// Running jobs finish first; queued jobs resolve with `Closed`.
    /// Idempotent. Close failures are logged, not returned.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        kinfo!(
            "accel: tearing down dispatcher on endpoint {}",
            self.device.endpoint()
        );
        self.pool.shutdown();
        self.device.close();
        if let Some(sink) = &self.sink {
            klog::remove_sink(sink);
        }
    }
}

impl<D: NativeDriver + 'static> Drop for Dispatcher<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accel_core::klog::LogFlags;
    use accel_core::padding::MIN_MESSAGE_SIZE;
    use accel_core::status::StatusCode;
    use accel_module::mock_driver::{MockConfig, MockDriver, MockOp};
    use std::future::Future;
    use std::sync::Mutex;
    use std::task::{Context, Poll, Wake, Waker};
    use std::thread::{self, Thread};
    use std::time::{Duration, Instant};

    const WAIT: Duration = Duration::from_secs(5);

    fn config() -> DispatcherConfig {
        DispatcherConfig::from_map(&Default::default())
            .unwrap()
            .poll_interval(Duration::from_micros(50))
    }

    fn open(mock: &MockDriver) -> Dispatcher<MockDriver> {
        Dispatcher::with_driver(mock.clone(), &config()).unwrap()
    }

    fn padded(input: &[u8]) -> Vec<u8> {
        accel_core::padding::pad_message(input).into_owned()
    }

    fn block_on<F: Future>(fut: F) -> F::Output {
        struct Unpark(Thread);
        impl Wake for Unpark {
            fn wake(self: Arc<Self>) {
                self.0.unpark();
            }
        }
        let waker = Waker::from(Arc::new(Unpark(thread::current())));
        let mut cx = Context::from_waker(&waker);
        let mut fut = std::pin::pin!(fut);
        loop {
            if let Poll::Ready(out) = fut.as_mut().poll(&mut cx) {
                return out;
            }
            thread::park();
        }
    }

    #[test]
    fn test_open_initializes_config_register() {
        let mock = MockDriver::new(MockConfig::default());
        mock.set_shell_register(CONFIG_REGISTER, 0xF0);
        let d = open(&mock);

        assert_eq!(mock.shell_register(CONFIG_REGISTER), 1);
        assert!(d.pcie_enabled().unwrap());
        assert_eq!(d.buffer_count(), 4);
        assert_eq!(d.buffer_size(), 4096);
        assert_eq!(d.shell_register_count(), 16);
    }

    #[test]
    fn test_open_without_device() {
        let mock = MockDriver::new(MockConfig {
            present: false,
            ..Default::default()
        });
        let err = Dispatcher::with_driver(mock.clone(), &config()).err();
        assert!(matches!(err, Some(AccelError::Connection(_))));
        assert!(!mock.is_open());
    }

    #[test]
    fn test_handle_creation_failure() {
        let mock = MockDriver::new(MockConfig::default());
        mock.fail_next(MockOp::CreateHandle, None, StatusCode::VERSION_MISMATCH);
        let err = Dispatcher::with_driver(mock.clone(), &config()).err();
        assert!(matches!(err, Some(AccelError::Connection(_))));
    }

    #[test]
    fn test_setup_failure_closes_device() {
        let mock = MockDriver::new(MockConfig::default());
        mock.fail_next(MockOp::WriteShell, None, StatusCode::HARDWARE_ERROR);
        let err = Dispatcher::with_driver(mock.clone(), &config()).err();
        assert_eq!(err.and_then(|e| e.status()), Some(StatusCode::HARDWARE_ERROR));
        assert!(!mock.is_open());
        assert_eq!(mock.close_calls(), 1);
    }

    #[test]
    fn test_pcie_toggle() {
        let mock = MockDriver::new(MockConfig::default());
        let d = open(&mock);
        d.write_shell_register(CONFIG_REGISTER, 0b110).unwrap();
        d.set_pcie_enabled(true).unwrap();
        assert_eq!(d.read_shell_register(CONFIG_REGISTER).unwrap(), 0b111);
        d.set_pcie_enabled(false).unwrap();
        assert_eq!(d.read_shell_register(CONFIG_REGISTER).unwrap(), 0b110);
        assert!(!d.pcie_enabled().unwrap());
    }

    #[test]
    fn test_soft_registers_pass_through() {
        let mock = MockDriver::new(MockConfig::default());
        let d = open(&mock);
        d.write_soft_register(0x1000_0040, 0xDEAD_BEEF_0000_0001).unwrap();
        assert_eq!(d.read_soft_register(0x1000_0040).unwrap(), 0xDEAD_BEEF_0000_0001);
    }

    #[test]
    fn test_round_trip() {
        let mock = MockDriver::with_compute(MockConfig::default(), |_, input| {
            input.iter().rev().copied().collect()
        });
        let d = open(&mock);

        let handle = d.execute_job(b"hello");
        assert_eq!(handle.slot(), Some(1));
        let out = handle.wait().unwrap();
        assert_eq!(out.len(), MIN_MESSAGE_SIZE);
        assert_eq!(&out[MIN_MESSAGE_SIZE - 5..], b"olleh");
        assert_eq!(mock.sent(1), vec![padded(b"hello")]);
    }

    #[test]
    fn test_input_length_limits() {
        let mock = MockDriver::new(MockConfig {
            buffer_size: 256,
            ..Default::default()
        });
        let d = open(&mock);

        assert_eq!(d.run_job(&[]).unwrap_err(), AccelError::EmptyInput);
        assert_eq!(
            d.run_job(&[1; 257]).unwrap_err(),
            AccelError::OversizedInput { len: 257, max: 256 }
        );
        assert!((0..4).all(|slot| mock.sent(slot).is_empty()));
        assert_eq!(d.stats().submitted, 0);

        assert_eq!(d.run_job(&[1; 256]).unwrap(), vec![1; 256]);
    }

    #[test]
    fn test_failure_isolated_to_its_slot() {
        let mock = MockDriver::new(MockConfig::default());
        let d = open(&mock);
        let first = d.execute_job(&[1; 64]);
        assert_eq!(first.slot(), Some(1));
        first.wait().unwrap();

        mock.fail_next(MockOp::Send, Some(2), StatusCode::HARDWARE_ERROR);
        mock.hold(0);
        let bad = d.execute_job(&[2; 64]);
        let filler = d.execute_job(&[3; 64]);
        let other = d.execute_job(&[4; 64]);
        assert_eq!(
            (bad.slot(), filler.slot(), other.slot()),
            (Some(2), Some(3), Some(0))
        );
        assert!(mock.wait_until_in_flight(0, WAIT));

        let err = bad.wait().unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::HARDWARE_ERROR));
        assert_eq!(filler.wait().unwrap(), vec![3; 64]);

        // Slot 2 takes new work while slot 0 is still held.
        let r1 = d.execute_job(&[5; 64]);
        let r2 = d.execute_job(&[6; 64]);
        assert_eq!((r1.slot(), r2.slot()), (Some(1), Some(2)));
        assert_eq!(r2.wait().unwrap(), vec![6; 64]);
        assert_eq!(r1.wait().unwrap(), vec![5; 64]);
        assert!(!other.is_finished());

        mock.release(0);
        assert_eq!(other.wait().unwrap(), vec![4; 64]);

        let stats = d.stats();
        assert_eq!(stats.submitted, 6);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 5);
    }

    #[test]
    fn test_status_mapping() {
        let mock = MockDriver::new(MockConfig::default());
        let d = open(&mock);

        mock.fail_next(MockOp::Wait, Some(1), StatusCode::WAIT_TIMEOUT);
        let timed_out = d.execute_job(&[7; 64]);
        assert_eq!(timed_out.slot(), Some(1));
        assert!(timed_out.wait().is_ok());

        mock.fail_next(MockOp::Send, Some(2), StatusCode(42));
        mock.set_last_error(42, "vendor specific");
        let failed = d.execute_job(&[8; 64]);
        assert_eq!(failed.slot(), Some(2));
        match failed.wait() {
            Err(AccelError::DeviceOperation { status, .. }) => assert_eq!(status, StatusCode(42)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_concurrent_jobs_keep_slot_order() {
        let mock = MockDriver::new(MockConfig::default());
        let d = Arc::new(open(&mock));

        let mut expected = vec![Vec::new(); 4];
        let handles: Vec<_> = (0..40u8)
            .map(|i| {
                let input = vec![i; 16 + i as usize];
                let handle = d.execute_job(&input);
                expected[handle.slot().unwrap()].push(padded(&input));
                (input, handle)
            })
            .collect();
        for slot in 0..4 {
            assert!(mock.wait_until_sent(slot as u32, expected[slot].len(), WAIT));
        }
        for (input, handle) in handles {
            assert_eq!(handle.wait().unwrap(), padded(&input));
        }
        for slot in 0..4 {
            assert_eq!(mock.sent(slot as u32), expected[slot]);
        }

        let submitters: Vec<_> = (0..6u8)
            .map(|t| {
                let d = Arc::clone(&d);
                thread::spawn(move || {
                    for i in 0..20u8 {
                        let input = vec![t ^ i; 64];
                        assert_eq!(d.run_job(&input).unwrap(), input);
                    }
                })
            })
            .collect();
        for s in submitters {
            s.join().unwrap();
        }
        assert_eq!(mock.overlaps(), 0);
        assert_eq!(d.stats().queue_depth, vec![0; 4]);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mock = MockDriver::new(MockConfig::default());
        let d = open(&mock);
        d.run_job(&[1; 64]).unwrap();

        d.teardown();
        assert!(d.is_closed());
        assert!(!mock.is_open());
        assert_eq!(mock.shell_register(CONFIG_REGISTER) & 1, 0);
        assert_eq!(mock.close_calls(), 1);

        d.teardown();
        assert_eq!(d.run_job(&[1; 64]).unwrap_err(), AccelError::Closed);
        assert_eq!(d.read_shell_register(0).unwrap_err(), AccelError::Closed);
        drop(d);
        assert_eq!(mock.close_calls(), 1);
    }

    #[test]
    fn test_drop_tears_down() {
        let mock = MockDriver::new(MockConfig::default());
        drop(open(&mock));
        assert!(!mock.is_open());
        assert_eq!(mock.close_calls(), 1);
    }

    #[test]
    fn test_teardown_waits_for_running_job() {
        let mock = MockDriver::new(MockConfig {
            buffer_count: 1,
            ..Default::default()
        });
        let d = Arc::new(open(&mock));
        mock.hold(0);
        let running = d.execute_job(&[1; 64]);
        assert!(mock.wait_until_in_flight(0, WAIT));
        let queued = d.execute_job(&[2; 64]);

        let closer = {
            let d = Arc::clone(&d);
            thread::spawn(move || d.teardown())
        };
        while !d.pool.is_closed() {
            thread::yield_now();
        }
        assert!(mock.is_open());

        mock.release_all();
        closer.join().unwrap();
        assert_eq!(running.wait().unwrap(), vec![1; 64]);
        assert_eq!(queued.wait().unwrap_err(), AccelError::Closed);
        assert!(!mock.is_open());
    }

    #[test]
    fn test_await_job() {
        let mock = MockDriver::new(MockConfig::default());
        let d = open(&mock);
        mock.hold(1);
        let handle = d.execute_job(&[6; 64]);
        let releaser = {
            let mock = mock.clone();
            thread::spawn(move || {
                assert!(mock.wait_until_in_flight(1, WAIT));
                mock.release(1);
            })
        };
        assert_eq!(block_on(handle).unwrap(), vec![6; 64]);
        releaser.join().unwrap();
    }

    type Lines = Arc<Mutex<Vec<(LogFlags, String)>>>;

    fn collecting_sink() -> (Arc<dyn klog::LogSink>, Lines) {
        let lines: Lines = Arc::new(Mutex::new(Vec::new()));
        let sink: Arc<dyn klog::LogSink> = {
            let lines = Arc::clone(&lines);
            Arc::new(move |flags: LogFlags, msg: &str| {
                lines.lock().unwrap().push((flags, msg.to_string()));
            })
        };
        (sink, lines)
    }

    /// A log call that picked the sink up before removal may still hold it.
    fn sole_owner(sink: &Arc<dyn klog::LogSink>) -> bool {
        let deadline = Instant::now() + WAIT;
        while Arc::strong_count(sink) > 1 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::yield_now();
        }
        true
    }

    #[test]
    fn test_log_sink_receives_lifecycle() {
        let (sink, lines) = collecting_sink();
        let mock = MockDriver::new(MockConfig::default());
        let d = Dispatcher::with_driver(mock.clone(), &config().log_sink(sink)).unwrap();
        d.teardown();

        let lines = lines.lock().unwrap();
        assert!(lines
            .iter()
            .any(|(f, m)| *f == LogFlags::INFO && m.contains("dispatcher ready")));
        assert!(lines.iter().any(|(_, m)| m.contains("tearing down")));
    }

    #[test]
    fn test_log_sink_removed_after_teardown() {
        let (sink, lines) = collecting_sink();
        let mock = MockDriver::new(MockConfig::default());
        let d = Dispatcher::with_driver(mock.clone(), &config().log_sink(Arc::clone(&sink)))
            .unwrap();
        d.teardown();
        drop(d);

        kinfo!("accel: line after dispatcher drop");
        assert!(!lines
            .lock()
            .unwrap()
            .iter()
            .any(|(_, m)| m.contains("line after dispatcher drop")));
        assert!(sole_owner(&sink));
    }

    #[test]
    fn test_log_sink_removed_when_open_fails() {
        let (sink, _lines) = collecting_sink();
        let mock = MockDriver::new(MockConfig {
            present: false,
            ..Default::default()
        });
        let cfg = config().log_sink(Arc::clone(&sink));
        assert!(Dispatcher::with_driver(mock.clone(), &cfg).is_err());
        drop(cfg);
        assert!(sole_owner(&sink));

        let (sink, _lines) = collecting_sink();
        let mock = MockDriver::new(MockConfig::default());
        mock.fail_next(MockOp::CreateHandle, None, StatusCode::DRIVER_ERROR);
        let cfg = config().log_sink(Arc::clone(&sink));
        assert!(Dispatcher::with_driver(mock, &cfg).is_err());
        drop(cfg);
        assert!(sole_owner(&sink));
    }

    #[test]
    fn test_admission_uses_padded_length() {
        let mock = MockDriver::new(MockConfig {
            buffer_size: 100,
            ..Default::default()
        });
        let d = open(&mock);

        // 97 bytes pad to 112.
        assert_eq!(
            d.run_job(&[1; 97]).unwrap_err(),
            AccelError::OversizedInput { len: 97, max: 100 }
        );
        assert!((0..4).all(|slot| mock.polls(slot) == 0 && mock.sent(slot).is_empty()));
        assert_eq!(d.stats().submitted, 0);

        assert_eq!(d.run_job(&[1; 96]).unwrap(), vec![1; 96]);
    }

    #[test]
    fn test_buffer_below_minimum_message_admits_nothing() {
        let mock = MockDriver::new(MockConfig {
            buffer_size: 40,
            ..Default::default()
        });
        let d = open(&mock);
        assert_eq!(
            d.run_job(&[1; 8]).unwrap_err(),
            AccelError::OversizedInput { len: 8, max: 40 }
        );
        assert!((0..4).all(|slot| mock.polls(slot) == 0));
    }

    #[test]
    fn test_teardown_survives_close_failure() {
        let mock = MockDriver::new(MockConfig::default());
        let d = open(&mock);
        d.run_job(&[1; 64]).unwrap();

        mock.fail_next(MockOp::CloseHandle, None, StatusCode::HARDWARE_ERROR);
        d.teardown();
        assert!(d.is_closed());
        assert_eq!(mock.shell_register(CONFIG_REGISTER) & 1, 0);
        // The failed close never reached the device.
        assert_eq!(mock.close_calls(), 0);
        assert_eq!(d.run_job(&[1; 64]).unwrap_err(), AccelError::Closed);

        drop(d);
        assert_eq!(mock.close_calls(), 0);
    }

    #[test]
    fn test_teardown_survives_pcie_disable_failure() {
        let mock = MockDriver::new(MockConfig::default());
        let d = open(&mock);

        mock.fail_next(MockOp::WriteShell, None, StatusCode::HARDWARE_ERROR);
        d.teardown();
        assert!(d.is_closed());
        assert!(!mock.is_open());
        assert_eq!(mock.close_calls(), 1);
        assert_eq!(mock.shell_register(CONFIG_REGISTER) & 1, 1);
        assert_eq!(d.pcie_enabled().unwrap_err(), AccelError::Closed);
    }
}
