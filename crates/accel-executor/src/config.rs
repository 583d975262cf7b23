//! Dispatcher configuration
//!
//! Compile-time defaults with runtime environment overrides, plus a
//! string-map constructor for callers that carry configuration as
//! key/value pairs.
//!
//! # Example
//!
//! ```rust,ignore
//! use accel_executor::config::DispatcherConfig;
//!
//! let config = DispatcherConfig::from_env()
//!     .library_path("/opt/fpga/lib/libFPGACoreLib.so")
//!     .poll_interval(Duration::from_micros(250));
//! ```

use std::collections::HashMap;
use std::ffi::CString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use accel_core::error::{AccelError, Result};
use accel_core::klog::LogSink;
use accel_core::kwarn;

pub mod defaults {
    pub use accel_core::constants::DEFAULT_ENDPOINT as ENDPOINT;
    pub use accel_module::accel_sys::DEFAULT_LIBRARY as LIBRARY_PATH;

    /// Readiness poll interval.
    pub const POLL_INTERVAL_US: u64 = 1_000;
}

/// Keys accepted by `DispatcherConfig::from_map`.
pub mod keys {
    pub const LIBRARY_PATH: &str = "library_path";
    pub const VERSION_DEFINITIONS_FILE: &str = "version_definitions_file";
    pub const VERSION_MANIFEST_FILE: &str = "version_manifest_file";
    pub const ENDPOINT: &str = "endpoint";
    pub const POLL_INTERVAL_US: &str = "poll_interval_us";
}

#[derive(Clone)]
pub struct DispatcherConfig {
    /// Vendor driver shared library.
    pub library_path: PathBuf,
    /// Version definitions file; driver default when `None`.
    pub version_definitions_file: Option<PathBuf>,
    /// Version manifest file; driver default when `None`.
    pub version_manifest_file: Option<PathBuf>,
    /// Endpoint the device handle is bound to.
    pub endpoint: u32,
    /// Sleep between "input buffer full" polls.
    pub poll_interval: Duration,
    /// Receives dispatcher and driver log lines; stderr when `None`.
    pub log_sink: Option<Arc<dyn LogSink>>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DispatcherConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `ACCEL_LIBRARY_PATH` - Driver shared library
    /// - `ACCEL_VERSION_DEFINITIONS` - Version definitions file
    /// - `ACCEL_VERSION_MANIFEST` - Version manifest file
    /// - `ACCEL_ENDPOINT` - Endpoint id
    /// - `ACCEL_POLL_INTERVAL_US` - Readiness poll interval in microseconds
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `from_env` over an arbitrary variable source.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            library_path: env_get_opt::<PathBuf>(&lookup, "ACCEL_LIBRARY_PATH")
                .unwrap_or_else(|| PathBuf::from(defaults::LIBRARY_PATH)),
            version_definitions_file: env_get_opt(&lookup, "ACCEL_VERSION_DEFINITIONS"),
            version_manifest_file: env_get_opt(&lookup, "ACCEL_VERSION_MANIFEST"),
            endpoint: env_get(&lookup, "ACCEL_ENDPOINT", defaults::ENDPOINT),
            poll_interval: Duration::from_micros(env_get(
                &lookup,
                "ACCEL_POLL_INTERVAL_US",
                defaults::POLL_INTERVAL_US,
            )),
            log_sink: None,
        }
    }

    /// Build from a generic key/value map. Missing keys take library
    /// defaults (not environment values); unknown keys are logged and ignored.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self {
            library_path: PathBuf::from(defaults::LIBRARY_PATH),
            version_definitions_file: None,
            version_manifest_file: None,
            endpoint: defaults::ENDPOINT,
            poll_interval: Duration::from_micros(defaults::POLL_INTERVAL_US),
            log_sink: None,
        };

        for (key, value) in map {
            match key.as_str() {
                keys::LIBRARY_PATH => config.library_path = PathBuf::from(value),
                keys::VERSION_DEFINITIONS_FILE => {
                    config.version_definitions_file = non_empty_path(value)
                }
                keys::VERSION_MANIFEST_FILE => config.version_manifest_file = non_empty_path(value),
                keys::ENDPOINT => config.endpoint = parse_value(key, value)?,
                keys::POLL_INTERVAL_US => {
                    config.poll_interval = Duration::from_micros(parse_value(key, value)?)
                }
                other => kwarn!("accel: ignoring unknown config key '{}'", other),
            }
        }
        Ok(config)
    }

    pub fn library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = path.into();
        self
    }

    pub fn version_definitions_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.version_definitions_file = Some(path.into());
        self
    }

    pub fn version_manifest_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.version_manifest_file = Some(path.into());
        self
    }

    pub fn endpoint(mut self, endpoint: u32) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }
}

impl fmt::Debug for DispatcherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherConfig")
            .field("library_path", &self.library_path)
            .field("version_definitions_file", &self.version_definitions_file)
            .field("version_manifest_file", &self.version_manifest_file)
            .field("endpoint", &self.endpoint)
            .field("poll_interval", &self.poll_interval)
            .field("log_sink", &self.log_sink.is_some())
            .finish()
    }
}

/// Path as a C string for the driver.
pub(crate) fn path_to_cstring(path: &Path) -> Result<CString> {
    CString::new(path_bytes(path)?)
        .map_err(|_| AccelError::Config(format!("path contains NUL: {}", path.display())))
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Result<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;
    Ok(path.as_os_str().as_bytes().to_vec())
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Result<Vec<u8>> {
    path.to_str()
        .map(|s| s.as_bytes().to_vec())
        .ok_or_else(|| AccelError::Config(format!("non-UTF-8 path {}", path.display())))
}

fn non_empty_path(value: &str) -> Option<PathBuf> {
    if value.trim().is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AccelError::Config(format!("{} = '{}' is not a valid value", key, value)))
}

#[inline]
fn env_get<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    env_get_opt(lookup, key).unwrap_or(default)
}

#[inline]
fn env_get_opt<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.parse().ok())
}
