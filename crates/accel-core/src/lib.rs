//! # accel-core — Types and traits for accelerator job dispatch
//!
//! This crate defines the boundary between the dispatcher and the vendor
//! driver, plus the small pieces of shared vocabulary every other crate
//! speaks: status codes, errors, the message padding rule, and logging.
//!
//! ## Design principle
//!
//! > "Program to the interface. Start safe. Optimize with a new impl,
//! >  not by modifying the existing one."
//!
//! The executor never names a concrete driver. Swapping the real shared
//! library for the in-process mock is a type parameter change.
//!
//! ## Modules
//!
//! - `driver` - `NativeDriver` trait and raw handle type
//! - `status` - native status codes and their classification
//! - `error` - `AccelError` and the crate `Result`
//! - `padding` - minimum-size / 16-byte alignment codec
//! - `klog` - leveled log macros with a pluggable sink

pub mod driver;
pub mod status;
pub mod error;
pub mod padding;
pub mod klog;

pub use driver::{NativeDriver, OpenParams, RawHandle};
pub use error::{AccelError, Result};
pub use klog::{LogFlags, LogSink};
pub use status::{StatusClass, StatusCode};

/// Device-level constants.
pub mod constants {
    /// Endpoint id the dispatcher binds its handle to.
    pub const DEFAULT_ENDPOINT: u32 = 0;

    /// Shell register holding transport configuration.
    pub const CONFIG_REGISTER: u32 = 0;

    /// Bit in `CONFIG_REGISTER` gating host/device PCIe transport.
    pub const PCIE_ENABLE_MASK: u32 = 1 << 0;
}
