//! # accel-module — Default (safe) implementations
//!
//! Everything between the `NativeDriver` trait and the job executor:
//! loading the vendor library, verifying status codes, register access,
//! bounded buffer views, and the `Device` that owns the native handle.
//!
//! ## Default stack
//!
//! | Concern          | Default Impl   | Alternative                 |
//! |------------------|----------------|-----------------------------|
//! | NativeDriver     | DylibDriver    | MockDriver (mock, tests)    |
//! | Status funnel    | verifier       |                             |
//! | Register access  | registers      |                             |
//! | Buffer access    | BufferView     |                             |
//! | Handle ownership | Device         |                             |

pub mod accel_sys;
#[cfg(unix)]
pub mod dylib_driver;
pub mod verifier;
pub mod buffer_view;
pub mod device;
pub mod registers;
#[cfg(any(test, feature = "mock"))]
pub mod mock_driver;

pub use buffer_view::BufferView;
pub use device::{Capabilities, Device, Session};
#[cfg(unix)]
pub use dylib_driver::DylibDriver;
#[cfg(any(test, feature = "mock"))]
pub use mock_driver::{MockConfig, MockDriver, MockOp};
