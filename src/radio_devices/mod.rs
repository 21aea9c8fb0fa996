//! Radio device implementations
//!
//! One implementation per target radio family, selected by feature:
//!
//! - `mock`: in-process medium connecting several endpoints, mirroring the
//!   vendor driver's peer-registration and single-completion behavior; used
//!   by the test suite and host-side integration work
//! - `echo`: loops every transmitted frame straight back as a reception;
//!   useful for exercising an application without a second node

#[cfg(feature = "radio-device-mock")]
pub mod mock;

#[cfg(feature = "radio-device-echo")]
pub mod echo;

// Re-export the active radio device implementation
#[cfg(feature = "radio-device-mock")]
pub use mock::{MockMedium, RadioDevice};
#[cfg(feature = "radio-device-mock")]
pub(crate) use mock::radio_device_task;

#[cfg(feature = "radio-device-echo")]
pub use echo::RadioDevice;
#[cfg(feature = "radio-device-echo")]
pub(crate) use echo::radio_device_task;
