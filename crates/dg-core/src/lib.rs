//! Shared types and errors for the device-grid workspace.

pub mod error;
pub mod types;

pub use error::GridError;
pub use types::{Allocation, AppBuild, Device, DevicePool, OutputFormat, Ticket};
