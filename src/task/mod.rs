//! The registration state machine: a register task authenticates the device, status
//! tasks poll the operation it started, and the provisioning task sequences them on
//! a small worker pool until the service reports a terminal status.

pub(crate) mod pool;
/// First registration request
pub mod register;
/// Operation status polling
pub mod status;
/// The orchestrating state machine
pub mod provisioning;

pub use provisioning::{ProvisioningTask, ProvisioningTaskBuilder};
pub use register::{RegisterTask, Registration};
pub use status::StatusTask;
