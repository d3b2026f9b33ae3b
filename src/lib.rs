//! Azure IoT device provisioning client for writing iot device code in rust
//!
//! Registers a device with the Azure IoT Hub device provisioning service and reports
//! the hub and device id it was assigned. The device attests with an X.509
//! certificate, a TPM or a symmetric key, see [`SecurityProvider`]. The wire
//! protocol is left to a [`ProvisioningContract`] implementation.
//!
//! # Examples
//!
//! Registering with a symmetric key
//! ```no_run
//! use std::sync::Arc;
//! use azure_iot_provisioning::{
//!     ProvisioningConfig, ProvisioningContract, ProvisioningDeviceClient, SecurityProvider,
//!     SymmetricKeyProvider,
//! };
//!
//! # fn contract() -> Arc<dyn ProvisioningContract> { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> azure_iot_provisioning::Result<()> {
//!     let config = ProvisioningConfig::load("provisioning")?;
//!     let provider = SymmetricKeyProvider::new("MyDeviceId", "TheDeviceKey")?;
//!
//!     let client = ProvisioningDeviceClient::new(
//!         config,
//!         contract(),
//!         SecurityProvider::symmetric_key(provider),
//!     );
//!
//!     client
//!         .register_device(|result, error| match error {
//!             None => println!("Assigned to {:?}", result.iothub_uri()),
//!             Some(e) => eprintln!("Registration ended with {:?}: {}", result.status(), e),
//!         })?
//!         .await
//!         .ok();
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms, missing_docs)]

#[macro_use]
extern crate log;

/// Provisioning client package version
pub const SDK_VERSION: &str = std::env!("CARGO_PKG_VERSION");

/// Session secrets of one registration attempt
pub mod authorization;
/// The provisioning device client
pub mod client;
/// Client configuration
pub mod config;
/// Transport contract with the provisioning service
pub mod contract;
/// Errors
pub mod error;
/// Provisioning service models
#[allow(missing_docs)]
pub mod model;
/// Registration outcome
pub mod result;
/// Device identity providers
pub mod security;
/// Registration state machine
pub mod task;
/// SAS token generation
pub mod token;

pub use authorization::Authorization;
pub use client::ProvisioningDeviceClient;
pub use config::{ProvisioningConfig, ProvisioningTimeouts, DEFAULT_GLOBAL_ENDPOINT};
pub use contract::{ContractState, ProvisioningContract, RequestData, ResponseCallback, ResponseData};
pub use error::{
    ArgumentError, ContractError, ParseError, ProvisioningError, Result, SecurityError,
};
pub use model::ProvisioningStatus;
pub use result::{
    completion_channel, ProvisioningDeviceStatus, RegistrationCallback, RegistrationCompletion,
    RegistrationResult,
};
pub use security::{SecurityProvider, SymmetricKeyProvider, TlsContext, TpmProvider, X509Provider};
pub use task::{ProvisioningTask, ProvisioningTaskBuilder, RegisterTask, Registration, StatusTask};
