use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::ProvisioningConfig;
use crate::contract::ProvisioningContract;
use crate::error::{ArgumentError, ProvisioningError};
use crate::result::{completion_channel, RegistrationResult};
use crate::security::SecurityProvider;
use crate::task::ProvisioningTask;

/// Client for registering a device with the device provisioning service
#[derive(Clone)]
pub struct ProvisioningDeviceClient {
    config: Arc<ProvisioningConfig>,
    contract: Arc<dyn ProvisioningContract>,
    security_provider: SecurityProvider,
}

impl fmt::Debug for ProvisioningDeviceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningDeviceClient")
            .field("config", &self.config)
            .field("security_provider", &self.security_provider)
            .finish_non_exhaustive()
    }
}

impl ProvisioningDeviceClient {
    /// Create a new provisioning client
    ///
    /// # Arguments
    ///
    /// * `config` - The id scope, endpoint and wait bounds to register with
    /// * `contract` - The transport contract that talks to the service
    /// * `security_provider` - The device identity to attest with
    pub fn new(
        config: ProvisioningConfig,
        contract: Arc<dyn ProvisioningContract>,
        security_provider: SecurityProvider,
    ) -> Self {
        Self {
            config: Arc::new(config),
            contract,
            security_provider,
        }
    }

    /// Start registering the device in the background; `callback` receives the
    /// outcome exactly once
    ///
    /// Must be called from within a tokio runtime.
    pub fn register_device<F>(
        &self,
        callback: F,
    ) -> crate::Result<JoinHandle<Result<(), ArgumentError>>>
    where
        F: FnOnce(RegistrationResult, Option<ProvisioningError>) + Send + 'static,
    {
        let task = self.task().on_registration_complete(callback).build()?;
        Ok(tokio::spawn(async move { task.call().await }))
    }

    /// Register the device and wait for the outcome
    ///
    /// # Example
    /// ```no_run
    /// use std::sync::Arc;
    /// use azure_iot_provisioning::{
    ///     ProvisioningConfig, ProvisioningContract, ProvisioningDeviceClient, SecurityProvider,
    ///     SymmetricKeyProvider,
    /// };
    ///
    /// async fn register(contract: Arc<dyn ProvisioningContract>) -> azure_iot_provisioning::Result<()> {
    ///     let provider = SymmetricKeyProvider::new(
    ///         "my-device",
    ///         "O+H9VTcdJP0Tqkl7bh4nVG0OJNrAataMpuWB54D0VEc=",
    ///     )?;
    ///     let client = ProvisioningDeviceClient::new(
    ///         ProvisioningConfig::new("0ne000EEBBD")?,
    ///         contract,
    ///         SecurityProvider::symmetric_key(provider),
    ///     );
    ///
    ///     let result = client.register().await?;
    ///     println!("{:?} assigned to {:?}", result.device_id(), result.iothub_uri());
    ///     Ok(())
    /// }
    /// ```
    pub async fn register(&self) -> crate::Result<RegistrationResult> {
        let (callback, completion) = completion_channel();
        let task = self.task().on_registration_complete(callback).build()?;
        task.call().await?;

        completion
            .await
            .map_err(|e| ProvisioningError::Task(e.to_string()))?
            .into_result()
    }

    fn task(&self) -> crate::task::ProvisioningTaskBuilder {
        ProvisioningTask::builder()
            .config(self.config.clone())
            .contract(self.contract.clone())
            .security_provider(self.security_provider.clone())
    }
}
