use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::authorization::Authorization;
use crate::config::ProvisioningConfig;
use crate::contract::{ProvisioningContract, RequestData};
use crate::error::{ArgumentError, ParseError, ProvisioningError};
use crate::model::{ProvisioningStatus, RegistrationOperationStatus};
use crate::result::{ProvisioningDeviceStatus, RegistrationCallback, RegistrationResult};
use crate::security::SecurityProvider;
use crate::task::pool::WorkerPool;
use crate::task::register::{RegisterTask, Registration};
use crate::task::status::StatusTask;

const WORKER_POOL_SIZE: usize = 2;

/// Drives one device registration from the first authentication to a terminal
/// status and reports the outcome to the registration callback exactly once
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use azure_iot_provisioning::{
///     completion_channel, ProvisioningConfig, ProvisioningContract, ProvisioningTask,
///     SecurityProvider,
/// };
///
/// async fn provision(
///     contract: Arc<dyn ProvisioningContract>,
///     provider: SecurityProvider,
/// ) -> azure_iot_provisioning::Result<()> {
///     let (callback, completion) = completion_channel();
///     let task = ProvisioningTask::builder()
///         .config(ProvisioningConfig::new("0ne000EEBBD")?)
///         .contract(contract)
///         .security_provider(provider)
///         .on_registration_complete(callback)
///         .build()?;
///
///     task.call().await?;
///
///     if let Ok(completion) = completion.await {
///         let result = completion.into_result()?;
///         println!("Assigned to {:?}", result.iothub_uri());
///     }
///     Ok(())
/// }
/// ```
pub struct ProvisioningTask {
    callback: Mutex<Option<RegistrationCallback>>,
    attempt: Arc<Attempt>,
}

impl fmt::Debug for ProvisioningTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningTask")
            .field("config", &self.attempt.config)
            .field("security_provider", &self.attempt.security_provider)
            .field("pool", &self.attempt.pool)
            .field("closed", &self.attempt.closed)
            .finish_non_exhaustive()
    }
}

impl ProvisioningTask {
    /// Get a builder for the provisioning task
    pub fn builder() -> ProvisioningTaskBuilder {
        ProvisioningTaskBuilder::default()
    }

    /// Register the device and invoke the registration callback with the outcome
    ///
    /// Every failure along the way is delivered through the callback; the task is
    /// closed before this returns. Only a repeated call fails, with
    /// [`ArgumentError::CallbackConsumed`].
    ///
    /// The registration runs on its own tokio task. Dropping the returned future
    /// does not cancel it: the callback still fires once and the task is closed.
    pub async fn call(&self) -> Result<(), ArgumentError> {
        let Some(callback) = self.take_callback() else {
            warn!("Provisioning task was already called, ignoring");
            return Err(ArgumentError::CallbackConsumed);
        };

        let attempt = self.attempt.clone();
        let registration = tokio::spawn(async move {
            let (result, error) = match attempt.provision().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!("Registration did not complete: {}", e);
                    (RegistrationResult::empty(ProvisioningDeviceStatus::Error), Some(e))
                }
            };

            callback(result, error);
            attempt.close().await;
        });

        if let Err(e) = registration.await {
            warn!("Registration task did not run to completion: {}", e);
        }

        Ok(())
    }

    /// Close the transport contract and shut the worker pool down, aborting
    /// outstanding work. Closing twice is a no-op.
    pub async fn close(&self) {
        self.attempt.close().await;
    }

    /// Whether the task has been closed
    pub fn is_closed(&self) -> bool {
        self.attempt.is_closed()
    }

    fn take_callback(&self) -> Option<RegistrationCallback> {
        match self.callback.lock() {
            Ok(mut callback) => callback.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// State shared between a [`ProvisioningTask`] and the registration it spawned
struct Attempt {
    config: Arc<ProvisioningConfig>,
    contract: Arc<dyn ProvisioningContract>,
    security_provider: SecurityProvider,
    pool: WorkerPool,
    closed: AtomicBool,
}

impl Attempt {
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.contract.close().await {
            warn!("Could not close the provisioning contract: {}", e);
        }
        self.pool.close().await;
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) && self.pool.is_shutdown()
    }

    async fn provision(&self) -> crate::Result<(RegistrationResult, Option<ProvisioningError>)> {
        let timeouts = self.config.timeouts();
        let registration_id = self.security_provider.registration_id()?;

        let mut request = RequestData::new(registration_id)
            .with_global_endpoint(self.config.global_endpoint())
            .with_id_scope(self.config.id_scope())
            .with_x509(self.security_provider.is_x509())
            .with_payload(self.config.custom_payload().cloned());
        if let Some(tls_context) = self.security_provider.tls_context() {
            request = request.with_tls_context(tls_context);
        }
        self.contract.open(&request).await?;

        let register = RegisterTask::new(
            self.config.clone(),
            self.security_provider.clone(),
            self.contract.clone(),
            Authorization::new(),
        );
        let Registration {
            mut status,
            authorization,
        } = self
            .pool
            .run(timeouts.register_task(), "register task", register.call())
            .await?;

        loop {
            debug!(
                "Registration operation {} is {}",
                status.operation_id, status.status
            );

            match status.status {
                ProvisioningStatus::Unassigned | ProvisioningStatus::Assigning => {
                    tokio::time::sleep(self.contract.retry_interval()).await;

                    let poll = StatusTask::new(
                        self.security_provider.clone(),
                        self.contract.clone(),
                        &status.operation_id,
                        authorization.clone(),
                        timeouts.status_response(),
                    )?;
                    status = self
                        .pool
                        .run(timeouts.status_task(), "status task", poll.call())
                        .await?;
                }
                ProvisioningStatus::Assigned => {
                    return Ok((self.assigned(status)?, None));
                }
                ProvisioningStatus::Failed => {
                    return Ok((
                        RegistrationResult::empty(ProvisioningDeviceStatus::Failed),
                        Some(hub_error(status)),
                    ));
                }
                ProvisioningStatus::Disabled => {
                    return Ok((
                        RegistrationResult::empty(ProvisioningDeviceStatus::Disabled),
                        Some(hub_error(status)),
                    ));
                }
            }
        }
    }

    fn assigned(&self, status: RegistrationOperationStatus) -> crate::Result<RegistrationResult> {
        let state = status.registration_state.ok_or_else(|| {
            ProvisioningError::Protocol("assigned status carries no registration state".to_string())
        })?;

        let Some(iothub_uri) = non_empty(&state.assigned_hub) else {
            return Err(ProvisioningError::Protocol("assigned hub is missing".to_string()));
        };
        let Some(device_id) = non_empty(&state.device_id) else {
            return Err(ProvisioningError::Protocol("device id is missing".to_string()));
        };

        let authentication_key = match &self.security_provider {
            SecurityProvider::Tpm(provider) => {
                let key = state
                    .tpm
                    .as_ref()
                    .and_then(|tpm| non_empty(&tpm.authentication_key))
                    .ok_or_else(|| {
                        ProvisioningError::Protocol(
                            "authentication key is missing for the TPM".to_string(),
                        )
                    })?;
                let key = base64::decode(&key)
                    .map_err(|e| ParseError::Base64("tpm.authenticationKey", e))?;
                provider.activate_identity_key(&key)?;
                Some(key)
            }
            _ => None,
        };

        debug!("Device {} assigned to {}", device_id, iothub_uri);

        Ok(RegistrationResult::assigned(
            &state,
            iothub_uri,
            device_id,
            authentication_key,
        ))
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|value| !value.is_empty()).cloned()
}

fn hub_error(status: RegistrationOperationStatus) -> ProvisioningError {
    match status.registration_state {
        Some(state) => {
            let message = match state.error_message {
                Some(message) => message,
                None => format!("registration {}", state.status),
            };
            ProvisioningError::Hub {
                message,
                error_code: state.error_code,
            }
        }
        None => ProvisioningError::Hub {
            message: format!("registration {}", status.status),
            error_code: None,
        },
    }
}

/// Builder for a [`ProvisioningTask`]
#[derive(Default)]
pub struct ProvisioningTaskBuilder {
    config: Option<Arc<ProvisioningConfig>>,
    contract: Option<Arc<dyn ProvisioningContract>>,
    security_provider: Option<SecurityProvider>,
    callback: Option<RegistrationCallback>,
}

impl fmt::Debug for ProvisioningTaskBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningTaskBuilder")
            .field("config", &self.config)
            .field("contract", &self.contract.is_some())
            .field("security_provider", &self.security_provider)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl ProvisioningTaskBuilder {
    /// Set the provisioning config
    pub fn config<C>(mut self, config: C) -> Self
    where
        C: Into<Arc<ProvisioningConfig>>,
    {
        self.config = Some(config.into());
        self
    }

    /// Set the transport contract
    pub fn contract(mut self, contract: Arc<dyn ProvisioningContract>) -> Self {
        self.contract = Some(contract);
        self
    }

    /// Set the security provider holding the device identity
    pub fn security_provider(mut self, security_provider: SecurityProvider) -> Self {
        self.security_provider = Some(security_provider);
        self
    }

    /// Set the callback receiving the registration outcome
    pub fn on_registration_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(RegistrationResult, Option<ProvisioningError>) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Build the provisioning task
    pub fn build(self) -> Result<ProvisioningTask, ArgumentError> {
        let Some(config) = self.config else {
            return Err(ArgumentError::UninitializedField("config"));
        };

        let Some(contract) = self.contract else {
            return Err(ArgumentError::UninitializedField("contract"));
        };

        let Some(security_provider) = self.security_provider else {
            return Err(ArgumentError::UninitializedField("security_provider"));
        };

        let Some(callback) = self.callback else {
            return Err(ArgumentError::UninitializedField("registration_callback"));
        };

        Ok(ProvisioningTask {
            callback: Mutex::new(Some(callback)),
            attempt: Arc::new(Attempt {
                config,
                contract,
                security_provider,
                pool: WorkerPool::new(WORKER_POOL_SIZE),
                closed: AtomicBool::new(false),
            }),
        })
    }
}
