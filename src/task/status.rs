use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::authorization::Authorization;
use crate::contract::{response_channel, ProvisioningContract, RequestData};
use crate::error::{ArgumentError, ProvisioningError, SecurityError};
use crate::model::{parse_operation_status, RegistrationOperationStatus};
use crate::security::SecurityProvider;

/// Polls the status of a registration operation once
pub struct StatusTask {
    security_provider: SecurityProvider,
    contract: Arc<dyn ProvisioningContract>,
    operation_id: String,
    authorization: Authorization,
    response_wait: Duration,
}

impl fmt::Debug for StatusTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusTask")
            .field("operation_id", &self.operation_id)
            .field("response_wait", &self.response_wait)
            .finish_non_exhaustive()
    }
}

impl StatusTask {
    /// Create a status task for `operation_id`, waiting at most `response_wait`
    /// for the contract to answer
    pub fn new<T>(
        security_provider: SecurityProvider,
        contract: Arc<dyn ProvisioningContract>,
        operation_id: T,
        authorization: Authorization,
        response_wait: Duration,
    ) -> Result<Self, ArgumentError>
    where
        T: ToString,
    {
        let operation_id = operation_id.to_string();
        if operation_id.is_empty() {
            return Err(ArgumentError::Empty("operation_id"));
        }

        Ok(Self {
            security_provider,
            contract,
            operation_id,
            authorization,
            response_wait,
        })
    }

    /// Query the current status of the operation
    pub async fn call(self) -> crate::Result<RegistrationOperationStatus> {
        let registration_id = self.security_provider.registration_id()?;
        let tls_context = self
            .authorization
            .tls_context()
            .cloned()
            .ok_or(SecurityError::MissingTlsContext)?;

        let mut request = RequestData::new(registration_id)
            .with_operation_id(self.operation_id)
            .with_tls_context(tls_context)
            .with_x509(self.security_provider.is_x509());
        if let Some(sas_token) = self.authorization.sas_token() {
            request = request.with_sas_token(sas_token.to_string());
        }

        let (callback, waiter) = response_channel();
        self.contract
            .get_registration_status(&request, callback)
            .await?;

        let response = waiter.wait(self.response_wait).await;
        let body = response
            .received_body()
            .ok_or(ProvisioningError::StatusNotReceived)?;
        trace!("Status response of {} bytes", body.len());

        parse_operation_status(body)
    }
}
