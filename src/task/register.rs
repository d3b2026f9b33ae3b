use std::fmt;
use std::sync::Arc;

use crate::authorization::Authorization;
use crate::config::ProvisioningConfig;
use crate::contract::{response_channel, ProvisioningContract, RequestData};
use crate::error::{ProvisioningError, SecurityError};
use crate::model::{parse_operation_status, RegistrationOperationStatus, TpmNonceResponse};
use crate::security::{SecurityProvider, SymmetricKeyProvider, TpmProvider, X509Provider};
use crate::token;

/// First registration status together with the authorization that obtained it
#[derive(Debug)]
pub struct Registration {
    /// Status returned by the service
    pub status: RegistrationOperationStatus,
    /// Session secrets for the status polls that follow
    pub authorization: Authorization,
}

/// Authenticates the device with the provisioning service and returns the first
/// registration status
///
/// The task takes ownership of the attempt's [`Authorization`] while it fills it in
/// and hands it back inside the returned [`Registration`].
pub struct RegisterTask {
    config: Arc<ProvisioningConfig>,
    security_provider: SecurityProvider,
    contract: Arc<dyn ProvisioningContract>,
    authorization: Authorization,
}

impl fmt::Debug for RegisterTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterTask")
            .field("id_scope", &self.config.id_scope())
            .field("security_provider", &self.security_provider)
            .finish_non_exhaustive()
    }
}

impl RegisterTask {
    /// Create a register task for one provisioning attempt
    pub fn new(
        config: Arc<ProvisioningConfig>,
        security_provider: SecurityProvider,
        contract: Arc<dyn ProvisioningContract>,
        authorization: Authorization,
    ) -> Self {
        Self {
            config,
            security_provider,
            contract,
            authorization,
        }
    }

    /// Run the authentication handshake of the configured attestation mechanism
    pub async fn call(mut self) -> crate::Result<Registration> {
        let registration_id = self.security_provider.registration_id()?;

        let status = match self.security_provider.clone() {
            SecurityProvider::X509(provider) => {
                debug!("Registering {} with X.509 attestation", registration_id);
                self.register_x509(&registration_id, provider.as_ref())
                    .await?
            }
            SecurityProvider::Tpm(provider) => {
                debug!("Registering {} with TPM attestation", registration_id);
                self.register_tpm(&registration_id, provider.as_ref())
                    .await?
            }
            SecurityProvider::SymmetricKey(provider) => {
                debug!("Registering {} with symmetric key attestation", registration_id);
                self.register_symmetric_key(&registration_id, provider.as_ref())
                    .await?
            }
        };

        debug!(
            "Registration of {} answered with status {} (operation {})",
            registration_id, status.status, status.operation_id
        );

        Ok(Registration {
            status,
            authorization: self.authorization,
        })
    }

    async fn register_x509(
        &mut self,
        registration_id: &str,
        provider: &dyn X509Provider,
    ) -> crate::Result<RegistrationOperationStatus> {
        let tls_context = provider
            .tls_context()
            .ok_or(SecurityError::MissingTlsContext)?;
        self.authorization.set_tls_context(tls_context.clone());

        let request = self
            .request(registration_id)
            .with_tls_context(tls_context)
            .with_x509(true);

        self.authenticate(&request).await
    }

    async fn register_tpm(
        &mut self,
        registration_id: &str,
        provider: &dyn TpmProvider,
    ) -> crate::Result<RegistrationOperationStatus> {
        let (endorsement_key, storage_root_key) =
            match (provider.endorsement_key(), provider.storage_root_key()) {
                (Some(ek), Some(srk)) if !ek.is_empty() && !srk.is_empty() => (ek, srk),
                _ => {
                    return Err(ProvisioningError::Authentication(
                        "TPM endorsement key and storage root key are required".to_string(),
                    ))
                }
            };

        let tls_context = provider
            .tls_context()
            .ok_or(SecurityError::MissingTlsContext)?;
        self.authorization.set_tls_context(tls_context.clone());

        let request = self
            .request(registration_id)
            .with_tls_context(tls_context)
            .with_tpm_keys(endorsement_key, storage_root_key);

        let (callback, waiter) = response_channel();
        self.contract
            .request_nonce_for_tpm(&request, callback)
            .await?;
        let response = waiter
            .wait(self.config.timeouts().registration_response())
            .await;
        let body = response.received_body().ok_or_else(|| {
            ProvisioningError::Authentication(
                "no nonce received from the provisioning service".to_string(),
            )
        })?;

        let authentication_key = TpmNonceResponse::decode_key(body)?;
        if authentication_key.is_empty() {
            return Err(ProvisioningError::Authentication(
                "authentication key returned for the TPM is empty".to_string(),
            ));
        }
        provider.activate_identity_key(&authentication_key)?;

        let sas_token = self.sas_token(registration_id, |data| provider.sign_with_identity(data))?;
        self.authorization.set_sas_token(sas_token.clone());

        self.authenticate(&request.with_sas_token(sas_token)).await
    }

    async fn register_symmetric_key(
        &mut self,
        registration_id: &str,
        provider: &SymmetricKeyProvider,
    ) -> crate::Result<RegistrationOperationStatus> {
        let tls_context = self
            .security_provider
            .tls_context()
            .ok_or(SecurityError::MissingTlsContext)?;
        self.authorization.set_tls_context(tls_context.clone());

        let sas_token = self.sas_token(registration_id, |data| provider.sign(data))?;
        self.authorization.set_sas_token(sas_token.clone());

        let request = self
            .request(registration_id)
            .with_tls_context(tls_context)
            .with_sas_token(sas_token);

        self.authenticate(&request).await
    }

    fn request(&self, registration_id: &str) -> RequestData {
        RequestData::new(registration_id)
            .with_global_endpoint(self.config.global_endpoint())
            .with_id_scope(self.config.id_scope())
            .with_payload(self.config.custom_payload().cloned())
    }

    fn sas_token<F>(&self, registration_id: &str, sign: F) -> crate::Result<String>
    where
        F: FnOnce(&[u8]) -> Result<Vec<u8>, SecurityError>,
    {
        let expiry = token::expiry_after(self.config.timeouts().sas_token_ttl());
        token::registration_sas_token(self.config.id_scope(), registration_id, expiry, sign)
    }

    async fn authenticate(&self, request: &RequestData) -> crate::Result<RegistrationOperationStatus> {
        let (callback, waiter) = response_channel();
        self.contract
            .authenticate_with_provisioning_service(request, callback)
            .await?;

        let response = waiter
            .wait(self.config.timeouts().registration_response())
            .await;
        let body = response.received_body().ok_or_else(|| {
            ProvisioningError::Authentication(
                "no registration response received from the provisioning service".to_string(),
            )
        })?;
        trace!("Registration response of {} bytes", body.len());

        parse_operation_status(body)
    }
}
