//! The transport contract: the protocol specific half of provisioning.
//!
//! A contract performs the actual calls to the provisioning service over its
//! transport of choice. Calls are asynchronous: each request method is handed a
//! [`ResponseCallback`] that the contract completes, immediately or later from a
//! background task, once the service has answered.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::ContractError;
use crate::security::TlsContext;

const RETRY_AFTER: &str = "retry-after";

/// Transport contract with the provisioning service
#[async_trait]
pub trait ProvisioningContract: Send + Sync {
    /// Open the underlying channel
    async fn open(&self, request: &RequestData) -> Result<(), ContractError>;

    /// Authenticate and register; X.509 devices through the TLS client certificate,
    /// key based devices through the SAS token carried by `request`
    async fn authenticate_with_provisioning_service(
        &self,
        request: &RequestData,
        response: ResponseCallback,
    ) -> Result<(), ContractError>;

    /// Request the encrypted authentication key challenge for a TPM device
    async fn request_nonce_for_tpm(
        &self,
        request: &RequestData,
        response: ResponseCallback,
    ) -> Result<(), ContractError>;

    /// Poll the status of the registration operation named by `request`
    async fn get_registration_status(
        &self,
        request: &RequestData,
        response: ResponseCallback,
    ) -> Result<(), ContractError>;

    /// Release the underlying channel; closing twice is not an error
    async fn close(&self) -> Result<(), ContractError>;

    /// Delay the service asks for between status polls
    fn retry_interval(&self) -> Duration;
}

/// Parameters of one call to the transport contract
#[derive(Debug, Clone, Default)]
pub struct RequestData {
    registration_id: String,
    global_endpoint: Option<String>,
    id_scope: Option<String>,
    operation_id: Option<String>,
    tls_context: Option<TlsContext>,
    sas_token: Option<String>,
    endorsement_key: Option<Vec<u8>>,
    storage_root_key: Option<Vec<u8>>,
    is_x509: bool,
    payload: Option<serde_json::Value>,
}

impl RequestData {
    /// Request data for the given registration id
    pub fn new<T>(registration_id: T) -> Self
    where
        T: ToString,
    {
        Self {
            registration_id: registration_id.to_string(),
            ..Default::default()
        }
    }

    /// Host of the global provisioning endpoint to reach
    pub fn with_global_endpoint<T>(mut self, global_endpoint: T) -> Self
    where
        T: ToString,
    {
        self.global_endpoint = Some(global_endpoint.to_string());
        self
    }

    /// Id scope of the provisioning service instance
    pub fn with_id_scope<T>(mut self, id_scope: T) -> Self
    where
        T: ToString,
    {
        self.id_scope = Some(id_scope.to_string());
        self
    }

    /// Operation id returned by the first registration response
    pub fn with_operation_id(mut self, operation_id: String) -> Self {
        self.operation_id = Some(operation_id);
        self
    }

    /// TLS context to reach the service with
    pub fn with_tls_context(mut self, tls_context: TlsContext) -> Self {
        self.tls_context = Some(tls_context);
        self
    }

    /// SAS token to authenticate with
    pub fn with_sas_token(mut self, sas_token: String) -> Self {
        self.sas_token = Some(sas_token);
        self
    }

    /// TPM endorsement and storage root keys
    pub fn with_tpm_keys(mut self, endorsement_key: Vec<u8>, storage_root_key: Vec<u8>) -> Self {
        self.endorsement_key = Some(endorsement_key);
        self.storage_root_key = Some(storage_root_key);
        self
    }

    /// Mark the request as X.509 authenticated
    pub fn with_x509(mut self, is_x509: bool) -> Self {
        self.is_x509 = is_x509;
        self
    }

    /// Custom payload to send along with the registration
    pub fn with_payload(mut self, payload: Option<serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Registration id
    pub fn registration_id(&self) -> &str {
        &self.registration_id
    }

    /// Global provisioning endpoint
    pub fn global_endpoint(&self) -> Option<&str> {
        self.global_endpoint.as_deref()
    }

    /// Id scope
    pub fn id_scope(&self) -> Option<&str> {
        self.id_scope.as_deref()
    }

    /// Operation id
    pub fn operation_id(&self) -> Option<&str> {
        self.operation_id.as_deref()
    }

    /// TLS context
    pub fn tls_context(&self) -> Option<&TlsContext> {
        self.tls_context.as_ref()
    }

    /// SAS token
    pub fn sas_token(&self) -> Option<&str> {
        self.sas_token.as_deref()
    }

    /// TPM endorsement key
    pub fn endorsement_key(&self) -> Option<&[u8]> {
        self.endorsement_key.as_deref()
    }

    /// TPM storage root key
    pub fn storage_root_key(&self) -> Option<&[u8]> {
        self.storage_root_key.as_deref()
    }

    /// Whether the device authenticates with a client certificate
    pub fn is_x509(&self) -> bool {
        self.is_x509
    }

    /// Custom payload
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }
}

/// Progress of one asynchronous contract call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractState {
    /// No answer yet
    Unknown,
    /// The service answered and the response body is available
    RegistrationReceived,
    /// The call failed without a usable answer
    Failed,
}

/// What the contract reports back for one call
#[derive(Debug, Clone)]
pub struct ResponseData {
    body: Option<Vec<u8>>,
    state: ContractState,
    wait_for_status: Duration,
}

impl Default for ResponseData {
    fn default() -> Self {
        Self {
            body: None,
            state: ContractState::Unknown,
            wait_for_status: Duration::default(),
        }
    }
}

impl ResponseData {
    /// The service answered with `body`, advising `wait_for_status` before the next poll
    pub fn received(body: Vec<u8>, wait_for_status: Duration) -> Self {
        Self {
            body: Some(body),
            state: ContractState::RegistrationReceived,
            wait_for_status,
        }
    }

    /// The call failed
    pub fn failed() -> Self {
        Self {
            state: ContractState::Failed,
            ..Default::default()
        }
    }

    /// Current contract state
    pub fn state(&self) -> ContractState {
        self.state
    }

    /// Delay the service advised before the next poll
    pub fn wait_for_status(&self) -> Duration {
        self.wait_for_status
    }

    /// Response body, only once the contract has signalled receipt
    pub fn received_body(&self) -> Option<&[u8]> {
        match self.state {
            ContractState::RegistrationReceived => self.body.as_deref(),
            _ => None,
        }
    }
}

/// Completes one contract call; handed to the contract with each request
#[derive(Debug, Clone)]
pub struct ResponseCallback {
    tx: Arc<watch::Sender<ResponseData>>,
}

impl ResponseCallback {
    /// Publish the response of the call
    pub fn respond(&self, response: ResponseData) {
        trace!("Contract responded with state {:?}", response.state());
        self.tx.send_replace(response);
    }
}

/// Awaits the response published through the matching [`ResponseCallback`]
#[derive(Debug)]
pub(crate) struct ResponseWaiter {
    rx: watch::Receiver<ResponseData>,
}

pub(crate) fn response_channel() -> (ResponseCallback, ResponseWaiter) {
    let (tx, rx) = watch::channel(ResponseData::default());
    (ResponseCallback { tx: Arc::new(tx) }, ResponseWaiter { rx })
}

impl ResponseWaiter {
    /// Wait until the contract leaves `Unknown`, at most `ceiling`, and return
    /// whatever was published by then
    pub(crate) async fn wait(mut self, ceiling: Duration) -> ResponseData {
        let answered = self
            .rx
            .wait_for(|response| response.state() != ContractState::Unknown);
        let timed_out = tokio::time::timeout(ceiling, answered).await.is_err();
        if timed_out {
            debug!("No contract response within {:?}", ceiling);
        }

        let response = self.rx.borrow().clone();
        response
    }
}

/// Extract the `retry-after` seconds from a response topic such as
/// `$dps/registrations/res/202/?$rid=1&retry-after=3`
pub fn retry_after_from_topic(topic: &str) -> Option<Duration> {
    let (_, query) = topic.split_once('?')?;

    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == RETRY_AFTER)
        .and_then(|(_, value)| {
            let value = value.split(';').next().unwrap_or_default().trim().to_string();
            value.parse::<u64>().ok()
        })
        .map(Duration::from_secs)
}
