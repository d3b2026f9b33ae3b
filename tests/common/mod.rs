#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use azure_iot_provisioning::{
    ContractError, ProvisioningConfig, ProvisioningContract, ProvisioningError,
    ProvisioningTimeouts, RegistrationResult, RequestData, ResponseCallback, ResponseData,
    SecurityError, TlsContext, TpmProvider, X509Provider,
};

pub const ID_SCOPE: &str = "0ne000EEBBD";
pub const OPERATION_ID: &str = "testOperationId";
pub const DEVICE_KEY: &str = "O+H9VTcdJP0Tqkl7bh4nVG0OJNrAataMpuWB54D0VEc=";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Call record for tracking contract invocations
#[derive(Debug, Clone, PartialEq)]
pub enum ContractCall {
    Open,
    Authenticate,
    RequestNonce,
    GetStatus,
    Close,
}

/// How the stub answers the next request
#[derive(Debug, Clone)]
pub enum Reply {
    /// Respond immediately with the body
    Received(Vec<u8>),
    /// Respond with the body after a delay
    Delayed(Duration, Vec<u8>),
    /// Report a failed call
    Fail,
    /// Never respond
    Silent,
    /// Fail the request itself
    Error(String),
}

/// Stub contract replaying queued replies and recording every call
#[derive(Default)]
pub struct StubContract {
    calls: Mutex<Vec<(ContractCall, RequestData)>>,
    replies: Mutex<VecDeque<Reply>>,
    pending: Mutex<Vec<ResponseCallback>>,
    open_error: Option<String>,
    retry_interval: Duration,
}

impl StubContract {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            retry_interval: Duration::from_millis(5),
            ..Default::default()
        }
    }

    pub fn failing_open(message: &str) -> Self {
        Self {
            open_error: Some(message.to_string()),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> Vec<ContractCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(call, _)| call.clone())
            .collect()
    }

    pub fn requests(&self, kind: ContractCall) -> Vec<RequestData> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(call, _)| *call == kind)
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn count(&self, kind: ContractCall) -> usize {
        self.requests(kind).len()
    }

    fn record(&self, call: ContractCall, request: &RequestData) {
        self.calls.lock().unwrap().push((call, request.clone()));
    }

    fn reply(&self, response: ResponseCallback) -> Result<(), ContractError> {
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Silent);
        match reply {
            Reply::Received(body) => response.respond(ResponseData::received(body, Duration::ZERO)),
            Reply::Delayed(delay, body) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    response.respond(ResponseData::received(body, Duration::ZERO));
                });
            }
            Reply::Fail => response.respond(ResponseData::failed()),
            Reply::Silent => self.pending.lock().unwrap().push(response),
            Reply::Error(message) => return Err(ContractError::Other(message)),
        }
        Ok(())
    }
}

#[async_trait]
impl ProvisioningContract for StubContract {
    async fn open(&self, request: &RequestData) -> Result<(), ContractError> {
        self.record(ContractCall::Open, request);
        match &self.open_error {
            Some(message) => Err(ContractError::Connection(message.clone())),
            None => Ok(()),
        }
    }

    async fn authenticate_with_provisioning_service(
        &self,
        request: &RequestData,
        response: ResponseCallback,
    ) -> Result<(), ContractError> {
        self.record(ContractCall::Authenticate, request);
        self.reply(response)
    }

    async fn request_nonce_for_tpm(
        &self,
        request: &RequestData,
        response: ResponseCallback,
    ) -> Result<(), ContractError> {
        self.record(ContractCall::RequestNonce, request);
        self.reply(response)
    }

    async fn get_registration_status(
        &self,
        request: &RequestData,
        response: ResponseCallback,
    ) -> Result<(), ContractError> {
        self.record(ContractCall::GetStatus, request);
        self.reply(response)
    }

    async fn close(&self) -> Result<(), ContractError> {
        self.record(ContractCall::Close, &RequestData::default());
        Ok(())
    }

    fn retry_interval(&self) -> Duration {
        self.retry_interval
    }
}

pub struct StubX509 {
    pub registration_id: String,
    pub tls_context: Option<TlsContext>,
}

impl StubX509 {
    pub fn new(registration_id: &str) -> Self {
        Self {
            registration_id: registration_id.to_string(),
            tls_context: Some(tls_context()),
        }
    }
}

impl X509Provider for StubX509 {
    fn registration_id(&self) -> Result<String, SecurityError> {
        Ok(self.registration_id.clone())
    }

    fn tls_context(&self) -> Option<TlsContext> {
        self.tls_context.clone()
    }
}

pub struct StubTpm {
    pub registration_id: String,
    pub tls_context: Option<TlsContext>,
    pub endorsement_key: Option<Vec<u8>>,
    pub storage_root_key: Option<Vec<u8>>,
    pub activated: Mutex<Vec<Vec<u8>>>,
    pub signed: Mutex<Vec<Vec<u8>>>,
}

impl StubTpm {
    pub fn new(registration_id: &str) -> Self {
        Self {
            registration_id: registration_id.to_string(),
            tls_context: Some(tls_context()),
            endorsement_key: Some(b"endorsement".to_vec()),
            storage_root_key: Some(b"storage root".to_vec()),
            activated: Mutex::new(Vec::new()),
            signed: Mutex::new(Vec::new()),
        }
    }

    pub fn activated(&self) -> Vec<Vec<u8>> {
        self.activated.lock().unwrap().clone()
    }
}

impl TpmProvider for StubTpm {
    fn registration_id(&self) -> Result<String, SecurityError> {
        Ok(self.registration_id.clone())
    }

    fn tls_context(&self) -> Option<TlsContext> {
        self.tls_context.clone()
    }

    fn endorsement_key(&self) -> Option<Vec<u8>> {
        self.endorsement_key.clone()
    }

    fn storage_root_key(&self) -> Option<Vec<u8>> {
        self.storage_root_key.clone()
    }

    fn sign_with_identity(&self, data: &[u8]) -> Result<Vec<u8>, SecurityError> {
        self.signed.lock().unwrap().push(data.to_vec());
        Ok(b"tpm signature".to_vec())
    }

    fn activate_identity_key(&self, key: &[u8]) -> Result<(), SecurityError> {
        self.activated.lock().unwrap().push(key.to_vec());
        Ok(())
    }
}

pub fn tls_context() -> TlsContext {
    TlsContext::server_authenticated().unwrap()
}

/// Config with wait bounds short enough for tests
pub fn config() -> ProvisioningConfig {
    ProvisioningConfig::new(ID_SCOPE)
        .unwrap()
        .with_timeouts(ProvisioningTimeouts {
            register_task: 5_000,
            status_task: 2_000,
            registration_response: 1_000,
            status_response: 1_000,
            ..Default::default()
        })
}

/// Collects every registration callback invocation
#[derive(Clone, Default)]
pub struct Outcomes(Arc<Mutex<Vec<(RegistrationResult, Option<ProvisioningError>)>>>);

impl Outcomes {
    pub fn callback(&self) -> impl FnOnce(RegistrationResult, Option<ProvisioningError>) + Send + 'static {
        let outcomes = self.0.clone();
        move |result, error| outcomes.lock().unwrap().push((result, error))
    }

    pub fn take(&self) -> Vec<(RegistrationResult, Option<ProvisioningError>)> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

pub fn status(status: &str) -> Vec<u8> {
    json!({ "operationId": OPERATION_ID, "status": status })
        .to_string()
        .into_bytes()
}

pub fn assigned(hub: Option<&str>, device_id: Option<&str>, extra: serde_json::Value) -> Vec<u8> {
    let mut state = json!({
        "registrationId": "testId",
        "status": "assigned",
        "createdDateTimeUtc": "2017-01-01T00:00:00Z",
        "lastUpdatedDateTimeUtc": "2017-01-01T00:00:01Z",
        "substatus": "initialAssignment",
        "etag": "etag",
    });
    if let Some(hub) = hub {
        state["assignedHub"] = json!(hub);
    }
    if let Some(device_id) = device_id {
        state["deviceId"] = json!(device_id);
    }
    if let (Some(state), Some(extra)) = (state.as_object_mut(), extra.as_object()) {
        state.extend(extra.clone());
    }

    json!({ "operationId": OPERATION_ID, "status": "assigned", "registrationState": state })
        .to_string()
        .into_bytes()
}

pub fn terminal(status: &str, message: &str) -> Vec<u8> {
    json!({
        "operationId": OPERATION_ID,
        "status": status,
        "registrationState": {
            "registrationId": "testId",
            "status": status,
            "errorCode": 400_209,
            "errorMessage": message,
        }
    })
    .to_string()
    .into_bytes()
}

pub fn nonce(key: &[u8]) -> Vec<u8> {
    json!({ "authenticationKey": base64::encode(key) })
        .to_string()
        .into_bytes()
}
