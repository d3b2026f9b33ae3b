use tokio::sync::oneshot;

use crate::error::ProvisioningError;
use crate::model::DeviceRegistrationResult;

/// Final status of one registration attempt, as seen by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningDeviceStatus {
    /// The device was assigned to a hub
    Assigned,
    /// The service failed the registration
    Failed,
    /// The enrollment is disabled
    Disabled,
    /// Registration did not complete
    Error,
}

/// Outcome of a registration attempt
///
/// Built once, when the attempt reaches a terminal state or fails, and read-only
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationResult {
    status: ProvisioningDeviceStatus,
    iothub_uri: Option<String>,
    device_id: Option<String>,
    payload: Option<serde_json::Value>,
    registration_id: Option<String>,
    substatus: Option<String>,
    created_date_time_utc: Option<String>,
    last_updated_date_time_utc: Option<String>,
    etag: Option<String>,
    authentication_key: Option<Vec<u8>>,
}

impl RegistrationResult {
    pub(crate) fn assigned(
        state: &DeviceRegistrationResult,
        iothub_uri: String,
        device_id: String,
        authentication_key: Option<Vec<u8>>,
    ) -> Self {
        Self {
            iothub_uri: Some(iothub_uri),
            device_id: Some(device_id),
            payload: state.payload.clone(),
            registration_id: Some(state.registration_id.clone()),
            substatus: state.substatus.clone(),
            created_date_time_utc: state.created_date_time_utc.clone(),
            last_updated_date_time_utc: state.last_updated_date_time_utc.clone(),
            etag: state.etag.clone(),
            authentication_key,
            ..Self::empty(ProvisioningDeviceStatus::Assigned)
        }
    }

    pub(crate) fn empty(status: ProvisioningDeviceStatus) -> Self {
        Self {
            status,
            iothub_uri: None,
            device_id: None,
            payload: None,
            registration_id: None,
            substatus: None,
            created_date_time_utc: None,
            last_updated_date_time_utc: None,
            etag: None,
            authentication_key: None,
        }
    }

    /// Final status
    pub fn status(&self) -> ProvisioningDeviceStatus {
        self.status
    }

    /// Host name of the assigned IoT hub
    pub fn iothub_uri(&self) -> Option<&str> {
        self.iothub_uri.as_deref()
    }

    /// Device id assigned in the hub
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Custom payload returned by the allocation policy
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    /// Registration id the service registered
    pub fn registration_id(&self) -> Option<&str> {
        self.registration_id.as_deref()
    }

    /// Assignment substatus, e.g. `initialAssignment`
    pub fn substatus(&self) -> Option<&str> {
        self.substatus.as_deref()
    }

    /// When the registration was created (UTC)
    pub fn created_date_time_utc(&self) -> Option<&str> {
        self.created_date_time_utc.as_deref()
    }

    /// When the registration was last updated (UTC)
    pub fn last_updated_date_time_utc(&self) -> Option<&str> {
        self.last_updated_date_time_utc.as_deref()
    }

    /// Entity tag of the registration
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Decoded authentication key issued to a TPM device
    pub fn authentication_key(&self) -> Option<&[u8]> {
        self.authentication_key.as_deref()
    }
}

/// Receives the outcome of a registration attempt, exactly once
pub type RegistrationCallback =
    Box<dyn FnOnce(RegistrationResult, Option<ProvisioningError>) + Send + 'static>;

/// What a [`completion_channel`] delivers
#[derive(Debug)]
pub struct RegistrationCompletion {
    /// The registration result
    pub result: RegistrationResult,
    /// The error that ended the attempt, if any
    pub error: Option<ProvisioningError>,
}

impl RegistrationCompletion {
    /// The result if the device was assigned, otherwise the error
    pub fn into_result(self) -> crate::Result<RegistrationResult> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}

/// A registration callback that forwards the outcome to the returned receiver
pub fn completion_channel() -> (RegistrationCallback, oneshot::Receiver<RegistrationCompletion>) {
    let (tx, rx) = oneshot::channel();
    let callback: RegistrationCallback = Box::new(move |result, error| {
        if tx.send(RegistrationCompletion { result, error }).is_err() {
            debug!("Registration completed after the receiver was dropped");
        }
    });
    (callback, rx)
}
