use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::contract::RequestData;
use crate::error::{ParseError, ProvisioningError};

/// Coarse status of a registration operation
///
/// Deserialized case-insensitively, like [`FromStr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningStatus {
    /// Not yet assigned to a hub
    Unassigned,
    /// Assignment in progress
    Assigning,
    /// Assigned to a hub
    Assigned,
    /// Assignment failed
    Failed,
    /// The enrollment is disabled
    Disabled,
}

impl ProvisioningStatus {
    fn as_str(self) -> &'static str {
        match self {
            ProvisioningStatus::Unassigned => "unassigned",
            ProvisioningStatus::Assigning => "assigning",
            ProvisioningStatus::Assigned => "assigned",
            ProvisioningStatus::Failed => "failed",
            ProvisioningStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for ProvisioningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not a known provisioning status
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown provisioning status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ProvisioningStatus {
    type Err = UnknownStatus;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        [
            ProvisioningStatus::Unassigned,
            ProvisioningStatus::Assigning,
            ProvisioningStatus::Assigned,
            ProvisioningStatus::Failed,
            ProvisioningStatus::Disabled,
        ]
        .iter()
        .copied()
        .find(|status| status.as_str().eq_ignore_ascii_case(input.trim()))
        .ok_or_else(|| UnknownStatus(input.to_string()))
    }
}

impl<'de> Deserialize<'de> for ProvisioningStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let status = String::deserialize(deserializer)?;
        status.parse().map_err(serde::de::Error::custom)
    }
}

/// Response to a registration or operation status request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationOperationStatus {
    /// Operation ID.
    #[serde(rename = "operationId")]
    pub operation_id: String,
    /// Device enrollment status.
    #[serde(rename = "status")]
    pub status: ProvisioningStatus,
    /// Device registration status.
    #[serde(rename = "registrationState", skip_serializing_if = "Option::is_none")]
    pub registration_state: Option<DeviceRegistrationResult>,
}

impl RegistrationOperationStatus {
    /// Parse and validate a service response body
    pub fn from_json(body: &[u8]) -> Result<Self, ParseError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(ParseError::Empty);
        }

        let status: RegistrationOperationStatus = serde_json::from_slice(body)?;
        if status.operation_id.is_empty() {
            return Err(ParseError::MissingField("operationId"));
        }
        if let Some(state) = &status.registration_state {
            state.validate()?;
        }

        Ok(status)
    }
}

/// Parse a response that is either an operation status or, when the service
/// rejected the request, an error document
pub(crate) fn parse_operation_status(body: &[u8]) -> crate::Result<RegistrationOperationStatus> {
    RegistrationOperationStatus::from_json(body).or_else(|parse_error| {
        match ServiceError::from_json(body) {
            Ok(service_error) => Err(service_error.into()),
            Err(_) => Err(parse_error.into()),
        }
    })
}

/// Detailed registration state reported by the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRegistrationResult {
    /// Registration result returned when using TPM attestation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tpm: Option<TpmRegistrationResult>,
    /// Registration result returned when using X509 attestation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x509: Option<X509RegistrationResult>,
    /// Registration result returned when using SymmetricKey attestation
    #[serde(rename = "symmetricKey", skip_serializing_if = "Option::is_none")]
    pub symmetric_key: Option<SymmetricKeyRegistrationResult>,
    /// The registration ID is alphanumeric, lowercase, and may contain hyphens.
    #[serde(rename = "registrationId")]
    pub registration_id: String,
    /// Registration create date time (in UTC).
    #[serde(rename = "createdDateTimeUtc", skip_serializing_if = "Option::is_none")]
    pub created_date_time_utc: Option<String>,
    /// Assigned Azure IoT Hub.
    #[serde(rename = "assignedHub", skip_serializing_if = "Option::is_none")]
    pub assigned_hub: Option<String>,
    /// Device ID.
    #[serde(rename = "deviceId", skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Enrollment status.
    #[serde(rename = "status")]
    pub status: ProvisioningStatus,
    /// Substatus for 'Assigned' devices, e.g. `initialAssignment`,
    /// `deviceDataMigrated` or `deviceDataReset`.
    #[serde(rename = "substatus", skip_serializing_if = "Option::is_none")]
    pub substatus: Option<String>,
    /// Error code, accepted as a number or a numeric string.
    #[serde(
        rename = "errorCode",
        default,
        deserialize_with = "lenient_error_code",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_code: Option<i64>,
    /// Error message.
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Last updated date time (in UTC).
    #[serde(
        rename = "lastUpdatedDateTimeUtc",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_updated_date_time_utc: Option<String>,
    /// The entity tag associated with the resource.
    #[serde(rename = "etag", skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Custom payload returned by the allocation policy.
    #[serde(rename = "payload", skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl DeviceRegistrationResult {
    fn validate(&self) -> Result<(), ParseError> {
        if self.registration_id.is_empty() {
            return Err(ParseError::MissingField("registrationState.registrationId"));
        }

        let attestations = [
            self.tpm.is_some(),
            self.x509.is_some(),
            self.symmetric_key.is_some(),
        ];
        if attestations.iter().filter(|present| **present).count() > 1 {
            return Err(ParseError::ConflictingAttestation);
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpmRegistrationResult {
    /// Authentication key issued to the TPM, base64 encoded
    #[serde(rename = "authenticationKey", skip_serializing_if = "Option::is_none")]
    pub authentication_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct X509RegistrationResult {
    #[serde(rename = "certificateInfo", skip_serializing_if = "Option::is_none")]
    pub certificate_info: Option<X509CertificateInfo>,
    #[serde(rename = "enrollmentGroupId", skip_serializing_if = "Option::is_none")]
    pub enrollment_group_id: Option<String>,
    #[serde(
        rename = "signingCertificateInfo",
        skip_serializing_if = "Option::is_none"
    )]
    pub signing_certificate_info: Option<X509CertificateInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct X509CertificateInfo {
    #[serde(rename = "subjectName")]
    pub subject_name: String,
    #[serde(rename = "sha1Thumbprint")]
    pub sha1_thumbprint: String,
    #[serde(rename = "sha256Thumbprint")]
    pub sha256_thumbprint: String,
    #[serde(rename = "issuerName")]
    pub issuer_name: String,
    #[serde(rename = "notBeforeUtc")]
    pub not_before_utc: String,
    #[serde(rename = "notAfterUtc")]
    pub not_after_utc: String,
    #[serde(rename = "serialNumber")]
    pub serial_number: String,
    #[serde(rename = "version")]
    pub version: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymmetricKeyRegistrationResult {
    #[serde(rename = "enrollmentGroupId", skip_serializing_if = "Option::is_none")]
    pub enrollment_group_id: Option<String>,
}

/// Error document the service returns instead of an operation status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceError {
    #[serde(
        rename = "errorCode",
        default,
        deserialize_with = "lenient_error_code",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_code: Option<i64>,
    #[serde(rename = "trackingId", skip_serializing_if = "Option::is_none")]
    pub tracking_id: Option<String>,
    #[serde(alias = "Message")]
    pub message: String,
    #[serde(rename = "timestampUtc", skip_serializing_if = "Option::is_none")]
    pub timestamp_utc: Option<String>,
}

impl ServiceError {
    /// Parse a service error document
    pub fn from_json(body: &[u8]) -> Result<Self, ParseError> {
        Ok(serde_json::from_slice(body)?)
    }
}

impl From<ServiceError> for ProvisioningError {
    fn from(error: ServiceError) -> Self {
        ProvisioningError::Service {
            message: error.message,
            error_code: error.error_code,
            tracking_id: error.tracking_id,
        }
    }
}

/// Answer to a TPM nonce request: the authentication key encrypted to the TPM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpmNonceResponse {
    /// Encrypted authentication key, base64 encoded
    #[serde(rename = "authenticationKey")]
    pub authentication_key: String,
}

impl TpmNonceResponse {
    /// Parse the response and decode the authentication key
    pub fn decode_key(body: &[u8]) -> Result<Vec<u8>, ParseError> {
        let response: TpmNonceResponse = serde_json::from_slice(body)?;
        base64::decode(&response.authentication_key)
            .map_err(|e| ParseError::Base64("authenticationKey", e))
    }
}

/// Registration request body, for contracts that speak JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRegistration {
    #[serde(rename = "registrationId")]
    pub registration_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tpm: Option<TpmAttestation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpmAttestation {
    /// Endorsement key, base64 encoded
    #[serde(rename = "endorsementKey")]
    pub endorsement_key: String,
    /// Storage root key, base64 encoded
    #[serde(rename = "storageRootKey")]
    pub storage_root_key: String,
}

impl DeviceRegistration {
    /// The body to send for `request`
    pub fn from_request(request: &RequestData) -> Self {
        let tpm = match (request.endorsement_key(), request.storage_root_key()) {
            (Some(endorsement_key), Some(storage_root_key)) => Some(TpmAttestation {
                endorsement_key: base64::encode(endorsement_key),
                storage_root_key: base64::encode(storage_root_key),
            }),
            _ => None,
        };

        Self {
            registration_id: request.registration_id().to_string(),
            tpm,
            payload: request.payload().cloned(),
        }
    }
}

fn lenient_error_code<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Number(i64),
        Text(String),
    }

    match Option::<Code>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Code::Number(code)) => Ok(Some(code)),
        Some(Code::Text(code)) => code
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPERATION_ID: &str = "testOperationId";

    #[test]
    fn status_from_str() {
        let cases = vec![
            ("assigned", Some(ProvisioningStatus::Assigned)),
            ("Assigning", Some(ProvisioningStatus::Assigning)),
            (" unassigned ", Some(ProvisioningStatus::Unassigned)),
            ("FAILED", Some(ProvisioningStatus::Failed)),
            ("disabled", Some(ProvisioningStatus::Disabled)),
            ("blah", None),
            ("", None),
        ];

        for (input, expected) in cases {
            assert_eq!(input.parse::<ProvisioningStatus>().ok(), expected, "input '{}'", input);
        }
    }

    #[test]
    fn status_is_deserialized_regardless_of_case() {
        let json = format!(
            r#"{{"operationId":"{}","status":"Assigned","registrationState":{{"registrationId":"testId","status":"ASSIGNING"}}}}"#,
            OPERATION_ID
        );

        let status = RegistrationOperationStatus::from_json(json.as_bytes()).unwrap();

        assert_eq!(status.status, ProvisioningStatus::Assigned);
        assert_eq!(
            status.registration_state.unwrap().status,
            ProvisioningStatus::Assigning
        );
        assert_eq!(
            serde_json::to_value(ProvisioningStatus::Assigned).unwrap(),
            serde_json::json!("assigned")
        );
    }

    #[test]
    fn parses_status_without_registration_state() {
        let json = format!(r#"{{"operationId":"{}","status":"assigning"}}"#, OPERATION_ID);

        let status = RegistrationOperationStatus::from_json(json.as_bytes()).unwrap();

        assert_eq!(status.operation_id, OPERATION_ID);
        assert_eq!(status.status, ProvisioningStatus::Assigning);
        assert!(status.registration_state.is_none());
    }

    #[test]
    fn rejects_missing_or_empty_operation_id() {
        assert!(matches!(
            RegistrationOperationStatus::from_json(br#"{"status":"assigning"}"#),
            Err(ParseError::Json(_))
        ));
        assert!(matches!(
            RegistrationOperationStatus::from_json(br#"{"operationId":"","status":"assigning"}"#),
            Err(ParseError::MissingField("operationId"))
        ));
    }

    #[test]
    fn rejects_empty_and_malformed_bodies() {
        assert!(matches!(
            RegistrationOperationStatus::from_json(b""),
            Err(ParseError::Empty)
        ));
        assert!(matches!(
            RegistrationOperationStatus::from_json(br#"{"operationId":"x""#),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn rejects_unknown_status() {
        let json = format!(r#"{{"operationId":"{}","status":"blah"}}"#, OPERATION_ID);
        assert!(RegistrationOperationStatus::from_json(json.as_bytes()).is_err());
    }

    #[test]
    fn registration_state_requires_registration_id_and_status() {
        let without_id = format!(
            r#"{{"operationId":"{}","status":"assigning","registrationState":{{"status":"assigning"}}}}"#,
            OPERATION_ID
        );
        assert!(RegistrationOperationStatus::from_json(without_id.as_bytes()).is_err());

        let without_status = format!(
            r#"{{"operationId":"{}","status":"assigning","registrationState":{{"registrationId":"testId"}}}}"#,
            OPERATION_ID
        );
        assert!(RegistrationOperationStatus::from_json(without_status.as_bytes()).is_err());
    }

    #[test]
    fn parses_error_details_with_string_code() {
        let json = format!(
            r#"{{"operationId":"{}","status":"failed","registrationState":{{"registrationId":"testId","errorCode":"12345","errorMessage":"TestErrorMessage","status":"failed"}}}}"#,
            OPERATION_ID
        );

        let state = RegistrationOperationStatus::from_json(json.as_bytes())
            .unwrap()
            .registration_state
            .unwrap();

        assert_eq!(state.error_code, Some(12345));
        assert_eq!(state.error_message.as_deref(), Some("TestErrorMessage"));
        assert_eq!(state.status, ProvisioningStatus::Failed);
    }

    #[test]
    fn parses_assigned_x509_state() {
        let json = r#"{
            "operationId": "testOperationId",
            "status": "assigned",
            "registrationState": {
                "x509": {
                    "certificateInfo": {
                        "subjectName": "CN=testId",
                        "sha1Thumbprint": "sha1",
                        "sha256Thumbprint": "sha256",
                        "issuerName": "CN=issuer",
                        "notBeforeUtc": "2017-01-01T00:00:00Z",
                        "notAfterUtc": "2037-01-01T00:00:00Z",
                        "serialNumber": "0102",
                        "version": 3
                    },
                    "enrollmentGroupId": "TEST_ENROLLMENT_GROUP"
                },
                "registrationId": "testId",
                "createdDateTimeUtc": "2017-01-01T00:00:00Z",
                "assignedHub": "testHub",
                "deviceId": "testDevId",
                "status": "assigned",
                "substatus": "initialAssignment",
                "lastUpdatedDateTimeUtc": "2017-01-01T00:00:00Z",
                "etag": "\"etag\"",
                "payload": { "answer": 42 }
            }
        }"#;

        let state = RegistrationOperationStatus::from_json(json.as_bytes())
            .unwrap()
            .registration_state
            .unwrap();

        assert_eq!(state.assigned_hub.as_deref(), Some("testHub"));
        assert_eq!(state.device_id.as_deref(), Some("testDevId"));
        assert_eq!(state.substatus.as_deref(), Some("initialAssignment"));
        assert_eq!(state.payload, Some(serde_json::json!({ "answer": 42 })));
        let x509 = state.x509.unwrap();
        assert_eq!(x509.enrollment_group_id.as_deref(), Some("TEST_ENROLLMENT_GROUP"));
        assert_eq!(x509.certificate_info.unwrap().version, 3);
        assert!(state.tpm.is_none());
    }

    #[test]
    fn rejects_more_than_one_attestation_result() {
        let json = r#"{"operationId":"op","status":"assigned","registrationState":{
            "registrationId":"testId","status":"assigned",
            "tpm":{"authenticationKey":"a2V5"},
            "symmetricKey":{"enrollmentGroupId":"group"}}}"#;

        assert!(matches!(
            RegistrationOperationStatus::from_json(json.as_bytes()),
            Err(ParseError::ConflictingAttestation)
        ));
    }

    #[test]
    fn service_error_body_becomes_service_error() {
        let body = br#"{"errorCode":401002,"trackingId":"abc","message":"Unauthorized","timestampUtc":"2018-01-01T00:00:00Z"}"#;

        match parse_operation_status(body) {
            Err(ProvisioningError::Service {
                message,
                error_code,
                tracking_id,
            }) => {
                assert_eq!(message, "Unauthorized");
                assert_eq!(error_code, Some(401_002));
                assert_eq!(tracking_id.as_deref(), Some("abc"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unparseable_body_keeps_parse_error() {
        assert!(matches!(
            parse_operation_status(br#"{"operationId":"op","status":"blah"}"#),
            Err(ProvisioningError::Parse(_))
        ));
    }

    #[test]
    fn nonce_response_decodes_key() {
        assert_eq!(
            TpmNonceResponse::decode_key(br#"{"authenticationKey":"a2V5"}"#).unwrap(),
            b"key".to_vec()
        );
        assert!(matches!(
            TpmNonceResponse::decode_key(br#"{"authenticationKey":"***"}"#),
            Err(ParseError::Base64(..))
        ));
    }

    #[test]
    fn registration_body_carries_tpm_keys_and_payload() {
        let request = RequestData::new("testId")
            .with_tpm_keys(b"ek".to_vec(), b"srk".to_vec())
            .with_payload(Some(serde_json::json!({ "a": 1 })));

        let body = serde_json::to_value(DeviceRegistration::from_request(&request)).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "registrationId": "testId",
                "tpm": { "endorsementKey": "ZWs=", "storageRootKey": "c3Jr" },
                "payload": { "a": 1 }
            })
        );
    }
}
