use thiserror::Error;

/// Result type used throughout the provisioning client
pub type Result<T> = std::result::Result<T, ProvisioningError>;

/// A required argument was missing or unusable
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ArgumentError {
    /// Uninitialized field
    #[error("{0} must be initialized")]
    UninitializedField(&'static str),
    /// Field was provided but is empty
    #[error("{0} cannot be empty")]
    Empty(&'static str),
    /// Field was provided but failed to validate
    #[error("{0} is invalid: {1}")]
    InvalidValue(&'static str, String),
    /// The registration callback was already handed its result
    #[error("registration callback has already been consumed")]
    CallbackConsumed,
}

/// Errors raised by a security provider or while preparing credentials
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SecurityError {
    /// The provider has no registration id
    #[error("security provider returned no registration id")]
    MissingRegistrationId,
    /// The provider has no TLS context, or none was stored for this attempt
    #[error("no TLS context available")]
    MissingTlsContext,
    /// The provider failed to sign data
    #[error("security provider could not sign data: {0}")]
    SigningFailed(String),
    /// The provider failed to import a key
    #[error("security provider could not import the identity key: {0}")]
    KeyImport(String),
    /// Key material was malformed
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    /// Building the native TLS context failed
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
}

/// Errors raised by the transport contract
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContractError {
    /// The underlying channel could not be established
    #[error("could not connect to the provisioning service: {0}")]
    Connection(String),
    /// I/O failure on the underlying channel
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Any other transport failure
    #[error("{0}")]
    Other(String),
}

/// A service response could not be interpreted
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The response body was empty
    #[error("response body is empty")]
    Empty,
    /// The response body was not the expected JSON document
    #[error("malformed response: {0}")]
    Json(#[from] serde_json::Error),
    /// A field that must be present was missing or empty
    #[error("response is missing {0}")]
    MissingField(&'static str),
    /// The registration state carried more than one attestation result
    #[error("registration state carries more than one attestation result")]
    ConflictingAttestation,
    /// Base64 encoded material in the response could not be decoded
    #[error("could not decode {0}: {1}")]
    Base64(&'static str, base64::DecodeError),
}

/// Errors that can be raised during provisioning or registration
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProvisioningError {
    /// Missing or invalid argument
    #[error("invalid argument: {0}")]
    Argument(#[from] ArgumentError),
    /// The security provider could not supply what the flow needs
    #[error("security provider error: {0}")]
    Security(#[from] SecurityError),
    /// Registration did not authenticate with the provisioning service
    #[error("authentication with the provisioning service failed: {0}")]
    Authentication(String),
    /// The service reached a terminal state without the fields that state requires
    #[error("provisioning service protocol violation: {0}")]
    Protocol(String),
    /// A bounded wait was exceeded
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    /// The service reported the registration as failed or disabled
    #[error("provisioning service reported an error: {message}")]
    Hub {
        /// Error message reported in the registration state
        message: String,
        /// Error code reported in the registration state
        error_code: Option<i64>,
    },
    /// The service answered with an error document instead of an operation status
    #[error("provisioning service rejected the request: {message} (code {error_code:?}, tracking id {tracking_id:?})")]
    Service {
        /// Service message
        message: String,
        /// Service error code
        error_code: Option<i64>,
        /// Service tracking id
        tracking_id: Option<String>,
    },
    /// Configuration could not be loaded
    #[error("could not load configuration: {0}")]
    Config(#[from] config::ConfigError),
    /// A response could not be parsed
    #[error("could not parse provisioning service response: {0}")]
    Parse(#[from] ParseError),
    /// The transport contract failed
    #[error("transport contract error: {0}")]
    Contract(#[from] ContractError),
    /// A status poll got no response
    #[error("registration status was not received")]
    StatusNotReceived,
    /// The worker pool has been shut down
    #[error("worker pool has been shut down")]
    PoolShutdown,
    /// A unit of work in the worker pool panicked or was cancelled
    #[error("worker pool task did not complete: {0}")]
    Task(String),
}

impl ProvisioningError {
    /// Whether this error came from a bounded wait being exceeded
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProvisioningError::Timeout(_))
    }
}
