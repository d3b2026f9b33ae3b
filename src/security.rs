//! Security providers holding the device identity used to authenticate with the
//! provisioning service.
//!
//! A device proves its identity with exactly one attestation mechanism, so the
//! provider is a sum type and each registration flow matches on the variant it
//! understands.

use std::fmt;
use std::sync::Arc;

use crate::error::SecurityError;
use crate::token;

/// TLS settings the transport contract uses to reach the provisioning service
///
/// Cheap to clone; clones share the same native connector.
#[derive(Clone)]
pub struct TlsContext {
    connector: Arc<native_tls::TlsConnector>,
}

impl TlsContext {
    /// Wrap an already configured connector
    pub fn new(connector: native_tls::TlsConnector) -> Self {
        Self {
            connector: Arc::new(connector),
        }
    }

    /// Server-authenticated TLS 1.2+ context, as used for SAS token authentication
    pub fn server_authenticated() -> Result<Self, SecurityError> {
        let connector = native_tls::TlsConnector::builder()
            .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
            .build()?;
        Ok(Self::new(connector))
    }

    /// Mutually authenticated TLS 1.2+ context presenting the device certificate
    pub fn with_identity(identity: native_tls::Identity) -> Result<Self, SecurityError> {
        let connector = native_tls::TlsConnector::builder()
            .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
            .identity(identity)
            .build()?;
        Ok(Self::new(connector))
    }

    /// The native connector for opening connections
    pub fn connector(&self) -> &native_tls::TlsConnector {
        &self.connector
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext").finish_non_exhaustive()
    }
}

/// Device identity backed by an X.509 certificate
pub trait X509Provider: Send + Sync {
    /// Registration id, the common name of the device certificate
    fn registration_id(&self) -> Result<String, SecurityError>;
    /// TLS context presenting the device certificate chain
    fn tls_context(&self) -> Option<TlsContext>;
}

/// Device identity backed by a TPM
pub trait TpmProvider: Send + Sync {
    /// Registration id of the device
    fn registration_id(&self) -> Result<String, SecurityError>;
    /// TLS context used to reach the service
    fn tls_context(&self) -> Option<TlsContext>;
    /// Endorsement key of the TPM
    fn endorsement_key(&self) -> Option<Vec<u8>>;
    /// Storage root key of the TPM
    fn storage_root_key(&self) -> Option<Vec<u8>>;
    /// Sign `data` with the identity key previously activated
    fn sign_with_identity(&self, data: &[u8]) -> Result<Vec<u8>, SecurityError>;
    /// Import the authentication key issued by the service
    fn activate_identity_key(&self, key: &[u8]) -> Result<(), SecurityError>;
}

/// Device identity backed by a symmetric key shared with the enrollment
#[derive(Clone)]
pub struct SymmetricKeyProvider {
    registration_id: String,
    key: String,
    tls_context: Option<TlsContext>,
}

impl SymmetricKeyProvider {
    /// Create a provider from the registration id and the base64 encoded device key,
    /// reaching the service over server-authenticated TLS
    pub fn new<T>(registration_id: T, key: T) -> Result<Self, SecurityError>
    where
        T: ToString,
    {
        let key = key.to_string();
        base64::decode(&key).map_err(|e| SecurityError::InvalidKey(e.to_string()))?;

        Ok(Self {
            registration_id: registration_id.to_string(),
            key,
            tls_context: Some(TlsContext::server_authenticated()?),
        })
    }

    /// Use the given TLS context instead of the default one
    pub fn with_tls_context(mut self, tls_context: TlsContext) -> Self {
        self.tls_context = Some(tls_context);
        self
    }

    pub(crate) fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SecurityError> {
        token::hmac_sign(&self.key, data)
    }
}

impl fmt::Debug for SymmetricKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKeyProvider")
            .field("registration_id", &self.registration_id)
            .finish_non_exhaustive()
    }
}

/// The attestation mechanism a device registers with
#[derive(Clone)]
pub enum SecurityProvider {
    /// X.509 certificate, authenticated by the TLS handshake
    X509(Arc<dyn X509Provider>),
    /// TPM, authenticated by a nonce challenge and a SAS token signed in the TPM
    Tpm(Arc<dyn TpmProvider>),
    /// Symmetric key, authenticated by an HMAC signed SAS token
    SymmetricKey(Arc<SymmetricKeyProvider>),
}

impl SecurityProvider {
    /// Wrap an X.509 provider
    pub fn x509<P>(provider: P) -> Self
    where
        P: X509Provider + 'static,
    {
        SecurityProvider::X509(Arc::new(provider))
    }

    /// Wrap a TPM provider
    pub fn tpm<P>(provider: P) -> Self
    where
        P: TpmProvider + 'static,
    {
        SecurityProvider::Tpm(Arc::new(provider))
    }

    /// Wrap a symmetric key provider
    pub fn symmetric_key(provider: SymmetricKeyProvider) -> Self {
        SecurityProvider::SymmetricKey(Arc::new(provider))
    }

    /// Registration id of the device; an empty id is treated as missing
    pub fn registration_id(&self) -> Result<String, SecurityError> {
        let registration_id = match self {
            SecurityProvider::X509(provider) => provider.registration_id()?,
            SecurityProvider::Tpm(provider) => provider.registration_id()?,
            SecurityProvider::SymmetricKey(provider) => provider.registration_id.clone(),
        };

        if registration_id.is_empty() {
            return Err(SecurityError::MissingRegistrationId);
        }
        Ok(registration_id)
    }

    /// TLS context of the device, if the provider has one
    pub fn tls_context(&self) -> Option<TlsContext> {
        match self {
            SecurityProvider::X509(provider) => provider.tls_context(),
            SecurityProvider::Tpm(provider) => provider.tls_context(),
            SecurityProvider::SymmetricKey(provider) => provider.tls_context.clone(),
        }
    }

    /// Whether the device authenticates with a client certificate
    pub fn is_x509(&self) -> bool {
        matches!(self, SecurityProvider::X509(_))
    }
}

impl fmt::Debug for SecurityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityProvider::X509(_) => f.write_str("SecurityProvider::X509"),
            SecurityProvider::Tpm(_) => f.write_str("SecurityProvider::Tpm"),
            SecurityProvider::SymmetricKey(provider) => f
                .debug_tuple("SecurityProvider::SymmetricKey")
                .field(provider)
                .finish(),
        }
    }
}
