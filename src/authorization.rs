use std::fmt;

use crate::security::TlsContext;

/// Session secrets gathered while registering: the TLS context the service
/// accepted and, for SAS token flows, the token it authorized.
///
/// One `Authorization` lives for one provisioning attempt. It is moved into the
/// register task, which is its only writer, and handed back with the first
/// registration status; status polls then read clones of it. Ownership keeps
/// at most one writer at a time, so no locking is needed.
#[derive(Clone, Default)]
pub struct Authorization {
    sas_token: Option<String>,
    tls_context: Option<TlsContext>,
}

impl Authorization {
    /// An empty authorization for a new attempt
    pub fn new() -> Self {
        Self::default()
    }

    /// SAS token authorized by the service, if any
    pub fn sas_token(&self) -> Option<&str> {
        self.sas_token.as_deref()
    }

    /// Store the SAS token used to authenticate
    pub fn set_sas_token(&mut self, sas_token: String) {
        self.sas_token = Some(sas_token);
    }

    /// TLS context used to reach the service, if any
    pub fn tls_context(&self) -> Option<&TlsContext> {
        self.tls_context.as_ref()
    }

    /// Store the TLS context used to reach the service
    pub fn set_tls_context(&mut self, tls_context: TlsContext) {
        self.tls_context = Some(tls_context);
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorization")
            .field("sas_token", &self.sas_token.as_ref().map(|_| "<redacted>"))
            .field("tls_context", &self.tls_context)
            .finish()
    }
}
