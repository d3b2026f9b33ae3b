use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac, NewMac};
use sha2::Sha256;

use crate::error::{ProvisioningError, SecurityError};

/// Resource scope a registration SAS token is issued for: `<scope>/registrations/<registrationId>`
pub fn registration_token_scope(id_scope: &str, registration_id: &str) -> String {
    format!(
        "{scope}/registrations/{registration_id}",
        scope = id_scope,
        registration_id = registration_id
    )
}

/// Seconds since the epoch at which a token issued now with the given lifetime expires
pub(crate) fn expiry_after(ttl: Duration) -> i64 {
    Utc::now().timestamp() + ttl.as_secs() as i64
}

/// Build a registration SAS token of the form
/// `SharedAccessSignature sr=<scope>/registrations/<registrationId>&sig=<signature>&se=<expiry>&skn=`
///
/// `sign` receives `"<scope>/registrations/<registrationId>\n<expiry>"` and returns the raw
/// signature, which is base64 and then url encoded into the token.
pub fn registration_sas_token<F>(
    id_scope: &str,
    registration_id: &str,
    expiry_timestamp: i64,
    sign: F,
) -> crate::Result<String>
where
    F: FnOnce(&[u8]) -> Result<Vec<u8>, SecurityError>,
{
    if expiry_timestamp <= 0 {
        return Err(ProvisioningError::Authentication(
            "expiry time cannot be negative or zero".to_string(),
        ));
    }

    if id_scope.is_empty() || registration_id.is_empty() {
        return Err(ProvisioningError::Authentication(
            "could not construct token scope".to_string(),
        ));
    }
    let token_scope = registration_token_scope(id_scope, registration_id);

    let to_sign = format!(
        "{token_scope}\n{expires}",
        token_scope = token_scope,
        expires = expiry_timestamp
    );
    let signature = sign(to_sign.as_bytes())?;
    if signature.is_empty() {
        return Err(ProvisioningError::Authentication(
            "security provider could not sign data successfully".to_string(),
        ));
    }

    let sas = format!(
        "SharedAccessSignature sr={token_scope}&{signature}&se={expires}&skn=",
        token_scope = token_scope,
        signature = signature_pair(&signature)?,
        expires = expiry_timestamp
    );

    trace!(
        "Built registration token for {} expiring at {}",
        token_scope,
        expiry_timestamp
    );

    Ok(sas)
}

fn signature_pair(signature: &[u8]) -> Result<String, SecurityError> {
    let pairs = &[("sig", base64::encode(signature))];
    serde_urlencoded::to_string(pairs).map_err(|e| SecurityError::SigningFailed(e.to_string()))
}

/// HMAC-SHA256 of `message` keyed with the base64 encoded symmetric `key`
pub fn hmac_sign(key: &str, message: &[u8]) -> Result<Vec<u8>, SecurityError> {
    let key = base64::decode(key).map_err(|e| SecurityError::InvalidKey(e.to_string()))?;
    let mut mac = Hmac::<Sha256>::new_varkey(&key)
        .map_err(|e| SecurityError::InvalidKey(e.to_string()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}
