use std::time::Duration;

use serde::Deserialize;

use crate::error::ArgumentError;

/// Global device provisioning service endpoint
pub const DEFAULT_GLOBAL_ENDPOINT: &str = "global.azure-devices-provisioning.net";

const ENV_PREFIX: &str = "DPS";

/// Settings for one device provisioning client
///
/// # Example
/// ```
/// use azure_iot_provisioning::ProvisioningConfig;
///
/// let config = ProvisioningConfig::new("0ne000EEBBD")
///     .unwrap()
///     .with_custom_payload(serde_json::json!({ "modelId": "dtmi:com:example:Thermostat;1" }));
///
/// assert_eq!(config.id_scope(), "0ne000EEBBD");
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningConfig {
    id_scope: String,
    #[serde(default = "default_global_endpoint")]
    global_endpoint: String,
    #[serde(default)]
    custom_payload: Option<serde_json::Value>,
    #[serde(default)]
    timeouts: ProvisioningTimeouts,
}

fn default_global_endpoint() -> String {
    DEFAULT_GLOBAL_ENDPOINT.to_string()
}

impl ProvisioningConfig {
    /// Create a config for the given id scope with default endpoint and timeouts
    pub fn new<T>(id_scope: T) -> Result<Self, ArgumentError>
    where
        T: ToString,
    {
        let config = Self {
            id_scope: id_scope.to_string(),
            global_endpoint: default_global_endpoint(),
            custom_payload: None,
            timeouts: ProvisioningTimeouts::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a file (any format supported by the `config` crate), with
    /// `DPS_` prefixed environment variables taking precedence, e.g. `DPS_ID_SCOPE`
    /// or `DPS_TIMEOUTS__STATUS_TASK`.
    pub fn load(path: &str) -> crate::Result<Self> {
        let mut cfg = config::Config::default();
        cfg.merge(config::File::with_name(path))?;
        cfg.merge(config::Environment::with_prefix(ENV_PREFIX).separator("__"))?;
        let config: ProvisioningConfig = cfg.try_into()?;
        config.validate()?;

        debug!(
            "Loaded provisioning config for scope {} from {}",
            config.id_scope, path
        );

        Ok(config)
    }

    /// Set the global endpoint of the provisioning service
    pub fn with_global_endpoint<T>(mut self, global_endpoint: T) -> Self
    where
        T: ToString,
    {
        self.global_endpoint = global_endpoint.to_string();
        self
    }

    /// Set the custom JSON payload sent along with the registration request
    pub fn with_custom_payload(mut self, payload: serde_json::Value) -> Self {
        self.custom_payload = Some(payload);
        self
    }

    /// Replace the wait bounds
    pub fn with_timeouts(mut self, timeouts: ProvisioningTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// The id scope of the provisioning service instance
    pub fn id_scope(&self) -> &str {
        &self.id_scope
    }

    /// The global endpoint of the provisioning service
    pub fn global_endpoint(&self) -> &str {
        &self.global_endpoint
    }

    /// The custom payload, if any
    pub fn custom_payload(&self) -> Option<&serde_json::Value> {
        self.custom_payload.as_ref()
    }

    /// Wait bounds used during registration
    pub fn timeouts(&self) -> &ProvisioningTimeouts {
        &self.timeouts
    }

    fn validate(&self) -> Result<(), ArgumentError> {
        if self.id_scope.trim().is_empty() {
            return Err(ArgumentError::Empty("id_scope"));
        }
        if self.global_endpoint.trim().is_empty() {
            return Err(ArgumentError::Empty("global_endpoint"));
        }
        if self.timeouts.sas_token_ttl_secs == 0 {
            return Err(ArgumentError::InvalidValue(
                "sas_token_ttl_secs",
                "expiry time cannot be zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounds on every wait performed while registering, in milliseconds unless noted
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProvisioningTimeouts {
    /// How long the orchestrator waits for the register task to complete
    pub register_task: u64,
    /// How long the orchestrator waits for each status task to complete
    pub status_task: u64,
    /// How long the register task waits for each response of the transport contract
    pub registration_response: u64,
    /// How long the status task waits for the response of the transport contract
    pub status_response: u64,
    /// Lifetime of SAS tokens built during registration, in seconds
    pub sas_token_ttl_secs: u64,
}

impl Default for ProvisioningTimeouts {
    fn default() -> Self {
        Self {
            register_task: 1_000_000,
            status_task: 10_000,
            registration_response: 90_000,
            status_response: 9_000,
            sas_token_ttl_secs: 3_600,
        }
    }
}

impl ProvisioningTimeouts {
    pub(crate) fn register_task(&self) -> Duration {
        Duration::from_millis(self.register_task)
    }

    pub(crate) fn status_task(&self) -> Duration {
        Duration::from_millis(self.status_task)
    }

    pub(crate) fn registration_response(&self) -> Duration {
        Duration::from_millis(self.registration_response)
    }

    pub(crate) fn status_response(&self) -> Duration {
        Duration::from_millis(self.status_response)
    }

    pub(crate) fn sas_token_ttl(&self) -> Duration {
        Duration::from_secs(self.sas_token_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_id_scope_is_rejected() {
        let err = ProvisioningConfig::new("  ").unwrap_err();
        assert_eq!(err, ArgumentError::Empty("id_scope"));
    }

    #[test]
    fn defaults_match_service_bounds() {
        let config = ProvisioningConfig::new("0ne000EEBBD").unwrap();
        assert_eq!(config.global_endpoint(), DEFAULT_GLOBAL_ENDPOINT);
        assert!(config.custom_payload().is_none());

        let timeouts = config.timeouts();
        assert_eq!(timeouts.register_task(), Duration::from_millis(1_000_000));
        assert_eq!(timeouts.status_task(), Duration::from_secs(10));
        assert_eq!(timeouts.registration_response(), Duration::from_secs(90));
        assert_eq!(timeouts.sas_token_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn partial_timeouts_fall_back_to_defaults() {
        let config: ProvisioningConfig = serde_json::from_str(
            r#"{ "id_scope": "scope", "timeouts": { "status_task": 250 } }"#,
        )
        .unwrap();

        assert_eq!(config.timeouts().status_task, 250);
        assert_eq!(config.timeouts().register_task, 1_000_000);
        assert_eq!(config.global_endpoint(), DEFAULT_GLOBAL_ENDPOINT);
    }

    #[test]
    fn load_reads_file_and_validates() {
        let path = std::env::temp_dir().join(format!(
            "dps-config-{}.json",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"{ "id_scope": "0ne00000001", "custom_payload": { "a": 1 } }"#,
        )
        .unwrap();

        let config = ProvisioningConfig::load(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.id_scope(), "0ne00000001");
        assert_eq!(config.custom_payload(), Some(&serde_json::json!({ "a": 1 })));
    }
}
