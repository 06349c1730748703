//! Dispatch configuration.
//!
//! Loaded once at startup from a JSON file and shared as `Arc<DispatchConfig>`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;
use crate::policy::DispatchPolicy;
use crate::saml::{fetch_metadata, SamlConfig};
use crate::store::DEFAULT_CLEANUP_INTERVAL_SECS;

/// Complete configuration of the login dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct DispatchConfig {
    /// Username suffix routed to the local credential verifier.
    #[serde(default)]
    pub local_domain_marker: String,

    /// Username suffix routed to the federated verifier.
    #[serde(default)]
    pub federated_domain_marker: String,

    /// Upper bound on every store call, in milliseconds.
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_ms: u64,

    /// Identity and replay store path (redb database file).
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Replay record cleanup interval in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub replay_cleanup_interval_secs: u64,

    #[serde(default)]
    pub saml: SamlConfig,
}

fn default_upstream_timeout() -> u64 {
    2_000
}

fn default_store_path() -> String {
    "/var/lib/zentinel-auth/identities.redb".to_string()
}

fn default_cleanup_interval() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_SECS
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            local_domain_marker: String::new(),
            federated_domain_marker: String::new(),
            upstream_timeout_ms: default_upstream_timeout(),
            store_path: default_store_path(),
            replay_cleanup_interval_secs: default_cleanup_interval(),
            saml: SamlConfig::default(),
        }
    }
}

impl DispatchConfig {
    /// Read and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy()?;

        if self.upstream_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "upstream-timeout-ms",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.store_path.trim().is_empty() {
            return Err(ConfigError::Missing("store-path"));
        }

        self.saml.validate()
    }

    /// Build the classification policy from the configured markers.
    pub fn policy(&self) -> Result<DispatchPolicy, ConfigError> {
        DispatchPolicy::new(&self.local_domain_marker, &self.federated_domain_marker)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    /// Fetch IdP metadata when an endpoint is configured and fill in the IdP
    /// settings it provides. Fails unless every IdP setting is resolved afterwards.
    pub async fn resolve_metadata(mut self) -> Result<Self, ConfigError> {
        if let Some(endpoint) = self.saml.idp_metadata_endpoint.clone() {
            let metadata = fetch_metadata(&endpoint, self.upstream_timeout())
                .await
                .map_err(|e| ConfigError::Metadata(format!("{:#}", e)))?;
            self.saml.apply_metadata(metadata);
            info!(endpoint = %endpoint, "Applied IdP metadata");
        }

        self.saml.validate_idp()?;
        Ok(self)
    }
}
