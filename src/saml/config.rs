//! SAML Service Provider configuration.

use serde::{Deserialize, Serialize};

use super::metadata::IdpMetadata;
use super::signature::SignatureAlgorithm;
use crate::error::ConfigError;

/// SAML Service Provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct SamlConfig {
    /// SP Entity ID. Assertions must name it in their audience restriction.
    #[serde(default, alias = "audience-identifier")]
    pub entity_id: String,

    /// Assertion Consumer Service URL (where the IdP sends the response).
    #[serde(default)]
    pub acs_url: String,

    /// IdP SSO URL for the HTTP-Redirect binding.
    #[serde(default)]
    pub idp_sso_url: Option<String>,

    /// Expected `Issuer` of responses and assertions.
    #[serde(default)]
    pub idp_issuer: Option<String>,

    /// IdP signing certificate (PEM or bare base64 DER).
    #[serde(default)]
    pub idp_certificate_pem: Option<String>,

    /// IdP metadata URL, fetched once on startup.
    #[serde(default)]
    pub idp_metadata_endpoint: Option<String>,

    /// `SigAlg` URIs accepted on redirect-binding responses.
    #[serde(default = "default_allowed_algorithms")]
    pub allowed_signature_algorithms: Vec<String>,

    /// Clock skew tolerance in seconds.
    #[serde(default = "default_clock_skew", alias = "assertion-clock-skew-secs")]
    pub clock_skew_secs: i64,

    /// NameID format to request (optional).
    /// e.g., "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress"
    #[serde(default)]
    pub name_id_format: Option<String>,
}

fn default_allowed_algorithms() -> Vec<String> {
    vec![
        SignatureAlgorithm::RsaSha256.uri().to_string(),
        SignatureAlgorithm::RsaSha512.uri().to_string(),
        SignatureAlgorithm::EcdsaSha256.uri().to_string(),
    ]
}

fn default_clock_skew() -> i64 {
    300 // 5 minutes
}

impl Default for SamlConfig {
    fn default() -> Self {
        Self {
            entity_id: String::new(),
            acs_url: String::new(),
            idp_sso_url: None,
            idp_issuer: None,
            idp_certificate_pem: None,
            idp_metadata_endpoint: None,
            allowed_signature_algorithms: default_allowed_algorithms(),
            clock_skew_secs: default_clock_skew(),
            name_id_format: None,
        }
    }
}

impl SamlConfig {
    /// Validate the configuration as written in the file.
    ///
    /// IdP settings may be left out when a metadata endpoint is configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entity_id.trim().is_empty() {
            return Err(ConfigError::Missing("saml.entity-id"));
        }

        if self.acs_url.trim().is_empty() {
            return Err(ConfigError::Missing("saml.acs-url"));
        }

        if self.clock_skew_secs < 0 {
            return Err(ConfigError::Invalid {
                field: "saml.clock-skew-secs",
                reason: "must not be negative".to_string(),
            });
        }

        self.signature_algorithms()?;

        if self.idp_metadata_endpoint.is_none() {
            self.validate_idp()?;
        }

        Ok(())
    }

    /// Validate that every IdP setting is present, after metadata has been applied.
    pub fn validate_idp(&self) -> Result<(), ConfigError> {
        if is_blank(&self.idp_sso_url) {
            return Err(ConfigError::Missing("saml.idp-sso-url"));
        }
        if is_blank(&self.idp_issuer) {
            return Err(ConfigError::Missing("saml.idp-issuer"));
        }
        if is_blank(&self.idp_certificate_pem) {
            return Err(ConfigError::Missing("saml.idp-certificate-pem"));
        }
        Ok(())
    }

    /// Parse the allowed algorithm list.
    pub fn signature_algorithms(&self) -> Result<Vec<SignatureAlgorithm>, ConfigError> {
        if self.allowed_signature_algorithms.is_empty() {
            return Err(ConfigError::Invalid {
                field: "saml.allowed-signature-algorithms",
                reason: "at least one algorithm is required".to_string(),
            });
        }

        self.allowed_signature_algorithms
            .iter()
            .map(|uri| {
                SignatureAlgorithm::from_uri(uri.trim()).ok_or_else(|| ConfigError::Invalid {
                    field: "saml.allowed-signature-algorithms",
                    reason: format!("unsupported algorithm {}", uri),
                })
            })
            .collect()
    }

    /// Fill in IdP settings that were not configured directly.
    pub fn apply_metadata(&mut self, metadata: IdpMetadata) {
        if is_blank(&self.idp_sso_url) {
            self.idp_sso_url = metadata.sso_url;
        }
        if is_blank(&self.idp_issuer) {
            self.idp_issuer = metadata.entity_id;
        }
        if is_blank(&self.idp_certificate_pem) {
            self.idp_certificate_pem = metadata.signing_certificate;
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or_default().is_empty()
}
