//! SAML Service Provider implementation.
//!
//! Builds SP-initiated AuthnRequests and checks redirect-binding responses. The
//! checks are exposed one by one so the caller can interleave the replay lookup.

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use super::assertion::FederatedAssertion;
use super::config::SamlConfig;
use super::signature::{IdpVerifyingKey, SignatureAlgorithm};
use crate::error::{AuthFailure, ConfigError};

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
const REDIRECT_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";

/// Where to send the browser to start a federated login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectInstruction {
    /// Full IdP URL including the query string.
    pub url: String,
    /// Deflated, base64-encoded AuthnRequest.
    pub saml_request: String,
    pub relay_state: Option<String>,
    pub request_id: String,
}

/// SAML Service Provider bound to one IdP.
pub struct SamlProvider {
    config: SamlConfig,
    idp_sso_url: String,
    idp_issuer: String,
    idp_key: IdpVerifyingKey,
    algorithms: Vec<SignatureAlgorithm>,
}

impl std::fmt::Debug for SamlProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamlProvider")
            .field("entity_id", &self.config.entity_id)
            .field("idp_issuer", &self.idp_issuer)
            .field("idp_key", &self.idp_key)
            .finish()
    }
}

impl SamlProvider {
    /// Create a provider. Every IdP setting must be resolved at this point.
    pub fn new(config: SamlConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        config.validate_idp()?;

        let algorithms = config.signature_algorithms()?;
        let idp_key = IdpVerifyingKey::from_certificate(
            config.idp_certificate_pem.as_deref().unwrap_or_default(),
        )
        .map_err(|reason| ConfigError::Invalid {
            field: "saml.idp-certificate-pem",
            reason,
        })?;

        let idp_sso_url = config.idp_sso_url.clone().unwrap_or_default().trim().to_string();
        let idp_issuer = config.idp_issuer.clone().unwrap_or_default().trim().to_string();

        debug!(
            idp = %idp_issuer,
            certificate = %idp_key.subject(),
            "SAML provider ready"
        );

        Ok(Self {
            config,
            idp_sso_url,
            idp_issuer,
            idp_key,
            algorithms,
        })
    }

    pub fn config(&self) -> &SamlConfig {
        &self.config
    }

    pub fn idp_issuer(&self) -> &str {
        &self.idp_issuer
    }

    /// Create an AuthnRequest with a fresh ID and the current time.
    pub fn create_authn_request(&self, relay_state: Option<&str>) -> Result<RedirectInstruction> {
        let request_id = format!("_id{}", uuid::Uuid::new_v4());
        self.create_authn_request_at(&request_id, Utc::now(), relay_state)
    }

    /// Create an AuthnRequest redirect for a given request ID and instant.
    pub fn create_authn_request_at(
        &self,
        request_id: &str,
        issue_instant: DateTime<Utc>,
        relay_state: Option<&str>,
    ) -> Result<RedirectInstruction> {
        let issue_instant = issue_instant.format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let name_id_policy = self
            .config
            .name_id_format
            .as_deref()
            .map(|format| format!(r#"<samlp:NameIDPolicy Format="{}" AllowCreate="false"/>"#, format))
            .unwrap_or_default();

        let authn_request = format!(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
                xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
                ID="{}"
                Version="2.0"
                IssueInstant="{}"
                Destination="{}"
                ProtocolBinding="{}"
                AssertionConsumerServiceURL="{}">
                <saml:Issuer>{}</saml:Issuer>{}
            </samlp:AuthnRequest>"#,
            request_id,
            issue_instant,
            self.idp_sso_url,
            REDIRECT_BINDING,
            self.config.acs_url,
            self.config.entity_id,
            name_id_policy
        );

        let saml_request = deflate_and_encode(&authn_request)?;

        let separator = if self.idp_sso_url.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}{}SAMLRequest={}",
            self.idp_sso_url,
            separator,
            urlencoding::encode(&saml_request)
        );

        if let Some(state) = relay_state {
            url.push_str(&format!("&RelayState={}", urlencoding::encode(state)));
        }

        debug!(request_id = %request_id, "Created SAML AuthnRequest redirect");

        Ok(RedirectInstruction {
            url,
            saml_request,
            relay_state: relay_state.map(str::to_string),
            request_id: request_id.to_string(),
        })
    }

    /// Check the detached signature, decode the response and check its status
    /// and issuer. Returns the single assertion it carries.
    pub fn verify_origin(
        &self,
        package: &FederatedAssertion,
    ) -> Result<samael::schema::Assertion, AuthFailure> {
        let sig_alg = package
            .sig_alg()
            .ok_or_else(|| AuthFailure::invalid_assertion("response is not signed"))?;
        let signature = package
            .signature()
            .ok_or_else(|| AuthFailure::invalid_assertion("response is not signed"))?;

        let algorithm = SignatureAlgorithm::from_uri(sig_alg)
            .filter(|alg| self.algorithms.contains(alg))
            .ok_or_else(|| AuthFailure::invalid_assertion("signature algorithm not allowed"))?;

        if !self
            .idp_key
            .verify(algorithm, package.signed_octets(), signature)
        {
            return Err(AuthFailure::invalid_assertion("signature verification failed"));
        }

        let response_str = package.response_xml()?;

        debug!("Processing SAML response");

        let response: samael::schema::Response = response_str
            .parse()
            .map_err(|_| AuthFailure::invalid_assertion("failed to parse SAML response"))?;

        // Validate response status
        let status_value = response
            .status
            .as_ref()
            .and_then(|status| status.status_code.value.as_deref());
        if status_value != Some(STATUS_SUCCESS) {
            return Err(AuthFailure::invalid_assertion("SAML status is not success"));
        }

        if let Some(issuer) = response.issuer.as_ref().and_then(|i| i.value.as_deref()) {
            if issuer.trim() != self.idp_issuer {
                return Err(AuthFailure::invalid_assertion(format!(
                    "response issuer is not {}",
                    self.idp_issuer
                )));
            }
        }

        let assertion = response
            .assertion
            .ok_or_else(|| AuthFailure::invalid_assertion("SAML response contains no assertion"))?;

        let assertion_issuer = assertion.issuer.value.as_deref().map(str::trim);
        if assertion_issuer != Some(self.idp_issuer.as_str()) {
            return Err(AuthFailure::invalid_assertion(format!(
                "assertion issuer is not {}",
                self.idp_issuer
            )));
        }

        Ok(assertion)
    }

    /// Check the validity window with clock skew tolerance.
    ///
    /// Returns the instant after which the assertion can no longer be accepted.
    pub fn check_validity_window(
        &self,
        assertion: &samael::schema::Assertion,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, AuthFailure> {
        let skew = Duration::seconds(self.config.clock_skew_secs);

        if assertion.issue_instant > now + skew {
            return Err(AuthFailure::expired_or_replayed("assertion issued in the future"));
        }

        let conditions = assertion
            .conditions
            .as_ref()
            .ok_or_else(|| AuthFailure::expired_or_replayed("assertion has no conditions"))?;

        if let Some(not_before) = conditions.not_before {
            if now < not_before - skew {
                return Err(AuthFailure::expired_or_replayed("assertion not yet valid"));
            }
        }

        let not_on_or_after = conditions
            .not_on_or_after
            .ok_or_else(|| AuthFailure::expired_or_replayed("assertion has no NotOnOrAfter"))?;
        let deadline = not_on_or_after + skew;
        if now >= deadline {
            return Err(AuthFailure::expired_or_replayed("assertion has expired"));
        }

        Ok(deadline)
    }

    /// Every audience restriction must name this SP.
    pub fn check_audience(&self, assertion: &samael::schema::Assertion) -> Result<(), AuthFailure> {
        let restrictions = assertion
            .conditions
            .as_ref()
            .and_then(|c| c.audience_restrictions.as_ref())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AuthFailure::audience_mismatch("assertion has no audience restriction"))?;

        let entity_id = self.config.entity_id.trim();
        let accepted = restrictions
            .iter()
            .all(|r| r.audience.iter().any(|a| a.trim() == entity_id));

        if !accepted {
            return Err(AuthFailure::audience_mismatch(format!(
                "audience does not include {}",
                entity_id
            )));
        }
        Ok(())
    }

    /// Extract the subject and bookkeeping values of a checked assertion.
    pub fn extract(
        &self,
        assertion: &samael::schema::Assertion,
        expires_at: DateTime<Utc>,
    ) -> Result<ProcessedAssertion, AuthFailure> {
        let name_id = assertion
            .subject
            .as_ref()
            .and_then(|s| s.name_id.as_ref())
            .ok_or_else(|| AuthFailure::identity_mismatch("assertion has no subject NameID"))?;

        let session_index = assertion
            .authn_statements
            .as_ref()
            .and_then(|stmts| stmts.first())
            .and_then(|s| s.session_index.clone());

        Ok(ProcessedAssertion {
            subject: name_id.value.trim().to_string(),
            assertion_id: assertion.id.clone(),
            idp_issuer: self.idp_issuer.clone(),
            session_index,
            expires_at,
        })
    }
}

/// Result of processing a SAML assertion.
#[derive(Debug, Clone)]
pub struct ProcessedAssertion {
    pub subject: String,
    pub assertion_id: String,
    pub idp_issuer: String,
    pub session_index: Option<String>,
    /// NotOnOrAfter plus clock skew.
    pub expires_at: DateTime<Utc>,
}

/// Deflate and base64 encode for SAML redirect binding.
pub fn deflate_and_encode(xml: &str) -> Result<String> {
    use std::io::Write;

    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(xml.as_bytes())?;
    let compressed = encoder.finish()?;
    Ok(BASE64.encode(compressed))
}
