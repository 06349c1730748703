//! IdP metadata retrieval.
//!
//! Only the three values the SP needs are read from the EntityDescriptor: the
//! entity ID, the HTTP-Redirect SSO location and the signing certificate.

use anyhow::{anyhow, Context, Result};
use samael::metadata::EntityDescriptor;
use std::time::Duration;
use tracing::{debug, info};

const REDIRECT_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";

/// Values taken from IdP metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdpMetadata {
    pub entity_id: Option<String>,
    pub sso_url: Option<String>,
    /// Base64 DER body of the signing certificate.
    pub signing_certificate: Option<String>,
}

/// Fetch and parse IdP metadata.
pub async fn fetch_metadata(url: &str, timeout: Duration) -> Result<IdpMetadata> {
    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")?;

    debug!(url = %url, "Fetching IdP metadata");

    let response = http_client
        .get(url)
        .send()
        .await
        .context("Failed to fetch IdP metadata")?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Metadata endpoint returned status {}",
            response.status()
        ));
    }

    let xml = response
        .text()
        .await
        .context("Failed to read IdP metadata")?;

    let metadata = parse_metadata(&xml)?;
    info!(
        entity_id = ?metadata.entity_id,
        sso_url = ?metadata.sso_url,
        has_certificate = metadata.signing_certificate.is_some(),
        "Loaded IdP metadata"
    );
    Ok(metadata)
}

/// Parse an EntityDescriptor document.
///
/// Only the IDPSSODescriptor is consulted; keys published for other roles are
/// ignored.
pub fn parse_metadata(xml: &str) -> Result<IdpMetadata> {
    let descriptor: EntityDescriptor = xml
        .parse()
        .map_err(|e| anyhow!("Failed to parse IdP metadata: {}", e))?;

    let idp = descriptor
        .idp_sso_descriptors
        .as_deref()
        .and_then(|descriptors| descriptors.first())
        .ok_or_else(|| anyhow!("Metadata contains no IDPSSODescriptor"))?;

    let sso_url = idp
        .single_sign_on_services
        .iter()
        .find(|service| service.binding == REDIRECT_BINDING)
        .map(|service| service.location.trim().to_string());

    let signing_certificate = idp
        .key_descriptors
        .iter()
        .filter(|key| key.key_use.as_deref() != Some("encryption"))
        .filter_map(|key| key.key_info.x509_data.as_ref())
        .flat_map(|data| data.certificates.iter())
        .map(|cert| cert.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .find(|cert| !cert.is_empty());

    Ok(IdpMetadata {
        entity_id: descriptor.entity_id.map(|id| id.trim().to_string()),
        sso_url,
        signing_certificate,
    })
}
