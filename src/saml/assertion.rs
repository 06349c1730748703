//! SAML HTTP-Redirect binding response package.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::io::Read;

use crate::error::AuthFailure;

/// Upper bound on the inflated response document.
const MAX_RESPONSE_BYTES: u64 = 256 * 1024;

/// Signed response delivered to the ACS URL.
///
/// The raw, still URL-encoded query values are kept because the detached signature
/// covers them byte for byte.
#[derive(Clone)]
pub struct FederatedAssertion {
    saml_response: String,
    relay_state: Option<String>,
    sig_alg: Option<String>,
    signature: Option<String>,
    signed_octets: String,
}

impl FederatedAssertion {
    /// Parse the query string of an ACS callback.
    pub fn from_query(query: &str) -> Result<Self, AuthFailure> {
        let query = query.trim().trim_start_matches('?');

        let mut raw_response = None;
        let mut raw_relay_state = None;
        let mut raw_sig_alg = None;
        let mut raw_signature = None;

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let slot = match key {
                "SAMLResponse" => &mut raw_response,
                "RelayState" => &mut raw_relay_state,
                "SigAlg" => &mut raw_sig_alg,
                "Signature" => &mut raw_signature,
                _ => continue,
            };
            if slot.is_some() {
                return Err(AuthFailure::invalid_assertion(format!(
                    "duplicate {} parameter",
                    key
                )));
            }
            *slot = Some(value);
        }

        let raw_response = raw_response
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AuthFailure::invalid_assertion("missing SAMLResponse parameter"))?;

        let mut signed_octets = format!("SAMLResponse={}", raw_response);
        if let Some(relay_state) = raw_relay_state {
            signed_octets.push_str("&RelayState=");
            signed_octets.push_str(relay_state);
        }
        if let Some(sig_alg) = raw_sig_alg {
            signed_octets.push_str("&SigAlg=");
            signed_octets.push_str(sig_alg);
        }

        Ok(Self {
            saml_response: form_decode(raw_response)?,
            relay_state: raw_relay_state.map(form_decode).transpose()?,
            sig_alg: raw_sig_alg.map(form_decode).transpose()?,
            signature: raw_signature.map(form_decode).transpose()?,
            signed_octets,
        })
    }

    /// Build a package from decoded values, as a caller that has already parsed
    /// the query would.
    pub fn from_parts(
        saml_response: impl Into<String>,
        relay_state: Option<String>,
        sig_alg: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        let saml_response = saml_response.into();
        let sig_alg = sig_alg.into();
        let signed_octets = signed_octets(&saml_response, relay_state.as_deref(), &sig_alg);

        Self {
            saml_response,
            relay_state,
            sig_alg: Some(sig_alg),
            signature: Some(signature.into()),
            signed_octets,
        }
    }

    pub fn relay_state(&self) -> Option<&str> {
        self.relay_state.as_deref()
    }

    pub(crate) fn sig_alg(&self) -> Option<&str> {
        self.sig_alg.as_deref()
    }

    pub(crate) fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub(crate) fn signed_octets(&self) -> &[u8] {
        self.signed_octets.as_bytes()
    }

    /// Base64-decode and inflate the response document.
    pub(crate) fn response_xml(&self) -> Result<String, AuthFailure> {
        let compact: String = self
            .saml_response
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let compressed = BASE64
            .decode(compact)
            .map_err(|_| AuthFailure::invalid_assertion("SAMLResponse is not valid base64"))?;

        let mut xml = String::new();
        flate2::read::DeflateDecoder::new(compressed.as_slice())
            .take(MAX_RESPONSE_BYTES + 1)
            .read_to_string(&mut xml)
            .map_err(|_| AuthFailure::invalid_assertion("SAMLResponse is not deflated UTF-8 XML"))?;

        if xml.len() as u64 > MAX_RESPONSE_BYTES {
            return Err(AuthFailure::invalid_assertion("SAMLResponse is too large"));
        }

        Ok(xml)
    }
}

impl std::fmt::Debug for FederatedAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederatedAssertion")
            .field("saml_response", &"<redacted>")
            .field("relay_state", &self.relay_state)
            .field("sig_alg", &self.sig_alg)
            .field("signature", &self.signature.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Octets covered by a redirect-binding signature, built from decoded values.
pub(crate) fn signed_octets(saml_response: &str, relay_state: Option<&str>, sig_alg: &str) -> String {
    let mut octets = format!("SAMLResponse={}", urlencoding::encode(saml_response));
    if let Some(relay_state) = relay_state {
        octets.push_str(&format!("&RelayState={}", urlencoding::encode(relay_state)));
    }
    octets.push_str(&format!("&SigAlg={}", urlencoding::encode(sig_alg)));
    octets
}

fn form_decode(value: &str) -> Result<String, AuthFailure> {
    let value = value.replace('+', " ");
    urlencoding::decode(&value)
        .map(|v| v.into_owned())
        .map_err(|_| AuthFailure::invalid_assertion("query parameter is not valid UTF-8"))
}
