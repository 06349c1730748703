//! Detached signatures of the SAML HTTP-Redirect binding.
//!
//! The IdP signs the octet string `SAMLResponse=..&RelayState=..&SigAlg=..` with the
//! key of its signing certificate. Only RSA and ECDSA with SHA-2 digests are accepted.

use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD},
    Engine,
};
use jsonwebtoken::{Algorithm, DecodingKey};
use tracing::debug;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

/// Signature algorithms accepted on redirect-binding messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    RsaSha256,
    RsaSha384,
    RsaSha512,
    EcdsaSha256,
    EcdsaSha384,
}

impl SignatureAlgorithm {
    pub const ALL: [SignatureAlgorithm; 5] = [
        SignatureAlgorithm::RsaSha256,
        SignatureAlgorithm::RsaSha384,
        SignatureAlgorithm::RsaSha512,
        SignatureAlgorithm::EcdsaSha256,
        SignatureAlgorithm::EcdsaSha384,
    ];

    pub fn from_uri(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.uri() == uri)
    }

    pub fn uri(&self) -> &'static str {
        match self {
            SignatureAlgorithm::RsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            SignatureAlgorithm::RsaSha384 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384",
            SignatureAlgorithm::RsaSha512 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512",
            SignatureAlgorithm::EcdsaSha256 => {
                "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256"
            }
            SignatureAlgorithm::EcdsaSha384 => {
                "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384"
            }
        }
    }

    pub fn is_ecdsa(&self) -> bool {
        matches!(
            self,
            SignatureAlgorithm::EcdsaSha256 | SignatureAlgorithm::EcdsaSha384
        )
    }

    fn jwt_algorithm(&self) -> Algorithm {
        match self {
            SignatureAlgorithm::RsaSha256 => Algorithm::RS256,
            SignatureAlgorithm::RsaSha384 => Algorithm::RS384,
            SignatureAlgorithm::RsaSha512 => Algorithm::RS512,
            SignatureAlgorithm::EcdsaSha256 => Algorithm::ES256,
            SignatureAlgorithm::EcdsaSha384 => Algorithm::ES384,
        }
    }
}

/// Public key of the IdP signing certificate.
#[derive(Clone)]
pub struct IdpVerifyingKey {
    key: DecodingKey,
    ecdsa: bool,
    subject: String,
}

impl IdpVerifyingKey {
    /// Load the key from a certificate, given as PEM or as the bare base64 body
    /// found in metadata `X509Certificate` elements.
    pub fn from_certificate(text: &str) -> Result<Self, String> {
        let der = certificate_der(text).ok_or_else(|| "certificate is not valid PEM/base64".to_string())?;

        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| format!("failed to parse certificate: {}", e))?;

        let spki = cert.public_key();
        let raw_key = spki.subject_public_key.data.as_ref();

        let (key, ecdsa) = match spki.parsed() {
            Ok(PublicKey::RSA(_)) => (DecodingKey::from_rsa_der(raw_key), false),
            Ok(PublicKey::EC(_)) => (DecodingKey::from_ec_der(raw_key), true),
            Ok(_) => return Err("certificate key type is not RSA or EC".to_string()),
            Err(e) => return Err(format!("unreadable certificate key: {}", e)),
        };

        Ok(Self {
            key,
            ecdsa,
            subject: cert.subject().to_string(),
        })
    }

    /// Subject DN of the certificate the key came from.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Verify a base64 (standard alphabet) signature over `signed`.
    pub fn verify(&self, algorithm: SignatureAlgorithm, signed: &[u8], signature_b64: &str) -> bool {
        if algorithm.is_ecdsa() != self.ecdsa {
            debug!(algorithm = algorithm.uri(), "Signature algorithm does not match IdP key type");
            return false;
        }

        let compact: String = signature_b64.chars().filter(|c| !c.is_whitespace()).collect();
        let Ok(raw) = BASE64.decode(compact) else {
            return false;
        };

        // jsonwebtoken expects the unpadded URL-safe alphabet.
        let encoded = URL_SAFE_NO_PAD.encode(raw);
        jsonwebtoken::crypto::verify(&encoded, signed, &self.key, algorithm.jwt_algorithm())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for IdpVerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdpVerifyingKey")
            .field("subject", &self.subject)
            .field("ecdsa", &self.ecdsa)
            .finish()
    }
}

/// Extract DER bytes from a PEM certificate or a bare base64 body.
pub fn certificate_der(text: &str) -> Option<Vec<u8>> {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";

    let body = match (text.find(BEGIN), text.find(END)) {
        (Some(start), Some(end)) if start + BEGIN.len() <= end => &text[start + BEGIN.len()..end],
        (None, None) => text,
        _ => return None,
    };

    let b64: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    if b64.is_empty() {
        return None;
    }
    BASE64.decode(b64).ok()
}
