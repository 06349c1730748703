//! In-process identity provider for tests.
//!
//! Renders Response documents and signs redirect-binding queries with the
//! fixture keys in `testdata/`.

use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD},
    Engine,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::EncodingKey;
use std::io::Read;

use super::assertion::FederatedAssertion;
use super::config::SamlConfig;
use super::provider::deflate_and_encode;
use super::signature::SignatureAlgorithm;

pub const IDP_RSA_KEY: &str = include_str!("testdata/idp-signing.key");
pub const IDP_RSA_CERT: &str = include_str!("testdata/idp-signing.crt");
pub const IDP_EC_KEY: &str = include_str!("testdata/idp-ec.key");
pub const IDP_EC_CERT: &str = include_str!("testdata/idp-ec.crt");
pub const ROGUE_RSA_KEY: &str = include_str!("testdata/rogue-signing.key");

pub const IDP_ISSUER: &str = "https://idp.oktaauth.test";
pub const SP_ENTITY_ID: &str = "https://sp.dispatch.test";

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

pub fn saml_config() -> SamlConfig {
    SamlConfig {
        entity_id: SP_ENTITY_ID.to_string(),
        acs_url: format!("{}/saml/acs", SP_ENTITY_ID),
        idp_sso_url: Some(format!("{}/sso", IDP_ISSUER)),
        idp_issuer: Some(IDP_ISSUER.to_string()),
        idp_certificate_pem: Some(IDP_RSA_CERT.to_string()),
        ..Default::default()
    }
}

/// Sign `message` and return the signature in the standard base64 alphabet.
pub fn sign(key_pem: &str, algorithm: SignatureAlgorithm, message: &[u8]) -> String {
    let (key, alg) = match algorithm {
        SignatureAlgorithm::RsaSha256 => (EncodingKey::from_rsa_pem(key_pem.as_bytes()), jsonwebtoken::Algorithm::RS256),
        SignatureAlgorithm::RsaSha384 => (EncodingKey::from_rsa_pem(key_pem.as_bytes()), jsonwebtoken::Algorithm::RS384),
        SignatureAlgorithm::RsaSha512 => (EncodingKey::from_rsa_pem(key_pem.as_bytes()), jsonwebtoken::Algorithm::RS512),
        SignatureAlgorithm::EcdsaSha256 => (EncodingKey::from_ec_pem(key_pem.as_bytes()), jsonwebtoken::Algorithm::ES256),
        SignatureAlgorithm::EcdsaSha384 => (EncodingKey::from_ec_pem(key_pem.as_bytes()), jsonwebtoken::Algorithm::ES384),
    };
    let key = key.expect("fixture key");
    let signature = jsonwebtoken::crypto::sign(message, &key, alg).expect("sign");
    let raw = URL_SAFE_NO_PAD.decode(signature).expect("jwt signature encoding");
    BASE64.encode(raw)
}

/// Contents of one test assertion.
#[derive(Debug, Clone)]
pub struct AssertionSpec {
    pub id: String,
    pub subject: String,
    pub issuer: String,
    pub audience: Option<String>,
    pub status: String,
    pub issue_instant: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub not_on_or_after: DateTime<Utc>,
}

impl AssertionSpec {
    /// A valid assertion for `subject`, issued now and good for five minutes.
    pub fn fresh(subject: &str) -> Self {
        let now = Utc::now();
        Self {
            id: format!("_a{}", uuid::Uuid::new_v4().simple()),
            subject: subject.to_string(),
            issuer: IDP_ISSUER.to_string(),
            audience: Some(SP_ENTITY_ID.to_string()),
            status: STATUS_SUCCESS.to_string(),
            issue_instant: now,
            not_before: now - Duration::seconds(30),
            not_on_or_after: now + Duration::minutes(5),
        }
    }
}

fn instant(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn response_xml(spec: &AssertionSpec) -> String {
    let audience = spec
        .audience
        .as_ref()
        .map(|a| {
            format!(
                "<saml2:AudienceRestriction><saml2:Audience>{}</saml2:Audience></saml2:AudienceRestriction>",
                a
            )
        })
        .unwrap_or_default();

    format!(
        r#"<saml2p:Response xmlns:saml2p="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion" ID="_r{id}" Version="2.0" IssueInstant="{issued}" Destination="{sp}/saml/acs">
<saml2:Issuer>{issuer}</saml2:Issuer>
<saml2p:Status><saml2p:StatusCode Value="{status}"/></saml2p:Status>
<saml2:Assertion ID="{id}" Version="2.0" IssueInstant="{issued}">
<saml2:Issuer>{issuer}</saml2:Issuer>
<saml2:Subject><saml2:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress">{subject}</saml2:NameID></saml2:Subject>
<saml2:Conditions NotBefore="{not_before}" NotOnOrAfter="{not_on_or_after}">{audience}</saml2:Conditions>
<saml2:AuthnStatement AuthnInstant="{issued}" SessionIndex="{id}"><saml2:AuthnContext><saml2:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport</saml2:AuthnContextClassRef></saml2:AuthnContext></saml2:AuthnStatement>
</saml2:Assertion>
</saml2p:Response>"#,
        id = spec.id,
        issued = instant(spec.issue_instant),
        sp = SP_ENTITY_ID,
        issuer = spec.issuer,
        status = spec.status,
        subject = spec.subject,
        not_before = instant(spec.not_before),
        not_on_or_after = instant(spec.not_on_or_after),
        audience = audience,
    )
}

/// Deflate, encode and sign a response document as an IdP would.
pub fn package_signed_with(
    xml: &str,
    relay_state: Option<&str>,
    algorithm: SignatureAlgorithm,
    key_pem: &str,
) -> FederatedAssertion {
    let encoded = deflate_and_encode(xml).expect("deflate");

    let mut query = format!("SAMLResponse={}", urlencoding::encode(&encoded));
    if let Some(relay_state) = relay_state {
        query.push_str(&format!("&RelayState={}", urlencoding::encode(relay_state)));
    }
    query.push_str(&format!("&SigAlg={}", urlencoding::encode(algorithm.uri())));

    let signature = sign(key_pem, algorithm, query.as_bytes());
    query.push_str(&format!("&Signature={}", urlencoding::encode(&signature)));

    FederatedAssertion::from_query(&query).expect("valid query")
}

pub fn signed_package(spec: &AssertionSpec) -> FederatedAssertion {
    package_signed_with(
        &response_xml(spec),
        None,
        SignatureAlgorithm::RsaSha256,
        IDP_RSA_KEY,
    )
}

pub fn signed_package_with_relay_state(spec: &AssertionSpec, relay_state: &str) -> FederatedAssertion {
    package_signed_with(
        &response_xml(spec),
        Some(relay_state),
        SignatureAlgorithm::RsaSha256,
        IDP_RSA_KEY,
    )
}

pub fn inflate(encoded: &str) -> String {
    let compressed = BASE64.decode(encoded).expect("base64");
    let mut xml = String::new();
    flate2::read::DeflateDecoder::new(compressed.as_slice())
        .read_to_string(&mut xml)
        .expect("inflate");
    xml
}
