//! SAML 2.0 service provider for the HTTP-Redirect binding.
//!
//! Provides SP-initiated SSO requests and verification of signed responses.

pub mod assertion;
pub mod config;
pub mod metadata;
pub mod provider;
pub mod signature;

#[cfg(test)]
pub(crate) mod testkit;

pub use assertion::FederatedAssertion;
pub use config::SamlConfig;
pub use metadata::{fetch_metadata, parse_metadata, IdpMetadata};
pub use provider::{ProcessedAssertion, RedirectInstruction, SamlProvider};
pub use signature::SignatureAlgorithm;
