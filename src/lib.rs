//! Login dispatch between local credentials and SAML federation.
//!
//! The suffix of a username selects exactly one of two verifiers: the local
//! credential store with Argon2 hashes, or a SAML 2.0 identity provider using the
//! HTTP-Redirect binding. Both paths produce the same [`AuthenticatedIdentity`].

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod federated;
pub mod identity;
pub mod local;
pub mod policy;
pub mod saml;
pub mod store;

pub use config::DispatchConfig;
pub use coordinator::{AttemptOutcome, AttemptState, AttemptTrace, AuthCoordinator, LoginProof};
pub use error::{AuthFailure, ConfigError, FailureKind, GENERIC_REJECTION};
pub use federated::FederatedVerifier;
pub use identity::{normalize, AuthMethod, AuthenticatedIdentity};
pub use local::{Credentials, LocalVerifier};
pub use policy::{Classification, DispatchPolicy};
pub use saml::{FederatedAssertion, RedirectInstruction};
pub use store::{CredentialStore, ReplayStore, StoredIdentityRecord};
