//! Local credential verification.
//!
//! Usernames carrying the local marker are checked against the Argon2 hash held by
//! the credential store.

pub mod password;

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::audit;
use crate::config::DispatchConfig;
use crate::error::{AuthFailure, ConfigError};
use crate::identity::{normalize, AuthMethod, AuthenticatedIdentity};
use crate::policy::{Classification, DispatchPolicy};
use crate::store::{bounded, CredentialStore};

pub use password::{HashPolicy, SecretCheck, SecretHasher};

/// Username and secret submitted for a local login.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Verifier for the local login path.
pub struct LocalVerifier {
    policy: DispatchPolicy,
    store: Arc<dyn CredentialStore>,
    hasher: SecretHasher,
    upstream_timeout: Duration,
}

impl LocalVerifier {
    pub fn new(
        config: &DispatchConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            policy: config.policy()?,
            store,
            hasher: SecretHasher::default(),
            upstream_timeout: config.upstream_timeout(),
        })
    }

    /// Verify a username and secret.
    pub async fn verify_local(
        &self,
        username: &str,
        secret: &str,
    ) -> Result<AuthenticatedIdentity, AuthFailure> {
        let outcome = self.check(username, secret).await;
        match &outcome {
            Ok(identity) => audit::login_accepted(identity),
            Err(failure) => audit::login_rejected(username, Some(AuthMethod::Local), failure),
        }
        outcome
    }

    pub async fn verify_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthenticatedIdentity, AuthFailure> {
        self.verify_local(&credentials.username, &credentials.secret)
            .await
    }

    pub(crate) async fn check(&self, username: &str, secret: &str) -> Result<AuthenticatedIdentity, AuthFailure> {
        let classification = self.policy.classify(username);
        if classification != Classification::Local {
            return Err(AuthFailure::not_applicable(format!(
                "username classified as {}",
                classification
            )));
        }

        let record = bounded(
            self.upstream_timeout,
            "credential store",
            self.store.find_by_username(username),
        )
        .await?
        .ok_or_else(AuthFailure::not_found)?;

        let Some(stored_hash) = record.secret_hash.as_deref() else {
            return Err(AuthFailure::bad_credentials("record has no secret hash"));
        };

        match self.hasher.verify(secret, stored_hash) {
            SecretCheck::Match => {
                debug!(username = %record.username, "Local secret verified");
                Ok(normalize(&record, AuthMethod::Local))
            }
            SecretCheck::Mismatch => Err(AuthFailure::bad_credentials("secret mismatch")),
            SecretCheck::UnusableHash => {
                Err(AuthFailure::bad_credentials("stored hash is not usable"))
            }
        }
    }
}
