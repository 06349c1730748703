//! Federated login through the SAML identity provider.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::audit;
use crate::config::DispatchConfig;
use crate::error::{AuthFailure, ConfigError};
use crate::identity::{normalize, AuthMethod, AuthenticatedIdentity};
use crate::policy::{Classification, DispatchPolicy};
use crate::saml::{FederatedAssertion, RedirectInstruction, SamlProvider};
use crate::store::{bounded, CredentialStore, ReplayStore};

/// Verifier for the federated login path.
pub struct FederatedVerifier {
    policy: DispatchPolicy,
    provider: SamlProvider,
    credentials: Arc<dyn CredentialStore>,
    replay: Arc<dyn ReplayStore>,
    upstream_timeout: Duration,
}

impl FederatedVerifier {
    /// Build a verifier. IdP metadata must already be resolved into `config`.
    pub fn new(
        config: &DispatchConfig,
        credentials: Arc<dyn CredentialStore>,
        replay: Arc<dyn ReplayStore>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            policy: config.policy()?,
            provider: SamlProvider::new(config.saml.clone())?,
            credentials,
            replay,
            upstream_timeout: config.upstream_timeout(),
        })
    }

    pub fn provider(&self) -> &SamlProvider {
        &self.provider
    }

    /// Start an SP-initiated login.
    pub fn begin_federated_login(&self, relay_state: Option<&str>) -> Result<RedirectInstruction> {
        self.provider.create_authn_request(relay_state)
    }

    /// Start an SP-initiated login with a caller-chosen request ID and instant.
    pub fn begin_federated_login_at(
        &self,
        request_id: &str,
        issue_instant: DateTime<Utc>,
        relay_state: Option<&str>,
    ) -> Result<RedirectInstruction> {
        self.provider
            .create_authn_request_at(request_id, issue_instant, relay_state)
    }

    /// Verify a signed response from the IdP.
    pub async fn verify_federated(
        &self,
        package: &FederatedAssertion,
    ) -> Result<AuthenticatedIdentity, AuthFailure> {
        self.verify_federated_at(package, Utc::now()).await
    }

    pub async fn verify_federated_at(
        &self,
        package: &FederatedAssertion,
        now: DateTime<Utc>,
    ) -> Result<AuthenticatedIdentity, AuthFailure> {
        let mut subject = None;
        let outcome = self.check_with_subject(package, now, &mut subject).await;
        match &outcome {
            Ok(identity) => audit::login_accepted(identity),
            Err(failure) => audit::login_rejected(
                subject.as_deref().unwrap_or("<unverified>"),
                Some(AuthMethod::Federated),
                failure,
            ),
        }
        outcome
    }

    pub(crate) async fn check(
        &self,
        package: &FederatedAssertion,
        now: DateTime<Utc>,
    ) -> Result<AuthenticatedIdentity, AuthFailure> {
        self.check_with_subject(package, now, &mut None).await
    }

    /// Run the checks, leaving the subject in `subject` once the signed
    /// assertion has yielded one.
    async fn check_with_subject(
        &self,
        package: &FederatedAssertion,
        now: DateTime<Utc>,
        subject: &mut Option<String>,
    ) -> Result<AuthenticatedIdentity, AuthFailure> {
        let assertion = self.provider.verify_origin(package)?;
        let expires_at = self.provider.check_validity_window(&assertion, now)?;

        let replayed = bounded(
            self.upstream_timeout,
            "replay store",
            self.replay.seen(&assertion.id),
        )
        .await?;
        if replayed {
            return Err(AuthFailure::expired_or_replayed("assertion already consumed"));
        }

        self.provider.check_audience(&assertion)?;

        let processed = self.provider.extract(&assertion, expires_at)?;
        *subject = Some(processed.subject.clone());
        if self.policy.classify(&processed.subject) != Classification::Federated {
            return Err(AuthFailure::identity_mismatch(
                "assertion subject is not a federated username",
            ));
        }

        bounded(
            self.upstream_timeout,
            "replay store",
            self.replay.record(&processed.assertion_id, processed.expires_at),
        )
        .await?;

        debug!(
            assertion_id = %processed.assertion_id,
            session_index = ?processed.session_index,
            "Assertion consumed"
        );

        let record = bounded(
            self.upstream_timeout,
            "credential store",
            self.credentials.find_by_username(&processed.subject),
        )
        .await?
        .ok_or_else(AuthFailure::not_found)?;

        info!(
            user_id = %record.username,
            idp = %processed.idp_issuer,
            "SAML assertion validated"
        );

        Ok(normalize(&record, AuthMethod::Federated))
    }
}
