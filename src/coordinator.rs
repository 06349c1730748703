//! Authentication coordinator.
//!
//! Classifies the submitted username, runs exactly one verifier and records the
//! states the attempt went through.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::audit;
use crate::config::DispatchConfig;
use crate::error::{AuthFailure, ConfigError};
use crate::federated::FederatedVerifier;
use crate::identity::AuthenticatedIdentity;
use crate::local::LocalVerifier;
use crate::policy::{Classification, DispatchPolicy};
use crate::saml::{FederatedAssertion, RedirectInstruction};
use crate::store::{CredentialStore, ReplayStore};

/// Proof submitted with a username.
#[derive(Clone)]
pub enum LoginProof {
    Secret(String),
    Assertion(FederatedAssertion),
}

impl LoginProof {
    fn shape(&self) -> &'static str {
        match self {
            LoginProof::Secret(_) => "secret",
            LoginProof::Assertion(_) => "assertion",
        }
    }
}

impl std::fmt::Debug for LoginProof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoginProof::Secret(_) => f.write_str("Secret(<redacted>)"),
            LoginProof::Assertion(assertion) => f.debug_tuple("Assertion").field(assertion).finish(),
        }
    }
}

/// States of a single login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    AwaitingInput,
    Classified,
    LocalPending,
    FederatedPending,
    Authenticated,
    Rejected,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Authenticated | AttemptState::Rejected)
    }
}

/// Ordered states visited by one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptTrace {
    states: Vec<AttemptState>,
}

impl AttemptTrace {
    fn start() -> Self {
        Self {
            states: vec![AttemptState::AwaitingInput],
        }
    }

    /// Append a state. Ignored once a terminal state is reached.
    fn advance(&mut self, state: AttemptState) {
        if self.is_finished() {
            return;
        }
        self.states.push(state);
    }

    pub fn states(&self) -> &[AttemptState] {
        &self.states
    }

    pub fn current(&self) -> AttemptState {
        self.states
            .last()
            .copied()
            .unwrap_or(AttemptState::AwaitingInput)
    }

    pub fn is_finished(&self) -> bool {
        self.current().is_terminal()
    }
}

/// Result of one attempt together with its trace.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub classification: Classification,
    pub trace: AttemptTrace,
    pub result: Result<AuthenticatedIdentity, AuthFailure>,
}

/// Entry point for every login.
pub struct AuthCoordinator {
    config: Arc<DispatchConfig>,
    policy: DispatchPolicy,
    local: LocalVerifier,
    federated: FederatedVerifier,
}

impl AuthCoordinator {
    /// Build a coordinator. Fails on any configuration error.
    pub fn new(
        config: Arc<DispatchConfig>,
        credentials: Arc<dyn CredentialStore>,
        replay: Arc<dyn ReplayStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            policy: config.policy()?,
            local: LocalVerifier::new(&config, Arc::clone(&credentials))?,
            federated: FederatedVerifier::new(&config, credentials, replay)?,
            config,
        })
    }

    pub fn config(&self) -> &Arc<DispatchConfig> {
        &self.config
    }

    pub fn classify(&self, username: &str) -> Classification {
        self.policy.classify(username)
    }

    pub fn begin_federated_login(&self, relay_state: Option<&str>) -> Result<RedirectInstruction> {
        self.federated.begin_federated_login(relay_state)
    }

    pub fn begin_federated_login_at(
        &self,
        request_id: &str,
        issue_instant: DateTime<Utc>,
        relay_state: Option<&str>,
    ) -> Result<RedirectInstruction> {
        self.federated
            .begin_federated_login_at(request_id, issue_instant, relay_state)
    }

    pub async fn verify_local(
        &self,
        username: &str,
        secret: &str,
    ) -> Result<AuthenticatedIdentity, AuthFailure> {
        self.local.verify_local(username, secret).await
    }

    pub async fn verify_federated(
        &self,
        assertion: &FederatedAssertion,
    ) -> Result<AuthenticatedIdentity, AuthFailure> {
        self.federated.verify_federated(assertion).await
    }

    /// Authenticate a username with its proof.
    pub async fn authenticate(
        &self,
        username: &str,
        proof: LoginProof,
    ) -> Result<AuthenticatedIdentity, AuthFailure> {
        self.attempt(username, proof).await.result
    }

    pub async fn attempt(&self, username: &str, proof: LoginProof) -> AttemptOutcome {
        self.attempt_at(username, proof, Utc::now()).await
    }

    /// Run one attempt as of `now`.
    pub async fn attempt_at(
        &self,
        username: &str,
        proof: LoginProof,
        now: DateTime<Utc>,
    ) -> AttemptOutcome {
        let mut trace = AttemptTrace::start();

        let classification = self.policy.classify(username);
        trace.advance(AttemptState::Classified);
        debug!(username = %username, classification = %classification, "Username classified");

        let result = match (classification, proof) {
            (Classification::Invalid, _) => Err(AuthFailure::not_applicable(
                "username matches no configured domain marker",
            )),
            (Classification::Local, LoginProof::Secret(secret)) => {
                trace.advance(AttemptState::LocalPending);
                self.local.check(username, &secret).await
            }
            (Classification::Federated, LoginProof::Assertion(assertion)) => {
                trace.advance(AttemptState::FederatedPending);
                self.federated
                    .check(&assertion, now)
                    .await
                    .and_then(|identity| match_subject(username, identity))
            }
            (classification, proof) => Err(AuthFailure::not_applicable(format!(
                "{} login does not accept {} proof",
                classification,
                proof.shape()
            ))),
        };

        match &result {
            Ok(identity) => {
                trace.advance(AttemptState::Authenticated);
                audit::login_accepted(identity);
            }
            Err(failure) => {
                trace.advance(AttemptState::Rejected);
                audit::login_rejected(username, classification.method(), failure);
            }
        }

        AttemptOutcome {
            classification,
            trace,
            result,
        }
    }
}

/// The verified subject must be the username that was submitted.
fn match_subject(
    username: &str,
    identity: AuthenticatedIdentity,
) -> Result<AuthenticatedIdentity, AuthFailure> {
    if identity.username().trim().to_lowercase() == username.trim().to_lowercase() {
        Ok(identity)
    } else {
        Err(AuthFailure::identity_mismatch(
            "assertion subject differs from submitted username",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, GENERIC_REJECTION};
    use crate::identity::AuthMethod;
    use crate::local::{HashPolicy, SecretHasher};
    use crate::saml::testkit::{self, AssertionSpec};
    use crate::store::{MemoryCredentialStore, MemoryReplayStore, StoredIdentityRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use AttemptState::*;

    fn config() -> DispatchConfig {
        DispatchConfig {
            local_domain_marker: "@dbauth.com".to_string(),
            federated_domain_marker: "@oktaauth.com".to_string(),
            saml: testkit::saml_config(),
            ..Default::default()
        }
    }

    /// Credential store that counts lookups.
    struct CountingStore {
        inner: MemoryCredentialStore,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl CredentialStore for CountingStore {
        async fn find_by_username(
            &self,
            username: &str,
        ) -> anyhow::Result<Option<StoredIdentityRecord>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.find_by_username(username).await
        }
    }

    struct Fixture {
        coordinator: AuthCoordinator,
        credentials: Arc<CountingStore>,
        replay: Arc<MemoryReplayStore>,
    }

    fn fixture() -> Fixture {
        let hasher = SecretHasher::new(HashPolicy {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        });
        let inner = MemoryCredentialStore::new();
        inner
            .insert(StoredIdentityRecord::local(
                "dbuser@dbauth.com",
                hasher.hash("oktaiscool").unwrap(),
            ))
            .unwrap();
        inner
            .insert(StoredIdentityRecord::federated("samluser@oktaauth.com"))
            .unwrap();
        inner
            .insert(StoredIdentityRecord::federated("otheruser@oktaauth.com"))
            .unwrap();

        let credentials = Arc::new(CountingStore {
            inner,
            lookups: AtomicUsize::new(0),
        });
        let replay = Arc::new(MemoryReplayStore::new());
        let coordinator = AuthCoordinator::new(
            Arc::new(config()),
            credentials.clone(),
            replay.clone(),
        )
        .unwrap();

        Fixture {
            coordinator,
            credentials,
            replay,
        }
    }

    #[tokio::test]
    async fn test_local_scenario() {
        let fx = fixture();
        let outcome = fx
            .coordinator
            .attempt("dbuser@dbauth.com", LoginProof::Secret("oktaiscool".to_string()))
            .await;

        let identity = outcome.result.unwrap();
        assert_eq!(identity.username(), "dbuser@dbauth.com");
        assert_eq!(identity.method(), AuthMethod::Local);
        assert_eq!(outcome.classification, Classification::Local);
        assert_eq!(
            outcome.trace.states(),
            &[AwaitingInput, Classified, LocalPending, Authenticated]
        );
    }

    #[tokio::test]
    async fn test_federated_scenario() {
        let fx = fixture();
        let package = testkit::signed_package(&AssertionSpec::fresh("samluser@oktaauth.com"));
        let outcome = fx
            .coordinator
            .attempt("samluser@oktaauth.com", LoginProof::Assertion(package))
            .await;

        let identity = outcome.result.unwrap();
        assert_eq!(identity.username(), "samluser@oktaauth.com");
        assert_eq!(identity.method(), AuthMethod::Federated);
        assert_eq!(
            outcome.trace.states(),
            &[AwaitingInput, Classified, FederatedPending, Authenticated]
        );
    }

    #[tokio::test]
    async fn test_unknown_domain_rejected_before_verifiers() {
        let fx = fixture();
        assert_eq!(
            fx.coordinator.classify("nobody@unknown.com"),
            Classification::Invalid
        );

        let outcome = fx
            .coordinator
            .attempt("nobody@unknown.com", LoginProof::Secret("oktaiscool".to_string()))
            .await;

        let err = outcome.result.unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotApplicable);
        assert_eq!(outcome.trace.states(), &[AwaitingInput, Classified, Rejected]);
        assert_eq!(fx.credentials.lookups.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_overlapping_markers_fail_startup() {
        let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
        let replay: Arc<dyn ReplayStore> = Arc::new(MemoryReplayStore::new());

        let mut both_empty = config();
        both_empty.local_domain_marker = String::new();
        both_empty.federated_domain_marker = String::new();
        assert!(matches!(
            AuthCoordinator::new(Arc::new(both_empty), credentials.clone(), replay.clone()),
            Err(ConfigError::OverlappingMarkers { .. })
        ));

        let mut nested = config();
        nested.local_domain_marker = "@auth.com".to_string();
        nested.federated_domain_marker = "@AUTH.COM".to_string();
        assert!(matches!(
            AuthCoordinator::new(Arc::new(nested), credentials, replay),
            Err(ConfigError::OverlappingMarkers { .. })
        ));
    }

    #[tokio::test]
    async fn test_wrong_proof_shape_runs_no_verifier() {
        let fx = fixture();

        let package = testkit::signed_package(&AssertionSpec::fresh("samluser@oktaauth.com"));
        let outcome = fx
            .coordinator
            .attempt("dbuser@dbauth.com", LoginProof::Assertion(package))
            .await;
        assert_eq!(outcome.result.unwrap_err().kind(), FailureKind::NotApplicable);
        assert_eq!(outcome.trace.states(), &[AwaitingInput, Classified, Rejected]);

        let outcome = fx
            .coordinator
            .attempt("samluser@oktaauth.com", LoginProof::Secret("oktaiscool".to_string()))
            .await;
        assert_eq!(outcome.result.unwrap_err().kind(), FailureKind::NotApplicable);

        assert_eq!(fx.credentials.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_secret_never_authenticates() {
        let fx = fixture();
        let outcome = fx
            .coordinator
            .attempt("dbuser@dbauth.com", LoginProof::Secret("OKTAISCOOL".to_string()))
            .await;

        let err = outcome.result.unwrap_err();
        assert_eq!(err.kind(), FailureKind::BadCredentials);
        assert_eq!(err.public_message(), GENERIC_REJECTION);
        assert_eq!(outcome.trace.current(), Rejected);
    }

    #[tokio::test]
    async fn test_subject_must_match_submitted_username() {
        let fx = fixture();
        let package = testkit::signed_package(&AssertionSpec::fresh("otheruser@oktaauth.com"));
        let err = fx
            .coordinator
            .authenticate("samluser@oktaauth.com", LoginProof::Assertion(package))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::IdentityMismatch);
    }

    #[tokio::test]
    async fn test_subject_match_ignores_case() {
        let fx = fixture();
        let package = testkit::signed_package(&AssertionSpec::fresh("samluser@oktaauth.com"));
        let identity = fx
            .coordinator
            .authenticate("SamlUser@OktaAuth.com", LoginProof::Assertion(package))
            .await
            .unwrap();
        assert_eq!(identity.username(), "samluser@oktaauth.com");
    }

    #[tokio::test]
    async fn test_tampered_signature_always_invalid() {
        let fx = fixture();
        for subject in ["samluser@oktaauth.com", "dbuser@dbauth.com", "nobody@unknown.com"] {
            let spec = AssertionSpec::fresh(subject);
            let package = testkit::package_signed_with(
                &testkit::response_xml(&spec),
                None,
                crate::saml::SignatureAlgorithm::RsaSha256,
                testkit::ROGUE_RSA_KEY,
            );
            let err = fx.coordinator.verify_federated(&package).await.unwrap_err();
            assert_eq!(err.kind(), FailureKind::InvalidAssertion);
            assert!(!fx.replay.seen(&spec.id).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_replay_through_coordinator() {
        let fx = fixture();
        let package = testkit::signed_package(&AssertionSpec::fresh("samluser@oktaauth.com"));

        fx.coordinator
            .authenticate("samluser@oktaauth.com", LoginProof::Assertion(package.clone()))
            .await
            .unwrap();
        let err = fx
            .coordinator
            .authenticate("samluser@oktaauth.com", LoginProof::Assertion(package))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::ExpiredOrReplayed);
    }

    #[tokio::test]
    async fn test_attempts_are_independent() {
        let fx = fixture();
        let coordinator = &fx.coordinator;

        let (good, bad, unknown) = tokio::join!(
            coordinator.authenticate("dbuser@dbauth.com", LoginProof::Secret("oktaiscool".to_string())),
            coordinator.authenticate("dbuser@dbauth.com", LoginProof::Secret("wrong".to_string())),
            coordinator.authenticate("nobody@unknown.com", LoginProof::Secret("oktaiscool".to_string())),
        );

        assert!(good.is_ok());
        assert_eq!(bad.unwrap_err().kind(), FailureKind::BadCredentials);
        assert_eq!(unknown.unwrap_err().kind(), FailureKind::NotApplicable);
    }

    #[tokio::test]
    async fn test_caller_boundary_delegates() {
        let fx = fixture();
        let identity = fx
            .coordinator
            .verify_local("dbuser@dbauth.com", "oktaiscool")
            .await
            .unwrap();
        assert_eq!(identity.method(), AuthMethod::Local);

        let redirect = fx.coordinator.begin_federated_login(Some("/home")).unwrap();
        assert!(redirect.url.contains("RelayState=%2Fhome"));
    }

    #[test]
    fn test_trace_is_final_after_terminal_state() {
        let mut trace = AttemptTrace::start();
        trace.advance(Classified);
        trace.advance(Rejected);
        trace.advance(Authenticated);
        assert_eq!(trace.states(), &[AwaitingInput, Classified, Rejected]);
        assert!(trace.is_finished());
    }

    #[test]
    fn test_proof_debug_redacts_secret() {
        let debug = format!("{:?}", LoginProof::Secret("oktaiscool".to_string()));
        assert!(!debug.contains("oktaiscool"));
    }
}
