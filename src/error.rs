//! Failure taxonomy for login attempts and startup configuration.

use serde::Serialize;
use thiserror::Error;

/// Message shown to end users for every rejected login.
pub const GENERIC_REJECTION: &str = "Invalid username or password";

/// Classified reason a login attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The username belongs to the other verifier path.
    NotApplicable,
    /// No stored identity record for the username.
    NotFound,
    /// The presented secret did not match the stored hash.
    BadCredentials,
    /// Signature, encoding, status or issuer of the assertion is unacceptable.
    InvalidAssertion,
    /// Assertion outside its validity window or already consumed.
    ExpiredOrReplayed,
    /// Assertion was issued for a different service.
    AudienceMismatch,
    /// Assertion subject does not carry the federated marker or the expected name.
    IdentityMismatch,
    /// A store call exceeded the upstream timeout.
    UpstreamTimeout,
    /// A store call failed before the timeout elapsed.
    UpstreamUnavailable,
}

impl FailureKind {
    /// Stable code used in audit records.
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::NotApplicable => "NOT_APPLICABLE",
            FailureKind::NotFound => "NOT_FOUND",
            FailureKind::BadCredentials => "BAD_CREDENTIALS",
            FailureKind::InvalidAssertion => "INVALID_ASSERTION",
            FailureKind::ExpiredOrReplayed => "EXPIRED_OR_REPLAYED",
            FailureKind::AudienceMismatch => "AUDIENCE_MISMATCH",
            FailureKind::IdentityMismatch => "IDENTITY_MISMATCH",
            FailureKind::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            FailureKind::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A rejected login.
///
/// The `detail` string is for internal logs. It is built from static reasons and
/// configuration values only, never from secrets or assertion payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct AuthFailure {
    kind: FailureKind,
    detail: String,
}

impl AuthFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn not_applicable(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::NotApplicable, detail)
    }

    pub fn not_found() -> Self {
        Self::new(FailureKind::NotFound, "no identity record for username")
    }

    pub fn bad_credentials(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::BadCredentials, detail)
    }

    pub fn invalid_assertion(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidAssertion, detail)
    }

    pub fn expired_or_replayed(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::ExpiredOrReplayed, detail)
    }

    pub fn audience_mismatch(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::AudienceMismatch, detail)
    }

    pub fn identity_mismatch(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::IdentityMismatch, detail)
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// The only text that may reach the end user.
    pub fn public_message(&self) -> &'static str {
        GENERIC_REJECTION
    }
}

/// Fatal configuration problem detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("domain marker for {method} login must not be empty")]
    EmptyMarker { method: &'static str },

    #[error("domain markers overlap: {local:?} (local) and {federated:?} (federated)")]
    OverlappingMarkers { local: String, federated: String },

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read configuration: {0}")]
    Load(String),

    #[error("failed to load IdP metadata: {0}")]
    Metadata(String),
}
