//! Audit trail for login attempts.
//!
//! Records carry the username, method and outcome only.

use tracing::{info, warn};

use crate::error::AuthFailure;
use crate::identity::{AuthMethod, AuthenticatedIdentity};

pub const AUDIT_TARGET: &str = "audit";

pub fn login_accepted(identity: &AuthenticatedIdentity) {
    info!(
        target: AUDIT_TARGET,
        username = %identity.username(),
        method = %identity.method(),
        outcome = "accepted",
        "Login accepted"
    );
}

pub fn login_rejected(username: &str, method: Option<AuthMethod>, failure: &AuthFailure) {
    let method = method.map(|m| m.to_string()).unwrap_or_else(|| "none".to_string());
    warn!(
        target: AUDIT_TARGET,
        username = %username,
        method = %method,
        outcome = "rejected",
        kind = %failure.kind(),
        detail = %failure.detail(),
        "Login rejected"
    );
}
