//! Canonical authenticated identity.
//!
//! Both verifier paths converge on [`normalize`], so downstream code only ever sees
//! one identity type and branches on [`AuthMethod`] when it needs to.

use serde::{Deserialize, Serialize};

use crate::store::StoredIdentityRecord;

/// Authentication method that produced an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Local,
    Federated,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Local => write!(f, "local"),
            AuthMethod::Federated => write!(f, "federated"),
        }
    }
}

/// Authenticated identity handed to the caller's session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedIdentity {
    username: String,
    method: AuthMethod,
    authorities: Vec<String>,
}

impl AuthenticatedIdentity {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn method(&self) -> AuthMethod {
        self.method
    }

    /// Always empty; permissions are not modelled here.
    pub fn authorities(&self) -> &[String] {
        &self.authorities
    }
}

/// Build the canonical identity for a verified record.
pub fn normalize(record: &StoredIdentityRecord, method: AuthMethod) -> AuthenticatedIdentity {
    AuthenticatedIdentity {
        username: record.username.clone(),
        method,
        authorities: Vec::new(),
    }
}
