//! Username classification.
//!
//! The suffix of a username decides which verifier handles it. The decision is a
//! hard gate: a username is local, federated, or rejected outright.

use serde::Serialize;

use crate::error::ConfigError;
use crate::identity::AuthMethod;

/// Outcome of classifying a username.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Local,
    Federated,
    Invalid,
}

impl Classification {
    /// The verifier path, if any.
    pub fn method(&self) -> Option<AuthMethod> {
        match self {
            Classification::Local => Some(AuthMethod::Local),
            Classification::Federated => Some(AuthMethod::Federated),
            Classification::Invalid => None,
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Local => write!(f, "local"),
            Classification::Federated => write!(f, "federated"),
            Classification::Invalid => write!(f, "invalid"),
        }
    }
}

/// Suffix-based dispatch between the two login paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Lowercased local marker.
    local_marker: String,
    /// Lowercased federated marker.
    federated_marker: String,
}

impl DispatchPolicy {
    /// Build a policy, rejecting markers that are empty or can match the same username.
    pub fn new(local_marker: &str, federated_marker: &str) -> Result<Self, ConfigError> {
        let local = local_marker.trim().to_lowercase();
        let federated = federated_marker.trim().to_lowercase();

        if local.is_empty() && federated.is_empty() {
            return Err(ConfigError::OverlappingMarkers {
                local: local_marker.to_string(),
                federated: federated_marker.to_string(),
            });
        }
        if local.is_empty() {
            return Err(ConfigError::EmptyMarker { method: "local" });
        }
        if federated.is_empty() {
            return Err(ConfigError::EmptyMarker { method: "federated" });
        }

        // One marker being a suffix of the other means some username ends in both.
        if local.ends_with(&federated) || federated.ends_with(&local) {
            return Err(ConfigError::OverlappingMarkers {
                local: local_marker.to_string(),
                federated: federated_marker.to_string(),
            });
        }

        Ok(Self {
            local_marker: local,
            federated_marker: federated,
        })
    }

    pub fn classify(&self, username: &str) -> Classification {
        let username = username.trim().to_lowercase();

        // The marker alone is not a username.
        if username.len() > self.local_marker.len() && username.ends_with(&self.local_marker) {
            Classification::Local
        } else if username.len() > self.federated_marker.len()
            && username.ends_with(&self.federated_marker)
        {
            Classification::Federated
        } else {
            Classification::Invalid
        }
    }

    pub fn local_marker(&self) -> &str {
        &self.local_marker
    }

    pub fn federated_marker(&self) -> &str {
        &self.federated_marker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> DispatchPolicy {
        DispatchPolicy::new("@dbauth.com", "@oktaauth.com").unwrap()
    }

    #[test]
    fn test_classify_by_suffix() {
        let policy = policy();
        assert_eq!(policy.classify("dbuser@dbauth.com"), Classification::Local);
        assert_eq!(
            policy.classify("samluser@oktaauth.com"),
            Classification::Federated
        );
        assert_eq!(policy.classify("nobody@unknown.com"), Classification::Invalid);
    }

    #[test]
    fn test_classify_case_insensitive() {
        let policy = policy();
        assert_eq!(policy.classify("DBUser@DBAuth.COM"), Classification::Local);
        assert_eq!(
            policy.classify("SamlUser@OktaAuth.com"),
            Classification::Federated
        );
    }

    #[test]
    fn test_classify_rejects_near_misses() {
        let policy = policy();
        assert_eq!(policy.classify(""), Classification::Invalid);
        assert_eq!(policy.classify("@dbauth.com"), Classification::Invalid);
        assert_eq!(policy.classify("user@dbauth.com.evil"), Classification::Invalid);
        assert_eq!(policy.classify("user@notoktaauth.org"), Classification::Invalid);
    }

    #[test]
    fn test_classify_is_idempotent() {
        let policy = policy();
        for name in ["dbuser@dbauth.com", "samluser@oktaauth.com", "x@y.z"] {
            assert_eq!(policy.classify(name), policy.classify(name));
        }
    }

    #[test]
    fn test_empty_markers_rejected() {
        assert!(matches!(
            DispatchPolicy::new("", ""),
            Err(ConfigError::OverlappingMarkers { .. })
        ));
        assert!(matches!(
            DispatchPolicy::new("  ", "@oktaauth.com"),
            Err(ConfigError::EmptyMarker { method: "local" })
        ));
        assert!(matches!(
            DispatchPolicy::new("@dbauth.com", ""),
            Err(ConfigError::EmptyMarker { method: "federated" })
        ));
    }

    #[test]
    fn test_overlapping_markers_rejected() {
        assert!(DispatchPolicy::new("@corp.com", "@CORP.com").is_err());
        assert!(DispatchPolicy::new("corp.com", "@sso.corp.com").is_err());
        assert!(DispatchPolicy::new("@sso.corp.com", "corp.com").is_err());
        assert!(DispatchPolicy::new("@db.corp.com", "@sso.corp.com").is_ok());
    }

    #[test]
    fn test_classification_method() {
        assert_eq!(Classification::Local.method(), Some(AuthMethod::Local));
        assert_eq!(
            Classification::Federated.method(),
            Some(AuthMethod::Federated)
        );
        assert_eq!(Classification::Invalid.method(), None);
    }
}
