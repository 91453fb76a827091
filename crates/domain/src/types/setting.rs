//! Integration setting types

use serde::{Deserialize, Serialize};

/// API credential for one external workspace binding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiCredential {
    pub api_key: String,
}

impl ApiCredential {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into() }
    }
}

/// One external-workspace binding configured by an admin.
///
/// Soft-deleted when the admin removes it; hard-deleted by the deferred
/// purge step once the grace window elapsed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrationSetting {
    pub id: String,
    /// Admin-facing name, carried on credential notifications.
    pub name: String,
    pub credential: ApiCredential,
    /// External workspace the setting is bound to.
    pub workspace_id: String,
    /// Leave types enabled for synchronization; empty means all.
    pub leave_type_ids: Vec<String>,
    /// Departments in scope; empty means all.
    pub department_ids: Vec<String>,
    pub deleted: bool,
    /// One-shot flag: true once the invalid-credential notification went
    /// out. Reset by the settings collaborator when the credential rotates.
    pub invalid_credential_notified: bool,
}

impl IntegrationSetting {
    /// Whether a request with the given leave type and department falls
    /// inside this setting's scope filters.
    pub fn in_scope(&self, leave_type_id: &str, department_id: Option<&str>) -> bool {
        let leave_type_ok = self.leave_type_ids.is_empty()
            || self.leave_type_ids.iter().any(|id| id == leave_type_id);
        let department_ok = self.department_ids.is_empty()
            || department_id
                .map(|dep| self.department_ids.iter().any(|id| id == dep))
                .unwrap_or(false);
        leave_type_ok && department_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setting(leave_types: &[&str], departments: &[&str]) -> IntegrationSetting {
        IntegrationSetting {
            id: "setting-1".into(),
            name: "Acme Tracker".into(),
            credential: ApiCredential::new("key"),
            workspace_id: "ws-1".into(),
            leave_type_ids: leave_types.iter().map(|s| s.to_string()).collect(),
            department_ids: departments.iter().map(|s| s.to_string()).collect(),
            deleted: false,
            invalid_credential_notified: false,
        }
    }

    #[test]
    fn empty_filters_match_everything() {
        let s = setting(&[], &[]);
        assert!(s.in_scope("vacation", Some("eng")));
        assert!(s.in_scope("sick", None));
    }

    #[test]
    fn leave_type_filter_is_enforced() {
        let s = setting(&["vacation"], &[]);
        assert!(s.in_scope("vacation", None));
        assert!(!s.in_scope("sick", None));
    }

    #[test]
    fn department_filter_requires_a_known_department() {
        let s = setting(&[], &["eng"]);
        assert!(s.in_scope("vacation", Some("eng")));
        assert!(!s.in_scope("vacation", Some("sales")));
        assert!(!s.in_scope("vacation", None));
    }
}
