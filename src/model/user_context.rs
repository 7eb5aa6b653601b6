use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Caller identity and granted permissions, extracted per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    /// Granted permission strings: `surveys.detail`, `surveys.*` or `*`
    pub permissions: BTreeSet<String>,
}

impl UserContext {
    /// Create a new UserContext with just a user ID and no permissions
    pub fn new(user_id: String) -> Self {
        Self {
            user_id,
            user_email: None,
            user_name: None,
            permissions: BTreeSet::new(),
        }
    }

    /// Create a UserContext with full user information
    pub fn with_details(user_id: String, email: Option<String>, name: Option<String>) -> Self {
        Self {
            user_id,
            user_email: email,
            user_name: name,
            permissions: BTreeSet::new(),
        }
    }

    /// Create a system user context for internal operations
    pub fn system() -> Self {
        Self {
            user_id: "system".to_string(),
            user_email: Some("system@survey-db.internal".to_string()),
            user_name: Some("System".to_string()),
            permissions: BTreeSet::from(["*".to_string()]),
        }
    }

    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.permissions = permissions
            .into_iter()
            .map(Into::into)
            .map(|p: String| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        self
    }

    /// Check a `<endpoint>.<action>` permission, honouring `*` and `<endpoint>.*` grants
    pub fn has_permission(&self, permission: &str) -> bool {
        if self.permissions.contains("*") || self.permissions.contains(permission) {
            return true;
        }
        match permission.split_once('.') {
            Some((end_point, _)) => self.permissions.contains(&format!("{}.*", end_point)),
            None => false,
        }
    }
}

impl Default for UserContext {
    fn default() -> Self {
        Self::new("anonymous".to_string())
    }
}
