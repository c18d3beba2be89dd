//! Billing account configuration
//!
//! Accounts carry no secrets. Each names the environment variable its API
//! key is read from when the control plane starts.

use crate::routing::Credential;
use serde::{Deserialize, Serialize};

/// One provider billing account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account identifier referenced by candidates
    pub id: String,

    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl AccountConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            api_key_env: None,
        }
    }

    pub fn with_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    /// Resolve the credential for this account from the environment
    pub fn credential(&self) -> Credential {
        match &self.api_key_env {
            Some(var) => Credential::from_env(&self.id, var),
            None => Credential::anonymous(&self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_without_env() {
        let credential = AccountConfig::new("primary").credential();
        assert_eq!(credential.account_id, "primary");
        assert!(credential.secret().is_none());
    }

    #[test]
    fn test_missing_variable_is_anonymous() {
        let credential = AccountConfig::new("backup")
            .with_key_env("OVERSEER_TEST_KEY_THAT_IS_NEVER_SET")
            .credential();
        assert!(credential.secret().is_none());
    }
}
