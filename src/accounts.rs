//! Configured Google accounts
//!
//! The account list is read once at startup and never changes afterwards.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, GsuiteMcpError, Result};

/// A Google account the server may act for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account email, also its identifier
    pub email: String,

    /// Free-form account type (e.g. "personal", "work")
    pub account_type: String,

    /// Extra hints shown to the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<String>,
}

impl Account {
    /// Create an account without extra info
    pub fn new(email: impl Into<String>, account_type: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            account_type: account_type.into(),
            extra_info: None,
        }
    }

    /// Human-readable summary used in tool schemas
    pub fn description(&self) -> String {
        match self.extra_info.as_deref().filter(|s| !s.is_empty()) {
            Some(extra) => format!("{} ({}, {})", self.email, self.account_type, extra),
            None => format!("{} ({})", self.email, self.account_type),
        }
    }
}

/// Accounts file format
#[derive(Debug, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: Vec<Account>,
}

/// Registry of configured accounts
#[derive(Debug, Clone, Default)]
pub struct AccountRegistry {
    accounts: Vec<Account>,
}

impl AccountRegistry {
    /// Create a registry from a list of accounts
    pub fn new(accounts: Vec<Account>) -> Self {
        Self { accounts }
    }

    /// Load the registry from an accounts file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GsuiteMcpError::Config(ConfigError::AccountsFileNotFound {
                path: path.display().to_string(),
            }));
        }

        let content = std::fs::read_to_string(path)?;
        let file: AccountsFile = serde_json::from_str(&content)?;

        if file.accounts.is_empty() {
            tracing::warn!("No accounts configured in {}", path.display());
        }

        Ok(Self::new(file.accounts))
    }

    /// All accounts in file order
    pub fn list(&self) -> &[Account] {
        &self.accounts
    }

    /// Look up an account by email (exact match)
    pub fn get(&self, email: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.email == email)
    }

    /// Whether an account is configured
    pub fn contains(&self, email: &str) -> bool {
        self.get(email).is_some()
    }

    /// Description of the account selector argument
    pub fn selector_description(&self) -> String {
        if self.accounts.is_empty() {
            return "The EMAIL of the Google account to use.".to_string();
        }

        let choices = self
            .accounts
            .iter()
            .map(Account::description)
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "The EMAIL of the Google account for which you are executing this action. Choose from: {}",
            choices
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_accounts_file_deserialize() {
        let json = r#"{
            "accounts": [
                {"email": "a@x.com", "account_type": "personal", "extra_info": "family calendar"},
                {"email": "b@y.com", "account_type": "work"}
            ]
        }"#;

        let file: AccountsFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.accounts.len(), 2);
        assert_eq!(file.accounts[1].extra_info, None);
    }

    #[test]
    fn test_description() {
        let plain = Account::new("b@y.com", "work");
        assert_eq!(plain.description(), "b@y.com (work)");

        let extra = Account {
            extra_info: Some("shared inbox".to_string()),
            ..Account::new("a@x.com", "personal")
        };
        assert_eq!(extra.description(), "a@x.com (personal, shared inbox)");
    }

    #[test]
    fn test_lookup_is_exact() {
        let registry = AccountRegistry::new(vec![Account::new("a@x.com", "personal")]);
        assert!(registry.contains("a@x.com"));
        assert!(!registry.contains("A@X.COM"));
        assert!(!registry.contains("a@x.co"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"accounts": [{{"email": "a@x.com", "account_type": "personal"}}]}}"#
        )
        .unwrap();

        let registry = AccountRegistry::load(file.path()).unwrap();
        assert_eq!(registry.list().len(), 1);
        assert!(registry.selector_description().contains("a@x.com (personal)"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AccountRegistry::load(Path::new("/nonexistent/.accounts.json")).unwrap_err();
        assert!(matches!(
            err,
            GsuiteMcpError::Config(ConfigError::AccountsFileNotFound { .. })
        ));
    }
}
