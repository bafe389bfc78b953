//! Configuration management for the G Suite MCP Server
//!
//! Handles paths, environment variables, and timeouts.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the G Suite MCP Server
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the OAuth client secrets file
    pub gauth_file: PathBuf,

    /// Path to the accounts file
    pub accounts_file: PathBuf,

    /// Directory holding one credentials file per account
    pub credentials_dir: PathBuf,

    /// OAuth callback port
    pub oauth_callback_port: u16,

    /// Upper bound for each credential refresh and tool invocation
    pub call_timeout: Duration,
}

impl Config {
    /// Create a configuration from environment variables, falling back to defaults
    pub fn new() -> Self {
        let gauth_file = std::env::var("GSUITE_GAUTH_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.gauth.json"));

        let accounts_file = std::env::var("GSUITE_ACCOUNTS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.accounts.json"));

        let credentials_dir = std::env::var("GSUITE_CREDENTIALS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let oauth_callback_port = std::env::var("GSUITE_OAUTH_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(4100);

        let call_timeout = std::env::var("GSUITE_CALL_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Self {
            gauth_file,
            accounts_file,
            credentials_dir,
            oauth_callback_port,
            call_timeout,
        }
    }

    /// OAuth redirect URI served by the local callback listener
    pub fn oauth_callback_url(&self) -> String {
        format!("http://localhost:{}/code", self.oauth_callback_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Google API constants
pub mod google {
    /// Base URL for Gmail API
    pub const GMAIL_API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

    /// Base URL for Calendar API
    pub const CALENDAR_API_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";

    /// OAuth2 user info endpoint
    pub const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

    /// User ID for the authenticated user
    pub const USER_ID: &str = "me";

    /// OAuth scopes
    pub mod scopes {
        pub const OPENID: &str = "openid";
        pub const USERINFO_EMAIL: &str = "https://www.googleapis.com/auth/userinfo.email";
        pub const GMAIL: &str = "https://mail.google.com/";
        pub const CALENDAR: &str = "https://www.googleapis.com/auth/calendar";

        /// Every scope requested during the consent flow
        pub const ALL: &[&str] = &[OPENID, USERINFO_EMAIL, GMAIL, CALENDAR];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_url_uses_port() {
        let config = Config {
            oauth_callback_port: 4242,
            ..Config::new()
        };
        assert_eq!(config.oauth_callback_url(), "http://localhost:4242/code");
    }

    #[test]
    fn test_all_scopes_requested() {
        assert_eq!(google::scopes::ALL.len(), 4);
        assert!(google::scopes::ALL.contains(&"https://mail.google.com/"));
    }
}
