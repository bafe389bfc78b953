//! Error types for the G Suite MCP Server
//!
//! Crate-level errors live in [`GsuiteMcpError`]. The per-invocation failure
//! taxonomy surfaced to MCP clients is [`DispatchError`].

use thiserror::Error;

/// Main error type for the G Suite MCP Server
#[derive(Error, Debug)]
pub enum GsuiteMcpError {
    /// OAuth authentication errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Google API errors
    #[error("Google API error: {0}")]
    Google(#[from] GoogleApiError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Tool registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// MCP protocol errors
    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// OAuth authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth client secrets file not found: {path}")]
    KeysFileNotFound { path: String },

    #[error("Invalid OAuth keys format: expected 'installed' or 'web' credentials")]
    InvalidKeysFormat,

    #[error("Failed to refresh access token for {account}: {message}")]
    TokenRefreshFailed { account: String, message: String },

    #[error("OAuth callback error: {message}")]
    CallbackError { message: String },

    #[error("No authorization code provided")]
    NoAuthCode,

    #[error("Token exchange failed: {message}")]
    TokenExchangeFailed { message: String },

    #[error("Consent was granted by {email}, which is not a configured account")]
    UnconfiguredAccount { email: String },
}

/// Google API errors
#[derive(Error, Debug)]
pub enum GoogleApiError {
    #[error("Message not found: {message_id}")]
    MessageNotFound { message_id: String },

    #[error("Attachment not found: {attachment_id}")]
    AttachmentNotFound { attachment_id: String },

    #[error("API request failed: {message}")]
    RequestFailed { message: String },

    #[error("Tool requires the {expected} capability but was given a {actual} client")]
    WrongCapability {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Accounts file not found: {path}")]
    AccountsFileNotFound { path: String },
}

/// Argument validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required fields: {}", fields.join(", "))]
    MissingFields { fields: Vec<String> },

    #[error("Invalid type for '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid email address: {email}")]
    InvalidEmail { email: String },

    #[error("Invalid parameter: {name} - {message}")]
    InvalidParameter { name: String, message: String },
}

/// Tool registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Tool already registered: {name}")]
    DuplicateTool { name: String },
}

/// MCP protocol errors
#[derive(Error, Debug)]
pub enum McpError {
    #[error("Invalid tool arguments: {message}")]
    InvalidArguments { message: String },
}

/// Result type alias for G Suite MCP operations
pub type Result<T> = std::result::Result<T, GsuiteMcpError>;

/// Why a single `tools/call` invocation failed
///
/// Every variant is terminal for the invocation. None of them is retried.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Missing required argument: {key}")]
    MissingAccount { key: &'static str },

    #[error("Account {account} is not configured")]
    UnknownAccount { account: String },

    #[error("Account {account} needs authorization: {message}")]
    AuthorizationRequired { account: String, message: String },

    #[error("Could not refresh credentials for {account}: {message}")]
    CredentialRefresh { account: String, message: String },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Tool {tool} failed: {message}")]
    Handler { tool: String, message: String },

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },
}

impl DispatchError {
    /// Stable identifier for the failure class
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::MissingAccount { .. } => "missing_account",
            DispatchError::UnknownAccount { .. } => "unknown_account",
            DispatchError::AuthorizationRequired { .. } => "authorization_required",
            DispatchError::CredentialRefresh { .. } => "credential_refresh",
            DispatchError::UnknownTool { .. } => "unknown_tool",
            DispatchError::Validation(_) => "validation",
            DispatchError::Handler { .. } => "handler",
            DispatchError::Timeout { .. } => "timeout",
        }
    }

    /// JSON-RPC error code reported to the client
    pub fn code(&self) -> i32 {
        match self {
            DispatchError::MissingAccount { .. }
            | DispatchError::UnknownAccount { .. }
            | DispatchError::UnknownTool { .. }
            | DispatchError::Validation(_) => -32602,
            DispatchError::AuthorizationRequired { .. }
            | DispatchError::CredentialRefresh { .. }
            | DispatchError::Handler { .. }
            | DispatchError::Timeout { .. } => -32603,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::KeysFileNotFound {
            path: "/path/to/.gauth.json".to_string(),
        };
        assert!(err.to_string().contains("/path/to/.gauth.json"));
    }

    #[test]
    fn test_error_conversion() {
        let auth_err = AuthError::NoAuthCode;
        let err: GsuiteMcpError = auth_err.into();
        assert!(matches!(err, GsuiteMcpError::Auth(_)));
    }

    #[test]
    fn test_missing_fields_lists_every_field() {
        let err = ValidationError::MissingFields {
            fields: vec!["to".to_string(), "subject".to_string()],
        };
        assert_eq!(err.to_string(), "Missing required fields: to, subject");
    }

    #[test]
    fn test_dispatch_error_codes() {
        let unknown = DispatchError::UnknownTool {
            name: "nope".to_string(),
        };
        assert_eq!(unknown.code(), -32602);
        assert_eq!(unknown.kind(), "unknown_tool");

        let timeout = DispatchError::Timeout {
            operation: "query_gmail_emails".to_string(),
            after_ms: 30_000,
        };
        assert_eq!(timeout.code(), -32603);
        assert!(timeout.to_string().contains("30000ms"));
    }
}
