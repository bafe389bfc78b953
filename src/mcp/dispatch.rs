//! Tool call dispatch
//!
//! Drives one `tools/call` through its stages: tool lookup, account
//! resolution, credential readiness, argument validation, handler invocation
//! and output normalization. A failure at any stage ends the call with a
//! [`DispatchError`] and no later stage runs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::accounts::{Account, AccountRegistry};
use crate::error::{DispatchError, ValidationError};
use crate::google::auth::{now_secs, AuthorizationFlow, Credential, CredentialStore};
use crate::google::client::{Capability, ClientFactory, ClientHandle};
use crate::mcp::normalize::{normalize, ToolOutput};
use crate::mcp::registry::{RegisteredTool, ToolRegistry, USER_ID_ARG};
use crate::mcp::types::{Tool, ToolResultContent};
use crate::mcp::validate::{validate, ToolArguments};

/// Progress of a single tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    Received,
    AccountResolved,
    CredentialsReady,
    Validated,
    Invoked,
    Completed,
    Failed,
}

/// Routes tool calls to handlers with per-account credentials
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    accounts: Arc<AccountRegistry>,
    store: Arc<dyn CredentialStore>,
    auth_flow: Arc<dyn AuthorizationFlow>,
    clients: Arc<dyn ClientFactory>,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        accounts: Arc<AccountRegistry>,
        store: Arc<dyn CredentialStore>,
        auth_flow: Arc<dyn AuthorizationFlow>,
        clients: Arc<dyn ClientFactory>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            accounts,
            store,
            auth_flow,
            clients,
            call_timeout,
        }
    }

    /// Definitions of every registered tool, in registration order
    pub fn list_tools(&self) -> Vec<Tool> {
        self.registry.definitions()
    }

    /// Run one tool call to completion
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Vec<ToolResultContent>, DispatchError> {
        let mut stage = DispatchStage::Received;
        tracing::debug!(tool = name, stage = ?stage, "Tool call received");

        match self.run(name, arguments, &mut stage).await {
            Ok(content) => {
                tracing::debug!(tool = name, stage = ?DispatchStage::Completed, "Tool call completed");
                Ok(content)
            }
            Err(e) => {
                tracing::warn!(
                    tool = name,
                    stage = ?DispatchStage::Failed,
                    reached = ?stage,
                    kind = e.kind(),
                    "Tool call failed: {}",
                    e
                );
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        name: &str,
        arguments: Value,
        stage: &mut DispatchStage,
    ) -> Result<Vec<ToolResultContent>, DispatchError> {
        let tool = self
            .registry
            .lookup(name)
            .ok_or_else(|| DispatchError::UnknownTool {
                name: name.to_string(),
            })?;

        let arguments = into_object(arguments)?;

        let account = self.resolve_account(&arguments)?;
        advance(stage, DispatchStage::AccountResolved, name);

        let credential = self.ready_credential(account, tool.capability()).await?;
        advance(stage, DispatchStage::CredentialsReady, name);

        let validated = validate(&tool.definition.input_schema, &arguments)?;
        advance(stage, DispatchStage::Validated, name);

        let client = self
            .clients
            .build(tool.capability(), &credential)
            .map_err(|e| DispatchError::Handler {
                tool: name.to_string(),
                message: e.to_string(),
            })?;

        let output = self.invoke(tool, validated, client).await?;
        advance(stage, DispatchStage::Invoked, name);

        Ok(normalize(output))
    }

    fn resolve_account(&self, arguments: &Map<String, Value>) -> Result<&Account, DispatchError> {
        let email = arguments
            .get(USER_ID_ARG)
            .and_then(Value::as_str)
            .filter(|email| !email.is_empty())
            .ok_or(DispatchError::MissingAccount { key: USER_ID_ARG })?;

        self.accounts
            .get(email)
            .ok_or_else(|| DispatchError::UnknownAccount {
                account: email.to_string(),
            })
    }

    /// Load, refresh and scope-check the account's credential
    async fn ready_credential(
        &self,
        account: &Account,
        capability: Capability,
    ) -> Result<Credential, DispatchError> {
        let stored = self
            .bounded("Loading credentials", self.store.get(&account.email))
            .await?
            .map_err(|e| DispatchError::CredentialRefresh {
                account: account.email.clone(),
                message: e.to_string(),
            })?;

        let Some(mut credential) = stored else {
            return Err(self.require_authorization(account, "no stored credentials").await);
        };

        if credential.is_expired(now_secs()) {
            tracing::info!("Refreshing expired credentials for {}", account.email);
            credential = self
                .bounded("Refreshing credentials", self.store.refresh(&credential))
                .await?
                .map_err(|e| DispatchError::CredentialRefresh {
                    account: account.email.clone(),
                    message: e.to_string(),
                })?;

            // The refreshed token is usable even if it could not be saved
            let persisted = match self
                .bounded("Persisting credentials", self.store.put(&credential))
                .await
            {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(e) = persisted {
                tracing::warn!(
                    "Failed to persist refreshed credentials for {}: {}",
                    account.email,
                    e
                );
            }
        }

        let missing = credential.missing_scopes(capability.required_scopes());
        if !missing.is_empty() {
            let reason = format!("missing scopes {}", missing.join(" "));
            return Err(self.require_authorization(account, &reason).await);
        }

        Ok(credential)
    }

    /// Start the consent flow and report it; never waits for the user
    async fn require_authorization(&self, account: &Account, reason: &str) -> DispatchError {
        let message = match self.auth_flow.initiate(account).await {
            Ok(pending) => format!(
                "{}; complete the consent flow at {}",
                reason, pending.url
            ),
            Err(e) => format!("{}; could not start the consent flow: {}", reason, e),
        };

        DispatchError::AuthorizationRequired {
            account: account.email.clone(),
            message,
        }
    }

    /// Run the handler on its own task so a panic cannot take the server down
    async fn invoke(
        &self,
        tool: &RegisteredTool,
        arguments: ToolArguments,
        client: ClientHandle,
    ) -> Result<ToolOutput, DispatchError> {
        let handler = tool.handler.clone();
        let task = tokio::spawn(async move { handler.invoke(arguments, client).await });
        let abort = task.abort_handle();

        match tokio::time::timeout(self.call_timeout, task).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e))) => Err(DispatchError::Handler {
                tool: tool.name().to_string(),
                message: e.to_string(),
            }),
            Ok(Err(join_error)) => {
                let message = if join_error.is_panic() {
                    tracing::error!("Handler for {} panicked", tool.name());
                    "handler panicked".to_string()
                } else {
                    join_error.to_string()
                };
                Err(DispatchError::Handler {
                    tool: tool.name().to_string(),
                    message,
                })
            }
            Err(_) => {
                abort.abort();
                Err(self.timeout_error(tool.name()))
            }
        }
    }

    async fn bounded<F: Future>(
        &self,
        operation: &str,
        future: F,
    ) -> Result<F::Output, DispatchError> {
        tokio::time::timeout(self.call_timeout, future)
            .await
            .map_err(|_| self.timeout_error(operation))
    }

    fn timeout_error(&self, operation: &str) -> DispatchError {
        DispatchError::Timeout {
            operation: operation.to_string(),
            after_ms: self.call_timeout.as_millis() as u64,
        }
    }
}

fn advance(stage: &mut DispatchStage, next: DispatchStage, tool: &str) {
    *stage = next;
    tracing::debug!(tool, stage = ?next, "Tool call advanced");
}

fn into_object(arguments: Value) -> Result<Map<String, Value>, DispatchError> {
    match arguments {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(ValidationError::TypeMismatch {
            field: "arguments".to_string(),
            expected: "object".to_string(),
            actual: match other {
                Value::Array(_) => "array",
                Value::String(_) => "string",
                Value::Bool(_) => "boolean",
                _ => "number",
            }
            .to_string(),
        }
        .into()),
    }
}
