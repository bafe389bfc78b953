//! Gmail and Calendar tool handlers
//!
//! Each tool is a unit struct implementing [`ToolHandler`]. Schemas declare
//! only tool-specific arguments; the account selector is added by the
//! registry.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::accounts::AccountRegistry;
use crate::error::Result;
use crate::mcp::registry::{ToolHandler, ToolRegistry, CALENDAR_ID_ARG};

pub mod calendar;
pub mod gmail;

/// Every tool this server exposes, in advertised order
pub fn all_tools() -> Vec<Arc<dyn ToolHandler>> {
    vec![
        Arc::new(gmail::GetUserInfo),
        Arc::new(gmail::QueryEmails),
        Arc::new(gmail::GetEmail),
        Arc::new(gmail::BulkGetEmails),
        Arc::new(gmail::CreateDraft),
        Arc::new(gmail::DeleteDraft),
        Arc::new(gmail::ReplyEmail),
        Arc::new(gmail::GetAttachment),
        Arc::new(gmail::BulkSaveAttachments),
        Arc::new(gmail::GetLabels),
        Arc::new(calendar::ListCalendars),
        Arc::new(calendar::GetCalendarEvents),
        Arc::new(calendar::CreateCalendarEvent),
        Arc::new(calendar::DeleteCalendarEvent),
    ]
}

/// Registry populated with [`all_tools`]
pub fn default_registry(accounts: &AccountRegistry) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new(accounts);
    for tool in all_tools() {
        registry.register(tool)?;
    }
    tracing::info!("Registered {} tools", registry.len());
    Ok(registry)
}

/// Object schema with the given properties and required names
fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Calendar tools also accept which calendar to act on
fn with_calendar_id(mut properties: Value) -> Value {
    if let Some(map) = properties.as_object_mut() {
        map.insert(
            CALENDAR_ID_ARG.to_string(),
            json!({
                "type": "string",
                "description": "Optional ID of the specific calendar. Defaults to the primary calendar.",
                "default": "primary",
            }),
        );
    }
    properties
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_true() -> bool {
    true
}

/// Write bytes to `path`, creating parent directories
async fn save_to_disk(path: &str, data: &[u8]) -> Result<()> {
    let path = Path::new(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await?;
    tracing::info!("Saved {} bytes to {}", data.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::Account;
    use crate::mcp::registry::USER_ID_ARG;

    fn accounts() -> AccountRegistry {
        AccountRegistry::new(vec![Account::new("alice@example.com", "personal")])
    }

    #[test]
    fn test_default_registry_has_every_tool() {
        let registry = default_registry(&accounts()).unwrap();
        assert_eq!(registry.len(), 14);

        for name in [
            "get_gmail_user_info",
            "query_gmail_emails",
            "get_gmail_email",
            "bulk_get_gmail_emails",
            "create_gmail_draft",
            "delete_gmail_draft",
            "reply_gmail_email",
            "get_gmail_attachment",
            "bulk_save_gmail_attachments",
            "get_gmail_labels",
            "list_calendars",
            "get_calendar_events",
            "create_calendar_event",
            "delete_calendar_event",
        ] {
            assert!(registry.lookup(name).is_some(), "missing tool {}", name);
        }
    }

    #[test]
    fn test_every_tool_requires_account_selector() {
        let registry = default_registry(&accounts()).unwrap();
        for tool in registry.definitions() {
            assert_eq!(tool.input_schema["required"][0], USER_ID_ARG, "{}", tool.name);
        }
    }

    #[test]
    fn test_calendar_tools_default_to_primary_calendar() {
        let registry = default_registry(&accounts()).unwrap();
        let tool = registry.lookup("get_calendar_events").unwrap();
        assert_eq!(
            tool.definition.input_schema["properties"][CALENDAR_ID_ARG]["default"],
            "primary"
        );
    }

    #[tokio::test]
    async fn test_save_to_disk_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/report.txt");

        save_to_disk(path.to_str().unwrap(), b"report").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"report");
    }
}
