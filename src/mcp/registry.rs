//! Tool registry
//!
//! Holds every registered tool with its advertised definition. Registration
//! injects the account selector argument into each tool's input schema, so
//! handlers never declare it themselves.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::accounts::AccountRegistry;
use crate::error::{RegistryError, Result};
use crate::google::client::{Capability, ClientHandle};
use crate::mcp::normalize::ToolOutput;
use crate::mcp::types::Tool;
use crate::mcp::validate::ToolArguments;

/// Argument naming the account a call acts on
pub const USER_ID_ARG: &str = "__user_id__";

/// Argument naming the calendar a calendar tool acts on
pub const CALENDAR_ID_ARG: &str = "__calendar_id__";

/// A tool as declared by its handler, before selector injection
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// One invokable tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Which client the dispatcher must build for this tool
    fn capability(&self) -> Capability;

    async fn invoke(&self, args: ToolArguments, client: ClientHandle) -> Result<ToolOutput>;
}

/// A registered tool: the advertised definition plus its handler
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: Tool,
    pub handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn capability(&self) -> Capability {
        self.handler.capability()
    }
}

/// Name-indexed, insertion-ordered tool set
pub struct ToolRegistry {
    selector_description: String,
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry whose selector lists the configured accounts
    pub fn new(accounts: &AccountRegistry) -> Self {
        Self {
            selector_description: accounts.selector_description(),
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a handler under its declared name
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) -> Result<()> {
        let declared = handler.definition();

        if self.index.contains_key(&declared.name) {
            return Err(RegistryError::DuplicateTool {
                name: declared.name,
            }
            .into());
        }

        let definition = Tool {
            input_schema: self.inject_account_selector(declared.input_schema),
            name: declared.name,
            description: declared.description,
        };

        tracing::debug!("Registered tool {}", definition.name);
        self.index.insert(definition.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            definition,
            handler,
        });
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Advertised definitions in registration order
    pub fn definitions(&self) -> Vec<Tool> {
        self.tools.iter().map(|tool| tool.definition.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn inject_account_selector(&self, schema: Value) -> Value {
        let mut schema = match schema {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        schema
            .entry("type")
            .or_insert_with(|| Value::String("object".to_string()));

        let properties = schema
            .entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(properties) = properties {
            properties.insert(
                USER_ID_ARG.to_string(),
                json!({
                    "type": "string",
                    "description": self.selector_description,
                }),
            );
        }

        let required = schema
            .entry("required")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(required) = required {
            let selector = Value::String(USER_ID_ARG.to_string());
            if !required.contains(&selector) {
                required.insert(0, selector);
            }
        }

        Value::Object(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::Account;

    struct Echo(&'static str);

    #[async_trait]
    impl ToolHandler for Echo {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(
                self.0,
                "Echo the arguments",
                json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            )
        }

        fn capability(&self) -> Capability {
            Capability::Gmail
        }

        async fn invoke(&self, args: ToolArguments, _client: ClientHandle) -> Result<ToolOutput> {
            Ok(ToolOutput::Json(Value::Object(args.as_map().clone())))
        }
    }

    fn accounts() -> AccountRegistry {
        AccountRegistry::new(vec![
            Account::new("alice@example.com", "personal"),
            Account::new("bob@example.com", "work"),
        ])
    }

    #[test]
    fn test_register_injects_account_selector() {
        let mut registry = ToolRegistry::new(&accounts());
        registry.register(Arc::new(Echo("echo"))).unwrap();

        let tool = registry.lookup("echo").unwrap();
        let schema = &tool.definition.input_schema;
        assert_eq!(schema["required"], json!(["__user_id__", "text"]));

        let description = schema["properties"][USER_ID_ARG]["description"]
            .as_str()
            .unwrap();
        assert!(description.contains("alice@example.com"));
        assert!(description.contains("bob@example.com"));
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut registry = ToolRegistry::new(&accounts());
        registry.register(Arc::new(Echo("echo"))).unwrap();

        let err = registry.register(Arc::new(Echo("echo"))).unwrap_err();
        assert!(err.to_string().contains("echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_definitions_keep_registration_order() {
        let mut registry = ToolRegistry::new(&accounts());
        registry.register(Arc::new(Echo("b"))).unwrap();
        registry.register(Arc::new(Echo("a"))).unwrap();

        let names: Vec<String> = registry.definitions().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(registry.definitions(), registry.definitions());
    }

    #[test]
    fn test_lookup_unknown_tool() {
        let registry = ToolRegistry::new(&accounts());
        assert!(registry.lookup("missing").is_none());
        assert!(registry.is_empty());
    }
}
