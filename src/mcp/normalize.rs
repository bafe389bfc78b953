//! Tool output normalization
//!
//! Handlers return a [`ToolOutput`]; [`normalize`] turns it into the ordered
//! content items sent back in a `tools/call` result. The content sequence is
//! never empty.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;

use crate::mcp::types::{ResourceContent, ToolResultContent};

/// What a tool handler produced
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// A structured result, rendered as canonical JSON text
    Json(Value),

    /// The call succeeded but matched nothing
    Empty(String),

    /// A plain confirmation message
    Text(String),

    /// Binary data returned inline as a resource
    Blob {
        data: Vec<u8>,
        uri: String,
        mime_type: String,
    },

    /// One outcome per input item, in input order
    Batch(Vec<BatchOutcome>),
}

/// Result for one item of a bulk operation
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// The input identifier this outcome belongs to
    pub item: String,

    pub result: std::result::Result<Value, String>,
}

impl BatchOutcome {
    pub fn success(item: impl Into<String>, value: Value) -> Self {
        Self {
            item: item.into(),
            result: Ok(value),
        }
    }

    pub fn failure(item: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            result: Err(message.into()),
        }
    }
}

const EMPTY_BATCH_MESSAGE: &str = "No items were processed.";

/// Convert a handler result into MCP content items
pub fn normalize(output: ToolOutput) -> Vec<ToolResultContent> {
    match output {
        ToolOutput::Json(value) => vec![ToolResultContent::text(canonical_json(&value))],
        ToolOutput::Empty(message) | ToolOutput::Text(message) => {
            vec![ToolResultContent::text(message)]
        }
        ToolOutput::Blob {
            data,
            uri,
            mime_type,
        } => vec![ToolResultContent::Resource {
            resource: ResourceContent {
                uri,
                blob: STANDARD.encode(data),
                mime_type,
            },
        }],
        ToolOutput::Batch(outcomes) if outcomes.is_empty() => {
            vec![ToolResultContent::text(EMPTY_BATCH_MESSAGE)]
        }
        ToolOutput::Batch(outcomes) => outcomes
            .into_iter()
            .map(|outcome| match outcome.result {
                Ok(value) => ToolResultContent::text(canonical_json(&value)),
                Err(message) => ToolResultContent::text(format!(
                    "Error processing {}: {}",
                    outcome.item, message
                )),
            })
            .collect(),
    }
}

/// Two-space indented JSON with object keys in sorted order
pub fn canonical_json(value: &Value) -> String {
    // serde_json's default map is ordered by key
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
