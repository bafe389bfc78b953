//! MCP (Model Context Protocol) module
//!
//! The stdio server, the tool registry and dispatcher, and the tool handlers.

pub mod dispatch;
pub mod normalize;
pub mod registry;
pub mod server;
pub mod tools;
pub mod types;
pub mod validate;
