//! Google Workspace integration
//!
//! OAuth credentials, the Gmail and Calendar REST clients, and the helpers
//! that turn raw API payloads into tool results.

pub mod auth;
pub mod client;
pub mod types;
pub mod utils;
