//! G Suite MCP Server Library
//!
//! A Model Context Protocol (MCP) server exposing Gmail and Google Calendar
//! tools for several Google accounts at once. Every tool call names the
//! account it acts on.

pub mod accounts;
pub mod config;
pub mod error;
pub mod google;
pub mod mcp;

pub use config::Config;
pub use error::{GsuiteMcpError, Result};
