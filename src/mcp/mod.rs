//! External Tool Client (Model Context Protocol).

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{sanitize_tool_name, McpClient, McpServerConfig, McpToolProxy};
pub use transport::TransportKind;
