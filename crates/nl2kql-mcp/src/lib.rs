//! # nl2kql-mcp
//!
//! An MCP (Model Context Protocol) server that translates natural-language
//! prompts into KQL queries and runs them against configured Kusto tables.
//!
//! ## Architecture
//!
//! ```text
//! AI Agent (Claude, VS Code, etc.)
//!       │
//!       │ MCP protocol (list tools / call tool / resources)
//!       ▼
//! ┌──────────────────────┐
//! │  nl2kql MCP Server   │
//! │  1. Look up seed     │  ← settings (nl2kql-core)
//! │     conversation     │
//! │  2. Generate KQL     │  ← chat capability
//! │  3. Strip code fence │
//! │  4. Run query        │  ← query engine
//! │  5. Json: inline     │
//! │     Csv: temp file + │
//! │     resource record  │
//! └──────────┬───────────┘
//!            │ notifications/resources/*
//!            ▼
//!      Calling session
//! ```
//!
//! ## Tools
//!
//! | Tool | Description |
//! |------|-------------|
//! | `list-supported-tables` | Lists all supported (name, category) pairs |
//! | `generate-kusto-query` | Generates a KQL query from a prompt |
//! | `execute-kusto-query` | Generates and runs a query; Json or Csv output |
//!
//! Csv output is written to a temporary file, registered as an MCP resource,
//! and announced with a `resources/list_changed` notification. Subscribed
//! resources additionally emit `resources/updated` on overwrite.

pub mod chat;
pub mod error;
pub mod execute;
pub mod generate;
pub mod http_transport;
pub mod protocol;
pub mod resources;
pub mod server;
pub mod tools;

pub use chat::{AzureOpenAiClient, ChatCompletion, ChatMessage, SamplingClient};
pub use error::McpError;
pub use execute::{KustoRestEngine, QueryEngine, QueryExecutor, RowSet};
pub use generate::{strip_code_fence, QueryGenerator};
pub use protocol::{JsonRpcRequest, JsonRpcResponse, ToolContent, ToolDefinition};
pub use resources::{NotificationSink, ResourceRecord, ResourceRegistry};
pub use server::{KqlMcpServer, StdioNotificationSink};
pub use tools::KustoTools;
