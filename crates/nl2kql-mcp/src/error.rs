//! Error types for the MCP crate.

use thiserror::Error;

/// Errors that can occur in the MCP server.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to start the server.
    #[error("failed to start MCP server: {0}")]
    StartupFailed(String),

    /// Invalid tool arguments: empty prompt/table, unknown (category, table)
    /// pair, malformed parameters.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The chat capability failed; re-raised unmodified.
    #[error("query generation failed: {0}")]
    GenerationFailed(#[source] anyhow::Error),

    /// The query engine failed. Retains the exact query text that was run.
    #[error("An error occurred when executing query:\n\n{query}\n\n{message}")]
    QueryFailed { query: String, message: String },

    /// Duplicate URI on resource registration.
    #[error("resource with uri {uri} already exists")]
    ResourceExists { uri: String },

    /// Missing URI on resource read/update/remove.
    #[error("resource with uri {uri} not found")]
    ResourceNotFound { uri: String },

    /// Missing URI on unsubscribe.
    #[error("subscription with uri {uri} not found")]
    SubscriptionNotFound { uri: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl McpError {
    /// JSON-RPC error code for this error.
    pub fn jsonrpc_code(&self) -> i32 {
        match self {
            McpError::InvalidArgument(_) => -32602,
            McpError::ResourceExists { .. }
            | McpError::ResourceNotFound { .. }
            | McpError::SubscriptionNotFound { .. } => -32600,
            _ => -32603,
        }
    }
}
