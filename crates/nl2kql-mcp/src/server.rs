//! MCP server implementation.
//!
//! Handles the JSON-RPC surface: initialize, tool discovery and dispatch, and
//! the resource protocol (list/read/subscribe/unsubscribe). One instance is
//! shared across concurrent invocations; the registry serializes its own
//! mutations.

use crate::error::McpError;
use crate::protocol::*;
use crate::resources::{is_binary_mime, NotificationSink, ResourceRegistry};
use crate::tools::KustoTools;
use base64::Engine as _;
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::sync::Arc;

/// The MCP server.
pub struct KqlMcpServer {
    tools: KustoTools,
    registry: Arc<ResourceRegistry>,
}

impl KqlMcpServer {
    pub fn new(tools: KustoTools, registry: Arc<ResourceRegistry>) -> Self {
        Self { tools, registry }
    }

    /// Run the server over stdio: line-delimited JSON-RPC on stdin/stdout.
    pub async fn run_stdio(&self) -> Result<(), McpError> {
        tracing::info!("starting MCP server with stdio transport");

        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        let mut stdout_lock = stdout.lock();

        for line in stdin.lock().lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed request line");
                    JsonRpcResponse::error(None, -32700, format!("parse error: {e}"))
                }
            };
            let response_json = serde_json::to_string(&response)?;

            writeln!(stdout_lock, "{}", response_json)?;
            stdout_lock.flush()?;
        }

        Ok(())
    }

    /// Handle a JSON-RPC request.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "initialized" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => self.handle_call_tool(id, request.params).await,
            "resources/list" => self.handle_list_resources(id),
            "resources/read" => self.handle_read_resource(id, request.params),
            "resources/subscribe" => self.handle_subscribe(id, request.params),
            "resources/unsubscribe" => self.handle_unsubscribe(id, request.params),
            "shutdown" => self.handle_shutdown(id),
            _ => JsonRpcResponse::error(
                id,
                -32601,
                format!("Method not found: {}", request.method),
            ),
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        let result = json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": {
                "name": "nl2kql-mcp",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "tools": {},
                "resources": {
                    "subscribe": true,
                    "listChanged": true
                }
            }
        });
        JsonRpcResponse::success(id, result)
    }

    fn handle_list_tools(&self, id: Option<Value>) -> JsonRpcResponse {
        let result = json!({ "tools": KustoTools::definitions() });
        JsonRpcResponse::success(id, result)
    }

    async fn handle_call_tool(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: CallToolParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e))
                }
            },
            None => return JsonRpcResponse::error(id, -32602, "Missing params"),
        };

        match self.tools.call(&params.name, params.arguments).await {
            Ok(text) => {
                let result = json!({
                    "content": [ToolContent::Text { text }],
                    "isError": false
                });
                JsonRpcResponse::success(id, result)
            }
            Err(e) => JsonRpcResponse::error(id, e.jsonrpc_code(), e.to_string()),
        }
    }

    fn handle_list_resources(&self, id: Option<Value>) -> JsonRpcResponse {
        JsonRpcResponse::success(id, json!({ "resources": self.registry.list() }))
    }

    /// Read a registered resource from disk. MIME type decides text vs blob.
    fn handle_read_resource(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let uri = match parse_uri(params) {
            Ok(uri) => uri,
            Err(message) => return JsonRpcResponse::error(id, -32602, message),
        };

        let Some(record) = self.registry.get(&uri) else {
            let e = McpError::ResourceNotFound { uri };
            return JsonRpcResponse::error(id, e.jsonrpc_code(), e.to_string());
        };

        let contents = if is_binary_mime(&record.mime_type) {
            std::fs::read(&record.uri).map(|bytes| ResourceContents::Blob {
                uri: record.uri.clone(),
                mime_type: record.mime_type.clone(),
                blob: base64::engine::general_purpose::STANDARD.encode(bytes),
            })
        } else {
            std::fs::read_to_string(&record.uri).map(|text| ResourceContents::Text {
                uri: record.uri.clone(),
                mime_type: record.mime_type.clone(),
                text,
            })
        };

        match contents {
            Ok(contents) => JsonRpcResponse::success(id, json!({ "contents": [contents] })),
            Err(e) => JsonRpcResponse::error(id, -32603, format!("failed to read resource: {e}")),
        }
    }

    fn handle_subscribe(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let uri = match parse_uri(params) {
            Ok(uri) => uri,
            Err(message) => return JsonRpcResponse::error(id, -32602, message),
        };
        self.registry.subscribe(&uri);
        JsonRpcResponse::success(id, json!({}))
    }

    fn handle_unsubscribe(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let uri = match parse_uri(params) {
            Ok(uri) => uri,
            Err(message) => return JsonRpcResponse::error(id, -32602, message),
        };
        match self.registry.unsubscribe(&uri) {
            Ok(()) => JsonRpcResponse::success(id, json!({})),
            Err(e) => JsonRpcResponse::error(id, e.jsonrpc_code(), e.to_string()),
        }
    }

    fn handle_shutdown(&self, id: Option<Value>) -> JsonRpcResponse {
        tracing::info!("MCP server shutdown requested");
        JsonRpcResponse::success(id, json!(null))
    }
}

fn parse_uri(params: Option<Value>) -> Result<String, String> {
    let params = params.ok_or_else(|| "Missing params".to_string())?;
    serde_json::from_value::<ResourceUriParams>(params)
        .map(|p| p.uri)
        .map_err(|e| format!("Invalid params: {}", e))
}

/// Notification sink for the stdio transport: notifications are written
/// directly to stdout as JSON-RPC notification lines. Best-effort; a write
/// failure is logged and dropped.
pub struct StdioNotificationSink;

impl NotificationSink for StdioNotificationSink {
    fn notify(&self, method: &str, params: Option<Value>) {
        let notification = JsonRpcNotification::new(method, params);
        let line = match serde_json::to_string(&notification) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, method, "could not serialize notification");
                return;
            }
        };

        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        if let Err(e) = writeln!(lock, "{}", line).and_then(|()| lock.flush()) {
            tracing::warn!(error = %e, method, "could not deliver notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatCompletion, ChatMessage};
    use crate::execute::{QueryEngine, QueryExecutor, RowSet};
    use crate::generate::QueryGenerator;
    use crate::resources::{NullNotificationSink, ResourceRecord};
    use async_trait::async_trait;
    use nl2kql_core::{KustoSettings, Settings};
    use std::collections::HashMap;

    struct StubChat;

    #[async_trait]
    impl ChatCompletion for StubChat {
        async fn complete(&self, _messages: &[ChatMessage]) -> anyhow::Result<String> {
            Ok("X | take 10".to_string())
        }
    }

    struct StubEngine;

    #[async_trait]
    impl QueryEngine for StubEngine {
        async fn run_query(
            &self,
            _binding: &KustoSettings,
            _query: &str,
        ) -> anyhow::Result<RowSet> {
            Ok(RowSet::default())
        }
    }

    fn build_server() -> KqlMcpServer {
        let settings = Arc::new(
            Settings::from_yaml(
                r#"
model:
  endpoint: https://example.openai.azure.com
  deployment: gpt-4o
kusto:
  - name: Errors
    category: ops
    database: telemetry
    endpoint: https://cluster.kusto.windows.net
    table: Errors
    prompts: []
"#,
            )
            .unwrap(),
        );
        let generator = QueryGenerator::new(&settings, Arc::new(StubChat));
        let executor = QueryExecutor::new(settings.clone(), Arc::new(StubEngine));
        let registry = Arc::new(ResourceRegistry::new(Arc::new(NullNotificationSink)));
        let tools = KustoTools::new(settings, generator, executor, registry.clone());
        KqlMcpServer::new(tools, registry)
    }

    fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(1)),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn initialize_advertises_resource_capabilities() {
        let server = build_server();
        let response = server.handle_request(request("initialize", None)).await;

        let result = response.result.unwrap();
        assert_eq!(result["capabilities"]["resources"]["subscribe"], true);
        assert_eq!(result["capabilities"]["resources"]["listChanged"], true);
    }

    #[tokio::test]
    async fn lists_the_three_tools() {
        let server = build_server();
        let response = server.handle_request(request("tools/list", None)).await;

        let tools = response.result.unwrap();
        let names: Vec<_> = tools["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "list-supported-tables",
                "generate-kusto-query",
                "execute-kusto-query"
            ]
        );
    }

    #[tokio::test]
    async fn call_tool_returns_text_content() {
        let server = build_server();
        let response = server
            .handle_request(request(
                "tools/call",
                Some(json!({ "name": "list-supported-tables", "arguments": {} })),
            ))
            .await;

        let result = response.result.unwrap();
        let content = &result["content"][0];
        assert_eq!(content["type"], "text");
        assert!(content["text"].as_str().unwrap().contains("Errors"));
        assert_eq!(result["isError"], false);
    }

    #[tokio::test]
    async fn call_nonexistent_tool_is_an_error() {
        let server = build_server();
        let response = server
            .handle_request(request(
                "tools/call",
                Some(json!({ "name": "nonexistent", "arguments": {} })),
            ))
            .await;
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn unknown_method_is_an_error() {
        let server = build_server();
        let response = server.handle_request(request("prompts/list", None)).await;
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn read_unknown_resource_fails() {
        let server = build_server();
        let response = server
            .handle_request(request(
                "resources/read",
                Some(json!({ "uri": "/tmp/nope.csv" })),
            ))
            .await;
        assert_eq!(response.error.unwrap().code, -32600);
    }

    #[tokio::test]
    async fn reads_a_text_resource_from_disk() {
        let server = build_server();

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "Severity,Count,\nError,42,\n").unwrap();
        let uri = file.path().to_string_lossy().into_owned();

        server
            .registry
            .add(ResourceRecord {
                uri: uri.clone(),
                name: "results.csv".to_string(),
                mime_type: "text/csv".to_string(),
                size: None,
                description: None,
                properties: HashMap::new(),
            })
            .unwrap();

        let response = server
            .handle_request(request("resources/read", Some(json!({ "uri": uri }))))
            .await;
        let contents = &response.result.unwrap()["contents"][0];
        assert_eq!(contents["mimeType"], "text/csv");
        assert!(contents["text"].as_str().unwrap().starts_with("Severity,"));
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_roundtrip() {
        let server = build_server();

        let ok = server
            .handle_request(request(
                "resources/subscribe",
                Some(json!({ "uri": "/tmp/a.csv" })),
            ))
            .await;
        assert!(ok.error.is_none());

        let ok = server
            .handle_request(request(
                "resources/unsubscribe",
                Some(json!({ "uri": "/tmp/a.csv" })),
            ))
            .await;
        assert!(ok.error.is_none());

        let err = server
            .handle_request(request(
                "resources/unsubscribe",
                Some(json!({ "uri": "/tmp/a.csv" })),
            ))
            .await;
        assert_eq!(err.error.unwrap().code, -32600);
    }
}
