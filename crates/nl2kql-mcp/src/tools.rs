//! Kusto tools exposed over MCP.
//!
//! Three tools: `list-supported-tables`, `generate-kusto-query`, and
//! `execute-kusto-query`. Execution dispatches on the requested output mode:
//! Json results are returned inline, Csv results are written to a temporary
//! file and registered as a subscribable resource.

use crate::error::McpError;
use crate::execute::QueryExecutor;
use crate::generate::{strip_code_fence, QueryGenerator};
use crate::protocol::ToolDefinition;
use crate::resources::{ResourceRecord, ResourceRegistry};
use nl2kql_core::Settings;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

/// Output mode for `execute-kusto-query`. A value outside this set fails
/// parameter parsing before any generation or execution is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputType {
    Json,
    Csv,
}

/// Parameters for generating a KQL query from natural language.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryParams {
    pub table: String,
    pub category: String,
    pub prompt: String,
}

/// Parameters for generating and running a KQL query.
#[derive(Debug, Clone, Deserialize)]
pub struct RunQueryParams {
    #[serde(flatten)]
    pub query: QueryParams,
    #[serde(rename = "outputType")]
    pub output_type: OutputType,
}

/// The tool dispatch layer: generation, execution, and resource registration
/// behind three MCP tools.
pub struct KustoTools {
    settings: Arc<Settings>,
    generator: QueryGenerator,
    executor: QueryExecutor,
    registry: Arc<ResourceRegistry>,
}

impl KustoTools {
    pub fn new(
        settings: Arc<Settings>,
        generator: QueryGenerator,
        executor: QueryExecutor,
        registry: Arc<ResourceRegistry>,
    ) -> Self {
        Self {
            settings,
            generator,
            executor,
            registry,
        }
    }

    /// Tool definitions advertised to the session.
    pub fn definitions() -> Vec<ToolDefinition> {
        let query_properties = json!({
            "table": {
                "type": "string",
                "description": "Name of the table to run the query against."
            },
            "category": {
                "type": "string",
                "description": "Category the table exists within."
            },
            "prompt": {
                "type": "string",
                "description": "Natural language description of the query to generate."
            }
        });

        vec![
            ToolDefinition {
                name: "list-supported-tables".to_string(),
                description: Some("Lists all supported tables.".to_string()),
                input_schema: json!({ "type": "object", "properties": {} }),
            },
            ToolDefinition {
                name: "generate-kusto-query".to_string(),
                description: Some(
                    "Generates a KQL query using the given table information.".to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": query_properties,
                    "required": ["table", "category", "prompt"]
                }),
            },
            ToolDefinition {
                name: "execute-kusto-query".to_string(),
                description: Some(
                    "Generates and runs a KQL query against the given table. Returns results \
                     in Json format or Csv format, depending on the outputType parameter."
                        .to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "table": query_properties["table"],
                        "category": query_properties["category"],
                        "prompt": query_properties["prompt"],
                        "outputType": {
                            "type": "string",
                            "enum": ["Json", "Csv"],
                            "description": "Output type for the query results."
                        }
                    },
                    "required": ["table", "category", "prompt", "outputType"]
                }),
            },
        ]
    }

    /// Dispatch a tool call by name. Returns the tool's text payload.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<String, McpError> {
        match name {
            "list-supported-tables" => self.list_supported_tables(),
            "generate-kusto-query" => {
                let params: QueryParams = parse_arguments(arguments)?;
                self.generate_query(&params).await
            }
            "execute-kusto-query" => {
                let params: RunQueryParams = parse_arguments(arguments)?;
                self.execute_query(&params).await
            }
            other => Err(McpError::InvalidArgument(format!(
                "tool not found: {other}"
            ))),
        }
    }

    fn list_supported_tables(&self) -> Result<String, McpError> {
        let tables: Vec<_> = self
            .settings
            .supported_tables()
            .map(|(name, category)| json!({ "name": name, "category": category }))
            .collect();
        Ok(serde_json::to_string(&json!({ "tables": tables }))?)
    }

    async fn generate_query(&self, params: &QueryParams) -> Result<String, McpError> {
        self.generator
            .generate(&params.category, &params.table, &params.prompt, false)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "error encountered when generating query"))
    }

    async fn execute_query(&self, params: &RunQueryParams) -> Result<String, McpError> {
        let generated = self.generate_query(&params.query).await?;
        let query = strip_code_fence(&generated).to_string();

        let result = match params.output_type {
            OutputType::Json => self.execute_json(params, &query).await,
            OutputType::Csv => self.execute_csv(params, &query).await,
        };

        result.inspect_err(|e| tracing::error!(error = %e, "error encountered when executing query"))
    }

    async fn execute_json(&self, params: &RunQueryParams, query: &str) -> Result<String, McpError> {
        let rows = self
            .executor
            .execute_json(&params.query.category, &params.query.table, query)
            .await?;
        Ok(serde_json::to_string(&rows)?)
    }

    /// Csv mode: render, write to a fresh temporary `.csv` file, register the
    /// file as a resource, and return the serialized record. The file is kept
    /// until the resource is explicitly removed or the environment reclaims
    /// it.
    async fn execute_csv(&self, params: &RunQueryParams, query: &str) -> Result<String, McpError> {
        let csv = self
            .executor
            .execute_csv(&params.query.category, &params.query.table, query)
            .await?;

        let mut file = tempfile::Builder::new().suffix(".csv").tempfile()?;
        file.write_all(csv.as_bytes())?;
        let (_, path) = file.keep().map_err(|e| McpError::Io(e.error))?;

        tracing::info!(path = %path.display(), "writing CSV to temporary file");

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let record = ResourceRecord {
            uri: path.to_string_lossy().into_owned(),
            name,
            mime_type: "text/csv".to_string(),
            size: Some(csv.len() as u64),
            description: Some(
                "A CSV file in a temporary location created using provided query".to_string(),
            ),
            properties: HashMap::from([("Query".to_string(), query.to_string())]),
        };

        self.registry.add(record.clone())?;
        Ok(serde_json::to_string(&record)?)
    }
}

fn parse_arguments<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, McpError> {
    serde_json::from_value(arguments)
        .map_err(|e| McpError::InvalidArgument(format!("invalid tool arguments: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatCompletion, ChatMessage};
    use crate::execute::{QueryEngine, RowSet};
    use crate::resources::{NotificationSink, NullNotificationSink};
    use async_trait::async_trait;
    use nl2kql_core::KustoSettings;
    use std::sync::Mutex;

    const SETTINGS: &str = r#"
model:
  endpoint: https://example.openai.azure.com
  deployment: gpt-4o
kusto:
  - name: Errors
    category: ops
    database: telemetry
    endpoint: https://cluster.kusto.windows.net
    table: Errors
    prompts:
      - type: System
        content: "schema is X"
      - type: User
        content: "show me recent"
      - type: Assistant
        content: "X | take 10"
"#;

    struct StubChat {
        reply: String,
    }

    #[async_trait]
    impl ChatCompletion for StubChat {
        async fn complete(&self, _messages: &[ChatMessage]) -> anyhow::Result<String> {
            Ok(self.reply.clone())
        }
    }

    /// Engine returning a fixed result and recording the query it was given.
    struct StubEngine {
        result: RowSet,
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueryEngine for StubEngine {
        async fn run_query(
            &self,
            _binding: &KustoSettings,
            query: &str,
        ) -> anyhow::Result<RowSet> {
            self.queries.lock().unwrap().push(query.to_string());
            Ok(self.result.clone())
        }
    }

    fn two_row_result() -> RowSet {
        RowSet {
            columns: vec!["Severity".to_string(), "Count".to_string()],
            rows: vec![
                vec![json!("Error"), json!(42)],
                vec![json!("Warning"), json!(7)],
            ],
        }
    }

    fn build_tools(
        chat_reply: &str,
        engine: Arc<StubEngine>,
        sink: Arc<dyn NotificationSink>,
    ) -> KustoTools {
        let settings = Arc::new(Settings::from_yaml(SETTINGS).unwrap());
        let chat = Arc::new(StubChat {
            reply: chat_reply.to_string(),
        });
        let generator = QueryGenerator::new(&settings, chat);
        let executor = QueryExecutor::new(settings.clone(), engine);
        let registry = Arc::new(ResourceRegistry::new(sink));
        KustoTools::new(settings, generator, executor, registry)
    }

    #[tokio::test]
    async fn lists_supported_tables() {
        let engine = Arc::new(StubEngine {
            result: RowSet::default(),
            queries: Mutex::new(Vec::new()),
        });
        let tools = build_tools("q", engine, Arc::new(NullNotificationSink));

        let text = tools
            .call("list-supported-tables", json!({}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["tables"], json!([{ "name": "Errors", "category": "ops" }]));
    }

    #[tokio::test]
    async fn generate_returns_raw_query_text() {
        let engine = Arc::new(StubEngine {
            result: RowSet::default(),
            queries: Mutex::new(Vec::new()),
        });
        let tools = build_tools("```X | take 10```", engine, Arc::new(NullNotificationSink));

        // The generate tool does not strip code fences; execution does.
        let text = tools
            .call(
                "generate-kusto-query",
                json!({ "table": "Errors", "category": "ops", "prompt": "recent errors" }),
            )
            .await
            .unwrap();
        assert_eq!(text, "```X | take 10```");
    }

    #[tokio::test]
    async fn execute_json_strips_fences_and_returns_rows() {
        let engine = Arc::new(StubEngine {
            result: two_row_result(),
            queries: Mutex::new(Vec::new()),
        });
        let tools = build_tools(
            "```X | summarize count() by Severity```",
            engine.clone(),
            Arc::new(NullNotificationSink),
        );

        let text = tools
            .call(
                "execute-kusto-query",
                json!({
                    "table": "Errors",
                    "category": "ops",
                    "prompt": "count by severity",
                    "outputType": "Json"
                }),
            )
            .await
            .unwrap();

        let rows: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            rows,
            json!([
                { "Severity": "Error", "Count": 42 },
                { "Severity": "Warning", "Count": 7 },
            ])
        );

        // The engine saw the stripped query.
        assert_eq!(
            engine.queries.lock().unwrap().as_slice(),
            ["X | summarize count() by Severity"]
        );
    }

    #[tokio::test]
    async fn execute_csv_registers_a_resource() {
        let sink = crate::resources::tests::RecordingSink::new();
        let engine = Arc::new(StubEngine {
            result: two_row_result(),
            queries: Mutex::new(Vec::new()),
        });
        let tools = build_tools(
            "```X | summarize count() by Severity```",
            engine,
            sink.clone(),
        );

        let text = tools
            .call(
                "execute-kusto-query",
                json!({
                    "table": "Errors",
                    "category": "ops",
                    "prompt": "count by severity",
                    "outputType": "Csv"
                }),
            )
            .await
            .unwrap();

        let record: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(record["mimeType"], "text/csv");
        assert_eq!(record["properties"]["Query"], "X | summarize count() by Severity");

        let path = record["uri"].as_str().unwrap();
        assert!(path.ends_with(".csv"));
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.starts_with("Severity,Count,\n"));
        assert_eq!(record["size"], contents.len() as u64);

        // Registration announced the new resource.
        let notifications = sink.notifications.lock().unwrap();
        assert_eq!(notifications[0].0, "notifications/resources/list_changed");
        drop(notifications);

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn unknown_output_type_fails_before_execution() {
        let engine = Arc::new(StubEngine {
            result: two_row_result(),
            queries: Mutex::new(Vec::new()),
        });
        let tools = build_tools("q", engine.clone(), Arc::new(NullNotificationSink));

        let err = tools
            .call(
                "execute-kusto-query",
                json!({
                    "table": "Errors",
                    "category": "ops",
                    "prompt": "count by severity",
                    "outputType": "Xml"
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidArgument(_)));
        assert!(engine.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_name_is_rejected() {
        let engine = Arc::new(StubEngine {
            result: RowSet::default(),
            queries: Mutex::new(Vec::new()),
        });
        let tools = build_tools("q", engine, Arc::new(NullNotificationSink));

        let err = tools.call("drop-all-tables", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::InvalidArgument(_)));
    }
}
