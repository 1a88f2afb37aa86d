//! Query execution against Kusto.
//!
//! The engine is an opaque capability: given a table binding and query text,
//! return a row-oriented result set or fail. The executor resolves bindings,
//! runs queries, and renders results as JSON rows or delimited text.

use crate::error::McpError;
use async_trait::async_trait;
use nl2kql_core::{KustoSettings, Settings};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Row-oriented query result.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Opaque tabular-query capability.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn run_query(&self, binding: &KustoSettings, query: &str) -> anyhow::Result<RowSet>;
}

/// Kusto REST API query engine.
///
/// Issues `POST {endpoint}/v1/rest/query` with `{"db", "csl"}` and reads the
/// first table of the response. A bearer token is picked up from
/// `KUSTO_ACCESS_TOKEN` when present.
pub struct KustoRestEngine {
    http: reqwest::Client,
    access_token: Option<String>,
}

impl KustoRestEngine {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token: std::env::var("KUSTO_ACCESS_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        }
    }
}

impl Default for KustoRestEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryEngine for KustoRestEngine {
    async fn run_query(&self, binding: &KustoSettings, query: &str) -> anyhow::Result<RowSet> {
        let url = format!("{}/v1/rest/query", binding.endpoint.trim_end_matches('/'));

        let mut request = self.http.post(&url).json(&serde_json::json!({
            "db": binding.database,
            "csl": query,
        }));
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let body: Value = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_primary_table(&body)
    }
}

/// Extract columns and rows from the first table of a v1 query response.
fn parse_primary_table(body: &Value) -> anyhow::Result<RowSet> {
    let table = body["Tables"]
        .get(0)
        .ok_or_else(|| anyhow::anyhow!("no tables in query response"))?;

    let columns = table["Columns"]
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("no columns in query response"))?
        .iter()
        .map(|c| {
            c["ColumnName"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("column without a name in query response"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let rows = table["Rows"]
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("no rows in query response"))?
        .iter()
        .map(|r| {
            r.as_array()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("malformed row in query response"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(RowSet { columns, rows })
}

/// Query execution service.
pub struct QueryExecutor {
    settings: Arc<Settings>,
    engine: Arc<dyn QueryEngine>,
}

impl QueryExecutor {
    pub fn new(settings: Arc<Settings>, engine: Arc<dyn QueryEngine>) -> Self {
        Self { settings, engine }
    }

    /// Run a query and serialize the result as a JSON row array, one object
    /// per row with field names taken from column metadata.
    pub async fn execute_json(
        &self,
        category: &str,
        table: &str,
        query: &str,
    ) -> Result<Value, McpError> {
        let rows = self.run(category, table, query).await?;
        Ok(rowset_to_json(&rows))
    }

    /// Run a query and render the result as delimited text: a header line of
    /// comma-joined column names, then one line per row. Each value is
    /// followed by a comma, including the last one on a line.
    pub async fn execute_csv(
        &self,
        category: &str,
        table: &str,
        query: &str,
    ) -> Result<String, McpError> {
        let rows = self.run(category, table, query).await?;
        Ok(render_csv(&rows))
    }

    async fn run(&self, category: &str, table: &str, query: &str) -> Result<RowSet, McpError> {
        let binding = self.settings.find_kusto(category, table).ok_or_else(|| {
            McpError::InvalidArgument(format!(
                "No cluster information found for table {} in category {}. Supported tables: {}",
                table,
                category,
                self.settings.supported_tables_display()
            ))
        })?;

        tracing::info!(database = %binding.database, "running query:\n{query}");

        self.engine
            .run_query(binding, query)
            .await
            .map_err(|e| McpError::QueryFailed {
                query: query.to_string(),
                message: e.to_string(),
            })
    }
}

fn rowset_to_json(rows: &RowSet) -> Value {
    Value::Array(
        rows.rows
            .iter()
            .map(|row| {
                let mut object = Map::with_capacity(rows.columns.len());
                for (column, value) in rows.columns.iter().zip(row) {
                    object.insert(column.clone(), value.clone());
                }
                Value::Object(object)
            })
            .collect(),
    )
}

/// Render a row set as delimited text. Values are not quote-escaped; a value
/// containing a comma or newline will not round-trip.
fn render_csv(rows: &RowSet) -> String {
    let mut out = String::new();
    for column in &rows.columns {
        out.push_str(column);
        out.push(',');
    }
    out.push('\n');

    for row in &rows.rows {
        for value in row {
            out.push_str(&csv_value(value));
            out.push(',');
        }
        out.push('\n');
    }

    out
}

fn csv_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
