//! Server settings.
//!
//! The settings file is YAML with one chat-model section and a list of Kusto
//! table bindings, each carrying the seed conversation used to teach the model
//! that table's shape. `${{ NAME }}` tokens anywhere in the file are replaced
//! with the named environment variable before parsing; a missing or empty
//! variable aborts the load.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Error type for settings loading.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),
}

/// Complete server settings loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Chat-model connection used for query generation.
    pub model: ModelSettings,

    /// Kusto table bindings, one per supported (category, table) pair.
    pub kusto: Vec<KustoSettings>,
}

/// Chat-model endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Azure OpenAI endpoint, e.g. `https://example.openai.azure.com`.
    pub endpoint: String,

    /// Deployment name of the chat model.
    pub deployment: String,

    /// API key. Interpolated from the environment in practice.
    #[serde(default)]
    pub key: Option<String>,
}

/// Connection and prompt information for one Kusto table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KustoSettings {
    /// Logical table name exposed to callers.
    pub name: String,

    /// Category the table exists within.
    pub category: String,

    /// Kusto database the query runs against.
    pub database: String,

    /// Cluster endpoint, e.g. `https://cluster.region.kusto.windows.net`.
    pub endpoint: String,

    /// Physical table name inside the database.
    pub table: String,

    /// Ordered seed conversation for query generation.
    pub prompts: Vec<SeedPrompt>,
}

/// One message of a seed conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedPrompt {
    /// Role of the message author.
    #[serde(rename = "type")]
    pub role: PromptRole,

    /// Message text.
    pub content: String,
}

/// The closed set of seed-prompt roles. An unknown role in the settings file
/// fails at load time, not at lookup time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl Settings {
    /// Load settings from a YAML file, interpolating environment variables.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse settings from YAML text, interpolating environment variables.
    pub fn from_yaml(contents: &str) -> Result<Self, SettingsError> {
        let contents = interpolate_env(contents)?;
        serde_yaml::from_str(&contents).map_err(SettingsError::from)
    }

    /// Find the binding for a (category, table) pair, case-insensitively.
    pub fn find_kusto(&self, category: &str, name: &str) -> Option<&KustoSettings> {
        self.kusto.iter().find(|k| {
            k.category.eq_ignore_ascii_case(category) && k.name.eq_ignore_ascii_case(name)
        })
    }

    /// All configured (name, category) pairs.
    pub fn supported_tables(&self) -> impl Iterator<Item = (&str, &str)> {
        self.kusto.iter().map(|k| (k.name.as_str(), k.category.as_str()))
    }

    /// Human-readable enumeration of every supported pair, used verbatim in
    /// "unsupported table" errors.
    pub fn supported_tables_display(&self) -> String {
        self.kusto
            .iter()
            .map(|k| format!("Category: {}, Table: {}", k.category, k.name))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Replace `${{ NAME }}` tokens with the value of the named environment
/// variable. Runs before structural parsing; a variable that is absent or
/// empty is a hard error.
fn interpolate_env(input: &str) -> Result<String, SettingsError> {
    let re = Regex::new(r"\$\{\{\s*(.*?)\s*\}\}").expect("valid regex");

    let mut result = String::with_capacity(input.len());
    let mut last = 0;
    for caps in re.captures_iter(input) {
        let whole = caps.get(0).expect("match");
        let name = &caps[1];
        let value = std::env::var(name).unwrap_or_default();
        if value.is_empty() {
            return Err(SettingsError::MissingEnvVar(name.to_string()));
        }
        result.push_str(&input[last..whole.start()]);
        result.push_str(&value);
        last = whole.end();
    }
    result.push_str(&input[last..]);
    Ok(result)
}
