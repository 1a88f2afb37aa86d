//! Natural-language-to-KQL query generation.
//!
//! A prompt table maps each configured (category, table) pair to its seed
//! conversation. Generation prepends a fixed system instruction, appends the
//! caller's prompt, and submits the conversation to the chat capability. When
//! sampling is requested and the session provides a sampling client, the
//! request is routed through the caller instead.

use crate::chat::{
    ChatCompletion, ChatMessage, CreateMessageParams, SamplingClient, SamplingMessage,
};
use crate::error::McpError;
use nl2kql_core::{PromptRole, Settings};
use std::collections::HashMap;
use std::sync::Arc;

/// Fixed instruction preceding every seed conversation; never omitted.
pub const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant that translates natural language queries into KQL queries. You will receive a system message indicating the structure of a given KQL table, followed by a few examples showing expected outputs.\"";

/// Delimiter joining system messages in the sampling path.
const SYSTEM_PROMPT_DELIMITER: &str = "\n---\n";

/// In-memory mapping from (category, table) to its seed conversation.
/// Built once from settings; immutable afterwards.
pub struct PromptTable {
    entries: HashMap<String, Vec<ChatMessage>>,
    supported: String,
}

impl PromptTable {
    /// Build the table by converting every configured prompt entry into a
    /// role-tagged message, indexed by a case-insensitive composite key.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut entries = HashMap::with_capacity(settings.kusto.len());
        for kusto in &settings.kusto {
            let messages = kusto
                .prompts
                .iter()
                .map(|p| match p.role {
                    PromptRole::System => ChatMessage::System(p.content.clone()),
                    PromptRole::User => ChatMessage::User(p.content.clone()),
                    PromptRole::Assistant => ChatMessage::Assistant(p.content.clone()),
                })
                .collect();
            entries.insert(Self::key(&kusto.category, &kusto.name), messages);
        }

        Self {
            entries,
            supported: settings.supported_tables_display(),
        }
    }

    /// Look up the seed conversation for a (category, table) pair.
    pub fn lookup(&self, category: &str, table: &str) -> Option<&[ChatMessage]> {
        self.entries
            .get(&Self::key(category, table))
            .map(Vec::as_slice)
    }

    /// Enumeration of every supported pair, for "unsupported" errors.
    pub fn supported_display(&self) -> &str {
        &self.supported
    }

    fn key(category: &str, table: &str) -> String {
        format!(
            "{}::{}",
            category.to_ascii_lowercase(),
            table.to_ascii_lowercase()
        )
    }
}

/// Query generation service.
pub struct QueryGenerator {
    prompts: PromptTable,
    chat: Arc<dyn ChatCompletion>,
    sampler: Option<Arc<dyn SamplingClient>>,
}

impl QueryGenerator {
    /// Create a generator over the configured prompt table.
    pub fn new(settings: &Settings, chat: Arc<dyn ChatCompletion>) -> Self {
        Self {
            prompts: PromptTable::from_settings(settings),
            chat,
            sampler: None,
        }
    }

    /// Provide the calling session's sampling capability.
    pub fn with_sampler(mut self, sampler: Arc<dyn SamplingClient>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Generate a KQL query for the given table from a natural-language
    /// prompt. With `sample` set and a sampler configured, generation goes
    /// through the caller's sampling capability instead of the chat client.
    pub async fn generate(
        &self,
        category: &str,
        table: &str,
        prompt: &str,
        sample: bool,
    ) -> Result<String, McpError> {
        if prompt.is_empty() {
            return Err(McpError::InvalidArgument(
                "prompt must not be empty".to_string(),
            ));
        }
        if table.is_empty() {
            return Err(McpError::InvalidArgument(
                "table must not be empty".to_string(),
            ));
        }

        let seed = self.prompts.lookup(category, table).ok_or_else(|| {
            McpError::InvalidArgument(format!(
                "The table '{}' in category '{}' is not supported. Supported tables: {}",
                table,
                category,
                self.prompts.supported_display()
            ))
        })?;

        if sample {
            if let Some(sampler) = &self.sampler {
                let params = sampling_params(seed, prompt);
                return sampler
                    .create_message(params)
                    .await
                    .map_err(McpError::GenerationFailed);
            }
        }

        let mut messages = Vec::with_capacity(seed.len() + 2);
        messages.push(ChatMessage::System(SYSTEM_INSTRUCTION.to_string()));
        messages.extend_from_slice(seed);
        messages.push(ChatMessage::User(prompt.to_string()));

        self.chat
            .complete(&messages)
            .await
            .map_err(McpError::GenerationFailed)
    }
}

/// Build a sampling request: system messages (the fixed instruction first,
/// then the seed's, in order) fold into one combined system prompt; user and
/// assistant turns pass through 1:1.
fn sampling_params(seed: &[ChatMessage], prompt: &str) -> CreateMessageParams {
    let mut system_parts = vec![SYSTEM_INSTRUCTION.to_string()];
    let mut messages = Vec::with_capacity(seed.len() + 1);

    for message in seed {
        match message {
            ChatMessage::System(text) => system_parts.push(text.clone()),
            ChatMessage::User(text) => messages.push(SamplingMessage::user(text.clone())),
            ChatMessage::Assistant(text) => messages.push(SamplingMessage::assistant(text.clone())),
        }
    }
    messages.push(SamplingMessage::user(prompt));

    CreateMessageParams {
        messages,
        system_prompt: system_parts.join(SYSTEM_PROMPT_DELIMITER),
        include_context: "allServers".to_string(),
        temperature: 0.7,
    }
}

/// Strip a single markdown code fence, if present. One leading ``` is
/// removed, then one trailing ``` if present; never recursive, no
/// whitespace trimming.
pub fn strip_code_fence(text: &str) -> &str {
    match text.strip_prefix("```") {
        Some(rest) => rest.strip_suffix("```").unwrap_or(rest),
        None => text,
    }
}
