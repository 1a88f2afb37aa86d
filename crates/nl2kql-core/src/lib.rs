//! # nl2kql-core
//!
//! Settings types and loader shared by the nl2kql crates.
//!
//! Settings are loaded once at process startup from a YAML file. The raw file
//! text is run through an environment-variable interpolation pass
//! (`${{ NAME }}` tokens) before structural parsing, and any failure is fatal
//! before the server accepts a single request.

pub mod settings;

pub use settings::{
    KustoSettings, ModelSettings, PromptRole, SeedPrompt, Settings, SettingsError,
};
