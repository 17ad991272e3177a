//! Core types for generation and retrieval calls

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message roles
///
/// Unknown role strings are kept as [`Role::Other`] so persisted traces with
/// unexpected roles can still be loaded and reported on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    System,
    User,
    Assistant,
    Observation,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Observation => "observation",
            Role::Other(s) => s,
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "observation" => Role::Observation,
            _ => Role::Other(value),
        }
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        match value {
            Role::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Turn text. Older trace files store assistant turns under `reasoning`.
    #[serde(alias = "reasoning")]
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Create an empty assistant message (the slot the next generation fills)
    pub fn assistant_empty() -> Self {
        Self::new(Role::Assistant, String::new())
    }

    /// Create an observation message
    pub fn observation(text: impl Into<String>) -> Self {
        Self::new(Role::Observation, text)
    }

    /// Whether this is an assistant turn with no content yet
    pub fn is_placeholder(&self) -> bool {
        self.role == Role::Assistant && self.content.is_empty()
    }
}

/// Sampling parameters sent with every generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
    pub stop: Option<Vec<String>>,
    pub skip_special_tokens: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            top_p: 0.7,
            temperature: 0.95,
            stop: None,
            skip_special_tokens: false,
        }
    }
}

impl GenerationParams {
    /// Replace the stop sequences
    pub fn with_stop<I, S>(mut self, stop: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop = Some(stop.into_iter().map(Into::into).collect());
        self
    }
}

/// Body of a generation endpoint request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub inputs: String,
    pub stream: bool,
    pub parameters: GenerationParams,
}

/// One element of a generation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOutput {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub stop_reason: Option<serde_json::Value>,
    pub generated_text: String,
}

/// Body of a generation endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub outputs: Vec<GenerationOutput>,
}

impl GenerationResponse {
    /// Take the single generated text, rejecting any other output count
    pub fn into_text(self) -> crate::Result<String> {
        let count = self.outputs.len();
        let mut outputs = self.outputs.into_iter();
        match (outputs.next(), count) {
            (Some(output), 1) => Ok(output.generated_text),
            _ => Err(crate::Error::protocol(format!(
                "expected exactly one generation output, got {count}"
            ))),
        }
    }
}

/// Body of a retrieval endpoint request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub query: String,
    pub top_n: usize,
    pub return_score: bool,
}

/// A retrieved document. Fields other than `contents` are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub contents: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    pub fn new(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            extra: serde_json::Map::new(),
        }
    }
}
