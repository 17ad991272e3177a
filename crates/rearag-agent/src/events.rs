//! Agent event types

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::agent::StopReason;

/// Events emitted during an agent run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A run started for `question`
    RunStart { question: String },

    /// An iteration is about to prompt the model
    IterationStart { iteration: u32, retries: u32 },

    /// The prompt was shrunk to fit the context window
    PromptTruncated {
        tokens_before: u32,
        tokens_after: u32,
        dropped_messages: usize,
    },

    /// An action ran and was recorded as reasoning step `step`
    ActionDispatched {
        step: u32,
        thought: String,
        action: Action,
        observation: Option<String>,
    },

    /// The iteration failed and was rolled back
    Repeat {
        iteration: u32,
        retries: u32,
        reason: String,
    },

    /// The run ended
    RunEnd {
        answer: Option<String>,
        stop_reason: StopReason,
        iterations: u32,
        retries: u32,
    },
}

impl AgentEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::RunEnd { .. })
    }
}
