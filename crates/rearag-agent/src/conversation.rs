//! Conversation state for one agent run
//!
//! Three pieces of state move together: the message chain sent to the model,
//! the reasoning chain of executed steps, and the summary chain of
//! (query, observation) pairs. A [`Snapshot`] taken before an iteration lets
//! a failed iteration roll all three back at once.

use serde::{Deserialize, Serialize};

use rearag_ai::{Message, Role};

use crate::action::Action;
use crate::error::{Error, Result};

/// One executed step of the reasoning chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub step: u32,
    pub thought: String,
    pub action: Action,
    /// Search observation or final answer; `None` for reflect steps
    pub observation: Option<String>,
}

/// A search query and what it found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub query: String,
    pub observation: String,
}

/// Rollback point for [`ConversationState`]
///
/// Records chain lengths plus a copy of the last message, which is the only
/// message an iteration edits in place.
#[derive(Debug, Clone)]
pub struct Snapshot {
    messages_len: usize,
    last_message: Option<Message>,
    reasoning_len: usize,
    summary_len: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    messages: Vec<Message>,
    reasoning: Vec<ReasoningStep>,
    summary: Vec<SummaryEntry>,
}

impl ConversationState {
    /// Start a run: system prompt, the question, and an empty assistant slot
    pub fn new(system_prompt: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            messages: vec![
                Message::system(system_prompt),
                Message::user(question),
                Message::assistant_empty(),
            ],
            reasoning: Vec::new(),
            summary: Vec::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn reasoning_chain(&self) -> &[ReasoningStep] {
        &self.reasoning
    }

    pub fn summary_chain(&self) -> &[SummaryEntry] {
        &self.summary
    }

    /// The user question this run answers
    pub fn question(&self) -> &str {
        &self.messages[1].content
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            messages_len: self.messages.len(),
            last_message: self.messages.last().cloned(),
            reasoning_len: self.reasoning.len(),
            summary_len: self.summary.len(),
        }
    }

    /// Roll back every change made since `snapshot` was taken
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.messages.truncate(snapshot.messages_len);
        if let (Some(saved), Some(last)) = (snapshot.last_message, self.messages.last_mut()) {
            *last = saved;
        }
        self.reasoning.truncate(snapshot.reasoning_len);
        self.summary.truncate(snapshot.summary_len);
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(Message::assistant(text));
    }

    pub fn append_observation(&mut self, text: impl Into<String>) {
        self.messages.push(Message::observation(text));
    }

    /// Overwrite the trailing assistant turn
    pub fn replace_last_assistant(&mut self, text: impl Into<String>) -> Result<()> {
        let past_question = self.messages.len() > 2;
        match self.messages.last_mut() {
            Some(last) if past_question && last.role == Role::Assistant => {
                last.content = text.into();
                Ok(())
            }
            _ => Err(Error::State(
                "conversation does not end with an assistant turn".into(),
            )),
        }
    }

    /// Append to the reasoning chain, returning the step number assigned
    pub fn append_reasoning_step(
        &mut self,
        thought: impl Into<String>,
        action: Action,
        observation: Option<String>,
    ) -> u32 {
        let step = self.reasoning.len() as u32 + 1;
        self.reasoning.push(ReasoningStep {
            step,
            thought: thought.into(),
            action,
            observation,
        });
        step
    }

    pub fn append_summary(&mut self, query: impl Into<String>, observation: impl Into<String>) {
        self.summary.push(SummaryEntry {
            query: query.into(),
            observation: observation.into(),
        });
    }

    /// Record a completed search.
    ///
    /// The generation that produced the action replaces the trailing
    /// assistant slot, the observation follows it, and a fresh slot opens
    /// for the next generation. The precondition is checked before anything
    /// is touched, so a failure leaves the state unchanged.
    pub fn record_search(
        &mut self,
        response: &str,
        thought: &str,
        action: Action,
        query: &str,
        observation: &str,
    ) -> Result<u32> {
        self.replace_last_assistant(response)?;
        self.append_observation(observation);
        self.messages.push(Message::assistant_empty());
        self.append_summary(query, observation);
        Ok(self.append_reasoning_step(thought, action, Some(observation.to_string())))
    }

    /// Summary chain rendered as extra answer context, one entry per search
    pub fn summary_context(&self) -> Vec<String> {
        self.summary
            .iter()
            .map(|e| format!("{}\n{}", e.query, e.observation))
            .collect()
    }
}
