//! rearag-agent: the iterative reasoning agent
//!
//! An [`Agent`] answers a question by alternating Thought and Action steps.
//! A `search` action queries the knowledge source through a [`RagClient`] and
//! feeds the answer back as an observation; a `finish` action ends the run.
//! Every iteration commits atomically or rolls back to its snapshot.

pub mod action;
pub mod agent;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod parse;
pub mod rag;
pub mod truncate;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use action::{Action, ActionCall, ActionKind};
pub use agent::{Agent, AgentConfig, LoopState, RunOutcome, StepStatus, StopReason};
pub use conversation::{ConversationState, ReasoningStep, Snapshot, SummaryEntry};
pub use dispatch::{ActionDispatcher, Dispatched, FinishMode};
pub use error::{Error, Result};
pub use events::AgentEvent;
pub use rag::{RagClient, RagConfig};
pub use truncate::TruncationConfig;
