//! rearag-ai: generation and retrieval endpoint layer
//!
//! This crate provides the wire types and HTTP clients for the text-generation
//! and retrieval services, the chat templates that flatten a conversation into
//! a prompt, and the prompt templates shared by the agent and the data
//! pipeline.

pub mod error;
pub mod prompts;
pub mod providers;
pub mod template;
pub mod types;

pub use error::{Error, Result};
pub use prompts::{PromptSet, PromptTemplate};
pub use providers::{Generator, HttpGenerator, HttpRetriever, Retriever};
pub use template::{ChatMlTemplate, ChatTemplate, Glm4Template, TemplateKind};
pub use types::*;
