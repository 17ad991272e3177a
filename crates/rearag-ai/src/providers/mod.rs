//! Endpoint clients
//!
//! The agent only ever sees the [`Generator`] and [`Retriever`] traits; the
//! HTTP implementations here speak the text-generation and retrieval wire
//! contracts.

pub mod generation;
pub mod retrieval;

use crate::{Document, GenerationParams, Result};
use async_trait::async_trait;

pub use generation::HttpGenerator;
pub use retrieval::HttpRetriever;

/// Text generation backend: prompt in, generated text out
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a completion for an already-rendered prompt
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;
}

/// Retrieval backend: query in, ranked documents out
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return up to `top_n` documents, best first
    async fn search(&self, query: &str, top_n: usize) -> Result<Vec<Document>>;
}
