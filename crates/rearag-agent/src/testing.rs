//! Scripted endpoints for tests
//!
//! Both mocks serve queued replies first and then fall back to a responder
//! function, if one is set. Every call is recorded.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use rearag_ai::{Document, GenerationParams, Generator, Retriever};

type GenerateFn = Box<dyn Fn(&str) -> rearag_ai::Result<String> + Send + Sync>;
type SearchFn = Box<dyn Fn(&str) -> rearag_ai::Result<Vec<Document>> + Send + Sync>;

/// Generator returning scripted texts
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<rearag_ai::Result<String>>>,
    fallback: Option<GenerateFn>,
    calls: Mutex<Vec<(String, GenerationParams)>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn with_results(replies: impl IntoIterator<Item = rearag_ai::Result<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with `f(prompt)`
    pub fn from_fn(f: impl Fn(&str) -> rearag_ai::Result<String> + Send + Sync + 'static) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(Box::new(f)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn params(&self) -> Vec<GenerationParams> {
        self.calls.lock().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> rearag_ai::Result<String> {
        self.calls.lock().push((prompt.to_string(), params.clone()));
        let next = self.replies.lock().pop_front();
        match (next, &self.fallback) {
            (Some(reply), _) => reply,
            (None, Some(f)) => f(prompt),
            (None, None) => Err(rearag_ai::Error::protocol("generator script exhausted")),
        }
    }
}

/// Retriever returning scripted documents
pub struct ScriptedRetriever {
    replies: Mutex<VecDeque<rearag_ai::Result<Vec<Document>>>>,
    fallback: Option<SearchFn>,
    calls: Mutex<Vec<(String, usize)>>,
}

impl ScriptedRetriever {
    pub fn new<I, D, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(
            replies
                .into_iter()
                .map(|docs| Ok(docs.into_iter().map(|c| Document::new(c)).collect())),
        )
    }

    pub fn with_results(
        replies: impl IntoIterator<Item = rearag_ai::Result<Vec<Document>>>,
    ) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer every search with the same documents
    pub fn always<I, S>(contents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let docs: Vec<Document> = contents.into_iter().map(|c| Document::new(c)).collect();
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(Box::new(move |_: &str| -> rearag_ai::Result<Vec<Document>> {
                Ok(docs.clone())
            })),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queries and top-n values received, in call order
    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Retriever for ScriptedRetriever {
    async fn search(&self, query: &str, top_n: usize) -> rearag_ai::Result<Vec<Document>> {
        self.calls.lock().push((query.to_string(), top_n));
        let next = self.replies.lock().pop_front();
        match (next, &self.fallback) {
            (Some(reply), _) => reply,
            (None, Some(f)) => f(query),
            (None, None) => Err(rearag_ai::Error::protocol("retriever script exhausted")),
        }
    }
}
