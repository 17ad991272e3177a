//! Retrieval endpoint client

use async_trait::async_trait;
use std::time::Duration;

use super::Retriever;
use crate::{
    error::{Error, Result},
    types::{Document, RetrievalRequest},
};

/// Default request timeout for retrieval calls
pub const DEFAULT_RETRIEVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Client for a `{query, top_n, return_score}` → `[{contents, ..}]` retriever
#[derive(Debug, Clone)]
pub struct HttpRetriever {
    client: reqwest::Client,
    url: String,
}

impl HttpRetriever {
    /// Create a client with an explicit request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(Error::InvalidConfig("retriever endpoint URL is empty".into()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    /// Endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn search(&self, query: &str, top_n: usize) -> Result<Vec<Document>> {
        let request = RetrievalRequest {
            query: query.to_string(),
            top_n,
            return_score: false,
        };

        let response = self.client.post(&self.url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(url = %self.url, status = status.as_u16(), "retrieval request failed");
            return Err(Error::Status {
                endpoint: "retriever",
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| Error::protocol(format!("invalid retrieval response: {e}")))
    }
}
