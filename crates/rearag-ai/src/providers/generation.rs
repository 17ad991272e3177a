//! Text-generation endpoint client

use async_trait::async_trait;
use std::time::Duration;

use super::Generator;
use crate::{
    error::{Error, Result},
    types::{GenerationParams, GenerationRequest, GenerationResponse},
};

/// Default request timeout for generation calls
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(360);

/// Client for a `{inputs, parameters}` → `{outputs: [..]}` generation server
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    url: String,
}

impl HttpGenerator {
    /// Create a client with an explicit request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(Error::InvalidConfig("generation endpoint URL is empty".into()));
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
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let request = GenerationRequest {
            inputs: prompt.to_string(),
            stream: false,
            parameters: params.clone(),
        };

        let response = self.client.post(&self.url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(url = %self.url, status = status.as_u16(), "generation request failed");
            return Err(Error::Status {
                endpoint: "generation",
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let parsed: GenerationResponse = serde_json::from_str(&body)
            .map_err(|e| Error::protocol(format!("invalid generation response: {e}")))?;
        parsed.into_text()
    }
}
