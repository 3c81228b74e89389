use reqwest::Client as HttpClient;
use tracing::debug;

use crate::ai_sdk::{ChatRequest, Message, ToolSchema};
use crate::error::AgentError;
use crate::stream::{EventStream, decode_events};

/// Streaming client for an OpenAI-compatible `/v1/chat/completions`
/// endpoint.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    http: HttpClient,
    base_url: String,
    model: String,
}

impl CompletionClient {
    pub fn new(base_url: &str, model: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: normalize_base_url(base_url),
            model: model.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// Sends the transcript and returns the decoded event stream once the
    /// response headers arrive. Dropping the returned future before then
    /// aborts the request.
    pub async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<EventStream<reqwest::Error>, AgentError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            tools,
            stream: true,
        };

        let url = self.endpoint();
        debug!(%url, messages = messages.len(), "sending completion request");
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|source| AgentError::Connection {
                url: self.base_url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Http { status, body });
        }

        Ok(decode_events(response.bytes_stream()))
    }
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}
