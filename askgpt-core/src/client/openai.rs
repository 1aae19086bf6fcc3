use async_trait::async_trait;
use reqwest::{Client, header::CONTENT_TYPE};
use std::fmt;
use tracing::{debug, warn};

use crate::{
    client::truncate_body,
    config::{DEFAULT_CHAT_MODEL, DEFAULT_TEMPERATURE},
    error::{ClientError, InvalidReason},
    model::{ChatRequest, ChatResponse},
};

use super::ChatProvider;

pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Client for the OpenAI chat-completion endpoint.
#[derive(Clone)]
pub struct OpenAiChatClient {
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    http: Client,
}

impl OpenAiChatClient {
    pub fn new(api_key: String) -> Self {
        Self::with_http(api_key, Client::new())
    }

    pub fn with_http(api_key: String, http: Client) -> Self {
        Self {
            api_key,
            base_url: OPENAI_CHAT_URL.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            http,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn build_request(&self, content: &str) -> ChatRequest {
        ChatRequest::user(self.model.as_str(), content, self.temperature)
    }

    /// Send `content` as a single user message and return the first reply.
    pub async fn send(&self, content: &str) -> Result<String, ClientError> {
        let body = self.build_request(content);
        debug!(url = %self.base_url, model = %body.model, "sending chat completion request");

        let res = self
            .http
            .post(&self.base_url)
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                let err = ClientError::network(err);
                warn!(error = %err, "chat completion request failed");
                err
            })?;

        let status = res.status();
        let bytes = res.bytes().await.map_err(|err| {
            let err = ClientError::network(err);
            warn!(error = %err, "failed to read chat completion body");
            err
        })?;
        debug!(%status, len = bytes.len(), "chat completion response received");

        let parsed: ChatResponse = serde_json::from_slice(&bytes).map_err(|err| {
            warn!(
                %status,
                body = %truncate_body(&String::from_utf8_lossy(&bytes)),
                "chat completion body did not decode"
            );
            ClientError::Decode(err)
        })?;

        parsed.into_first_content().ok_or_else(|| {
            warn!("chat completion response had no choices");
            ClientError::InvalidResponse(InvalidReason::NoChoices)
        })
    }
}

impl fmt::Debug for OpenAiChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiChatClient")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatClient {
    async fn complete(&self, content: &str) -> Result<String, ClientError> {
        self.send(content).await
    }
}
