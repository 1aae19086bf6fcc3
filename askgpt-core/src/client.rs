use crate::{
    ClientError, Config, WeatherQuery,
    client::{openai::OpenAiChatClient, openweather::OpenWeatherClient},
};
use async_trait::async_trait;
use reqwest::Client;
use std::{convert::TryFrom, fmt::Debug};

pub mod openai;
pub mod openweather;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceId {
    OpenAi,
    OpenWeather,
}

impl ServiceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceId::OpenAi => "openai",
            ServiceId::OpenWeather => "openweather",
        }
    }

    /// Environment variable that overrides the configured API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ServiceId::OpenAi => "OPENAI_API_KEY",
            ServiceId::OpenWeather => "OPENWEATHER_API_KEY",
        }
    }

    pub const fn all() -> &'static [ServiceId] {
        &[ServiceId::OpenAi, ServiceId::OpenWeather]
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ServiceId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openai" => Ok(ServiceId::OpenAi),
            "openweather" => Ok(ServiceId::OpenWeather),
            _ => Err(anyhow::anyhow!(
                "Unknown service '{value}'. Supported services: openai, openweather."
            )),
        }
    }
}

/// Something that can answer a single chat message.
#[async_trait]
pub trait ChatProvider: Send + Sync + Debug {
    async fn complete(&self, content: &str) -> Result<String, ClientError>;
}

/// Something that can name the current weather condition at a location.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    async fn current_condition(&self, query: &WeatherQuery) -> Result<String, ClientError>;
}

fn api_key_for(id: ServiceId, config: &Config) -> anyhow::Result<String> {
    config
        .service_api_key(id)
        .filter(|key| !key.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No API key configured for service '{id}'.\n\
                 Hint: run `askgpt configure {id}` or set {}.",
                id.api_key_env()
            )
        })
}

fn base_url_for(id: ServiceId, config: &Config) -> Option<String> {
    config.service_config(id).and_then(|svc| svc.base_url.clone())
}

/// Construct the chat client from config, reusing `http` as transport.
pub fn chat_client_from_config(config: &Config, http: Client) -> anyhow::Result<OpenAiChatClient> {
    let api_key = api_key_for(ServiceId::OpenAi, config)?;

    let mut client = OpenAiChatClient::with_http(api_key, http)
        .model(config.chat.model.clone())
        .temperature(config.chat.temperature);
    if let Some(url) = base_url_for(ServiceId::OpenAi, config) {
        client = client.base_url(url);
    }

    Ok(client)
}

/// Construct the weather client from config, reusing `http` as transport.
pub fn weather_client_from_config(
    config: &Config,
    http: Client,
) -> anyhow::Result<OpenWeatherClient> {
    let api_key = api_key_for(ServiceId::OpenWeather, config)?;

    let mut client = OpenWeatherClient::with_http(api_key, http);
    if let Some(url) = base_url_for(ServiceId::OpenWeather, config) {
        client = client.base_url(url);
    }

    Ok(client)
}

/// Cut a response body down to something that fits in a log line.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
