use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::fmt;
use tracing::{debug, warn};

use crate::{
    client::truncate_body,
    error::{ClientError, InvalidReason},
    model::{WeatherQuery, WeatherResponse},
};

use super::WeatherProvider;

pub const ONECALL_URL: &str = "https://api.openweathermap.org/data/3.0/onecall";

/// Client for the OpenWeather One Call endpoint.
#[derive(Clone)]
pub struct OpenWeatherClient {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherClient {
    pub fn new(api_key: String) -> Self {
        Self::with_http(api_key, Client::new())
    }

    pub fn with_http(api_key: String, http: Client) -> Self {
        Self {
            api_key,
            base_url: ONECALL_URL.to_string(),
            http,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Current condition label (e.g. "Clouds") at the given coordinates.
    pub async fn fetch(&self, latitude: &str, longitude: &str) -> Result<String, ClientError> {
        debug!(url = %self.base_url, latitude, longitude, "requesting current weather");

        let res = self
            .http
            .get(&self.base_url)
            .query(&[
                ("lat", latitude),
                ("lon", longitude),
                ("appid", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|err| {
                let err = ClientError::network(err);
                warn!(error = %err, "weather request failed");
                err
            })?;

        let status = res.status();
        let body = res.text().await.map_err(|err| {
            let err = ClientError::network(err);
            warn!(error = %err, "failed to read weather response body");
            err
        })?;

        if status != StatusCode::OK {
            warn!(%status, body = %truncate_body(&body), "weather request rejected");
            return Err(ClientError::InvalidResponse(InvalidReason::Status(status.as_u16())));
        }

        let parsed: WeatherResponse = serde_json::from_str(&body).map_err(|err| {
            warn!(error = %err, body = %truncate_body(&body), "weather body did not decode");
            ClientError::Decode(err)
        })?;

        parsed.into_first_condition().ok_or_else(|| {
            warn!("weather response had no condition entries");
            ClientError::InvalidResponse(InvalidReason::NoWeather)
        })
    }
}

impl fmt::Debug for OpenWeatherClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenWeatherClient")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    async fn current_condition(&self, query: &WeatherQuery) -> Result<String, ClientError> {
        self.fetch(&query.latitude, &query.longitude).await
    }
}
