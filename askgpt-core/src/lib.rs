//! Core library for the `askgpt` CLI.
//!
//! This crate defines:
//! - Typed clients for the OpenWeather and OpenAI chat-completion APIs
//! - The shared [`ClientError`] taxonomy every client reports failures with
//! - Configuration & credentials handling
//! - An [`Orchestrator`] that picks a client and drops superseded requests

pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;

pub use client::{ChatProvider, ServiceId, WeatherProvider};
pub use client::{openai::OpenAiChatClient, openweather::OpenWeatherClient};
pub use config::{ChatSettings, Config, ServiceConfig};
pub use error::{ClientError, ClientErrorKind, InvalidReason};
pub use model::{ChatRequest, ChatResponse, WeatherQuery, WeatherResponse};
pub use orchestrator::{DispatchError, Orchestrator, RequestKind, orchestrator_from_config};
