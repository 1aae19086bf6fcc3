use anyhow::Context;
use askgpt_core::{Config, DispatchError, ServiceId, WeatherQuery, orchestrator_from_config};
use clap::{Parser, Subcommand};
use inquire::Password;
use std::{
    io::{self, Write},
    process::ExitCode,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "askgpt", version, about = "Ask a question, get the weather")]
pub struct Cli {
    /// Log requests and responses to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ask a question. The answer is the current weather at the configured location.
    Ask { question: String },

    /// Send a message to the chat-completion API and print the reply.
    Chat { message: String },

    /// Show the current weather condition, optionally for explicit coordinates.
    Weather {
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<String>,

        #[arg(long, allow_hyphen_values = true)]
        lon: Option<String>,
    },

    /// Configure the API key for a service ("openai" or "openweather").
    Configure { service: String },

    /// Store the default location used by `ask` and `weather`.
    Location {
        #[arg(allow_hyphen_values = true)]
        latitude: String,

        #[arg(allow_hyphen_values = true)]
        longitude: String,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<ExitCode> {
        let result = match self.command {
            Command::Ask { question } => {
                let orchestrator = orchestrator_from_config(&Config::load_with_env()?)?;
                orchestrator.ask(&question).await
            }
            Command::Chat { message } => {
                let orchestrator = orchestrator_from_config(&Config::load_with_env()?)?;
                orchestrator.chat(&message).await
            }
            Command::Weather { lat, lon } => {
                let orchestrator = orchestrator_from_config(&Config::load_with_env()?)?;
                let query = resolve_query(orchestrator.location(), lat, lon);
                orchestrator.weather_at(query).await
            }
            Command::Configure { service } => {
                configure(&service)?;
                return Ok(ExitCode::SUCCESS);
            }
            Command::Location {
                latitude,
                longitude,
            } => {
                let mut cfg = Config::load()?;
                cfg.set_location(WeatherQuery::new(latitude, longitude));
                cfg.save()?;
                println!(
                    "Default location set to {}, {}",
                    cfg.location.latitude, cfg.location.longitude
                );
                return Ok(ExitCode::SUCCESS);
            }
        };

        let code = present(result, &mut io::stdout().lock(), &mut io::stderr().lock())
            .context("Failed to write output")?;
        Ok(code)
    }
}

/// Install the stderr log subscriber. `RUST_LOG` wins over `--verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,askgpt=debug,askgpt_core=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn resolve_query(default: &WeatherQuery, lat: Option<String>, lon: Option<String>) -> WeatherQuery {
    WeatherQuery::new(
        lat.unwrap_or_else(|| default.latitude.clone()),
        lon.unwrap_or_else(|| default.longitude.clone()),
    )
}

/// Print the answer to `out`, or `error: <TITLE>` to `err_out`. The full
/// diagnostic only goes to the log.
fn present<O: Write, E: Write>(
    result: Result<String, DispatchError>,
    out: &mut O,
    err_out: &mut E,
) -> io::Result<ExitCode> {
    match result {
        Ok(answer) => {
            writeln!(out, "{answer}")?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            let title = err.title();
            error!(error = %err, title, "request failed");
            writeln!(err_out, "error: {title}")?;
            Ok(ExitCode::FAILURE)
        }
    }
}

fn configure(service: &str) -> anyhow::Result<()> {
    let id = ServiceId::try_from(service)?;

    // Keys from the environment are not written back to disk.
    let mut cfg = Config::load()?;

    let api_key = Password::new(&format!("API key for {id}:"))
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;
    let api_key = api_key.trim().to_string();
    if api_key.is_empty() {
        anyhow::bail!("API key for '{id}' must not be empty");
    }

    cfg.upsert_service_api_key(id, api_key);
    cfg.save()?;

    let path = Config::config_file_path()?;
    info!(service = %id, path = %path.display(), "api key saved");
    println!("Saved API key for {id} to {}", path.display());

    Ok(())
}
