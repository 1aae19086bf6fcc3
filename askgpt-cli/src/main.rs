//! Binary crate for the `askgpt` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Interactive configuration
//! - Presenting answers and error titles

use clap::Parser;
use std::process::ExitCode;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // A missing .env file is the normal case.
    let _ = dotenvy::dotenv();

    let cmd = cli::Cli::parse();
    cli::init_tracing(cmd.verbose);
    cmd.run().await
}
