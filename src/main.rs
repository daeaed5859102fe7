//! # userop
//!
//! Reconciles declared users, read from a YAML manifest, into a
//! SurrealDB-backed store. Each resource is driven through bounded passes of
//! the reconciler and the observed status is written back to the manifest.
//!
//! Logging honours `RUST_LOG` (default `info`).

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod cli;
mod commands;
mod config;
mod manifest;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    commands::execute_command(cli.command).await
}

/// Initialize tracing subscriber with environment filter.
///
/// Logs go to stderr so command output on stdout stays parseable.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
