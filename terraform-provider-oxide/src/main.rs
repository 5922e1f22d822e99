//! Terraform Provider for Oxide
//!
//! This provider speaks the Terraform plugin protocol for managing Oxide
//! instances and VPC firewall rules, and looks up VPCs and subnets.

mod client;
mod config;
mod data_sources;
mod diff;
mod functions;
mod plan;
mod provider;
mod resources;
mod schema;
#[cfg(test)]
mod testing;
mod timeouts;
mod validation;
mod wait;

use anyhow::Context;
use clap::Parser;
use provider::OxideProvider;
use std::io::{self, BufRead, Write};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Terraform Provider for Oxide
#[derive(Parser, Debug)]
#[command(name = "terraform-provider-oxide")]
#[command(about = "Terraform provider for the Oxide rack", version)]
struct Args {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_directive = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        // stdout carries the protocol
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Terraform Provider for Oxide");

    let provider = OxideProvider::new().context("failed to create Tokio runtime")?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut stdout_lock = stdout.lock();

    for line in stdin.lock().lines() {
        let input = line.context("failed to read request")?;
        if input.trim().is_empty() {
            continue;
        }
        let response = provider.handle_request(&input);
        writeln!(stdout_lock, "{}", response).context("failed to write response")?;
        stdout_lock.flush().context("failed to flush stdout")?;
    }

    tracing::info!("Terraform Provider shutting down");
    Ok(())
}
