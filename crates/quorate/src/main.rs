// Copyright 2024 The Quorate Authors
// SPDX-License-Identifier: Apache-2.0

//! Quorate: precondition checks and complete-outage recovery for replicated
//! database clusters.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use quorate_core::{Config, LogFormat};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            let code = e.downcast_ref::<quorate_core::Error>().map_or(1, |e| e.code().exit_code());
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let Cli { global, command } = cli;

    if let Commands::Version = command {
        println!("quorate {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if let Commands::Authorize(args) = command {
        return commands::authorize_command(args, global.output);
    }

    let mut config = load_config(&global.config)?;
    if let Some(path) = &global.metadata {
        config.metadata.path = path.clone();
    }
    init_logging(&config)?;

    match command {
        Commands::List => {
            let store = commands::open_store(&config)?;
            commands::list(store.as_ref(), global.output).await
        }
        command => {
            let runtime = commands::Runtime::open(&global, &config).await?;
            runtime.run(command).await
        }
    }
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    Config::load(path.as_deref()).context("Failed to load configuration")
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    // Reports go to stdout.
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry().with(filter).with(fmt_layer.json()).init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
    }

    Ok(())
}
