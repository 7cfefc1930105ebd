//! pgtrail CLI - Main entry point

use clap::Parser;
use pgtrail_cli::{commands, Cli, Commands, Context};
use pgtrail_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Stdout carries generated SQL, so logs always go to stderr
    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        })
        .output(LogOutput::Stderr)
        .log_file_prefix("pgtrail-cli")
        .build();

    let log_config = log_config.merge_env().unwrap_or_else(|e| {
        eprintln!("Warning: ignoring logging environment: {}", e);
        LogConfig::builder().output(LogOutput::Stderr).build()
    });

    // The CLI works without logging
    let _guard = init_logging(&log_config).ok();

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn execute_command(cli: &Cli) -> pgtrail_cli::Result<()> {
    let ctx = Context::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Status => commands::status::run(&ctx).await,

        Commands::Install { entity, run } => {
            commands::install::install(&ctx, entity.as_deref(), *run).await
        },

        Commands::Remove { entity, run } => {
            commands::install::remove(&ctx, entity.as_deref(), *run).await
        },

        Commands::Migration { entity, dir } => commands::migration::run(&ctx, entity, dir).await,

        Commands::Sql { entity, down } => commands::sql::run(&ctx, entity, *down).await,

        Commands::Track {
            entity,
            enable,
            disable,
            status,
        } => {
            if *status {
                commands::track::status(&ctx, entity).await
            } else {
                commands::track::run(&ctx, entity, Commands::track_target(*enable, *disable)).await
            }
        },

        Commands::History {
            entity,
            key,
            page,
            per_page,
            json,
        } => {
            commands::history::run(&ctx, entity, key.as_deref(), *page, *per_page, *json).await
        },
    }
}
