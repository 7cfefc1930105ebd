//! pgtrail CLI Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Installer and administration commands for the pgtrail audit trail.
//!
//! # Overview
//!
//! - **Status**: report every expected audit object and whether it exists (`pgtrail status`)
//! - **Install / Remove**: print or run the plan for a tracked table (`pgtrail install post --run`)
//! - **Migrations**: write up/down SQL files instead of touching the database (`pgtrail migration`)
//! - **Scripts**: print the full DDL for a table without a database (`pgtrail sql`)
//! - **Tracking**: pause and resume capture on a table (`pgtrail track`)
//! - **History**: browse units of work from the terminal (`pgtrail history`)
//!
//! Generated SQL goes to stdout; logs go to stderr.

pub mod commands;
pub mod context;
pub mod error;

pub use context::Context;
pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// pgtrail - trigger-based audit trail for PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "pgtrail")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./pgtrail.toml when present)
    #[arg(short, long, env = "PGTRAIL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show which audit objects are installed
    Status,

    /// Install audit objects for a tracked table (shared objects only without an entity)
    Install {
        /// Entity or table name
        entity: Option<String>,

        /// Execute the plan instead of printing it
        #[arg(long)]
        run: bool,
    },

    /// Remove audit objects of a tracked table (shared objects only without an entity)
    Remove {
        /// Entity or table name
        entity: Option<String>,

        /// Execute the plan instead of printing it
        #[arg(long)]
        run: bool,
    },

    /// Write an up/down SQL migration installing a tracked table
    Migration {
        /// Entity or table name
        entity: String,

        /// Directory receiving the migration files
        #[arg(short, long, default_value = "migrations")]
        dir: PathBuf,
    },

    /// Print the complete install script of a table without consulting the database
    Sql {
        /// Entity or table name
        entity: String,

        /// Print the removal script instead
        #[arg(long)]
        down: bool,
    },

    /// Enable, disable or flip capture on a tracked table
    Track {
        /// Entity or table name
        entity: String,

        /// Enable capture
        #[arg(long, conflicts_with_all = ["disable", "status"])]
        enable: bool,

        /// Disable capture
        #[arg(long, conflicts_with = "status")]
        disable: bool,

        /// Only show whether capture is enabled
        #[arg(long)]
        status: bool,
    },

    /// Show the change history of a tracked entity
    History {
        /// Entity or table name
        entity: String,

        /// Primary key of one row, as JSON (`7`, `{"id": 7}`) or plain text
        #[arg(short, long)]
        key: Option<String>,

        /// Page number
        #[arg(long, default_value = "1")]
        page: i64,

        /// Units per page
        #[arg(long, default_value = "20")]
        per_page: i64,

        /// Print the page as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    /// `Some(true)` for `--enable`, `Some(false)` for `--disable`, `None` to flip.
    pub fn track_target(enable: bool, disable: bool) -> Option<bool> {
        match (enable, disable) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_install() {
        let cli = Cli::try_parse_from(["pgtrail", "install", "post", "--run"]).unwrap();
        match cli.command {
            Commands::Install { entity, run } => {
                assert_eq!(entity.as_deref(), Some("post"));
                assert!(run);
            },
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_track_flags_conflict() {
        assert!(Cli::try_parse_from(["pgtrail", "track", "post", "--enable", "--disable"]).is_err());
        assert_eq!(Commands::track_target(true, false), Some(true));
        assert_eq!(Commands::track_target(false, true), Some(false));
        assert_eq!(Commands::track_target(false, false), None);
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["pgtrail", "sql", "post", "--config", "audit.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("audit.toml")));
    }
}
