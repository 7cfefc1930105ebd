//! CLI command implementations
//!
//! Each subcommand has its own module. Commands taking an entity resolve it before connecting,
//! so an unknown name fails without touching the database.

pub mod history;
pub mod install;
pub mod migration;
pub mod sql;
pub mod status;
pub mod track;
