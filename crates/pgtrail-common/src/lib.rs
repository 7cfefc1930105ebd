//! pgtrail common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Building blocks shared by the pgtrail server and CLI:
//!
//! - **Identifiers**: validated SQL identifiers and schema-qualified names, the only values ever
//!   interpolated into generated DDL
//! - **Logging**: `tracing` subscriber setup driven by `PGTRAIL_LOG_*` variables
//! - **Errors**: the shared error type

pub mod error;
pub mod ident;
pub mod logging;

pub use error::{CommonError, Result};
pub use ident::{Ident, QualifiedName};
