//! EML Common Library
//!
//! Shared error types, logging setup and SQL helpers for the EML workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`EmlError`] and the [`Result`] alias
//! - **Logging**: centralized `tracing` subscriber setup ([`logging`])
//! - **SQL**: identifier validation for table names that end up interpolated
//!   into statements ([`sql`])
//!
//! # Example
//!
//! ```no_run
//! use eml_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("Worker starting");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod sql;

pub use error::{EmlError, Result};
