//! Configuration types for the metering exporter.
//!
//! - `ClientConfig` / `DatabaseEnvironment`: how to run `psql`
//! - `ExportConfig`: paging and output location
//! - `AnonymizationSettings`: salt and schema version
//! - `AdminConfig`: admin API address and credentials
//!
//! # Security
//! Passwords are stored in `Zeroizing` containers and excluded from
//! `Debug`/`Display` output.

mod admin;
mod database;
mod export;

pub use admin::AdminConfig;
pub use database::{ClientConfig, DatabaseEnvironment};
pub use export::{
    AnonymizationSettings, DEFAULT_HASH_SALT, DEFAULT_OUTPUT_STEM, ExportConfig,
    USAGE_METRICS_SCHEMA_VERSION,
};
