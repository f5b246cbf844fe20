//! Core pipeline for exporting anonymized end-user usage metrics.
//!
//! The pipeline probes the application schema through the `psql` client,
//! builds a paged usage query, parses the client's pipe-delimited output,
//! anonymizes every row and writes one JSON artifact.
//!
//! # Security Guarantees
//! - Exported records never contain a raw user name or email address
//! - Database and admin credentials are zeroized and never logged
//! - Query output is never logged, only its size
//! - All database access is read-only
//!
//! # Architecture
//! Data flows one way: `SchemaProber` → query builder → `QueryExecutor`
//! → tabular parser → `Anonymizer` → output. `UsageExporter` drives a run;
//! the executor and admin client are traits so runs can be scripted.

pub mod admin;
pub mod anonymize;
pub mod config;
pub mod error;
pub mod executor;
pub mod exporter;
pub mod logging;
pub mod models;
pub mod output;
pub mod prober;
pub mod query;
pub mod tabular;

// Re-export commonly used types
pub use admin::{AdminClient, AdminError, HttpAdminClient};
pub use anonymize::{Anonymizer, RecordMetadata};
pub use config::{
    AdminConfig, AnonymizationSettings, ClientConfig, DatabaseEnvironment, ExportConfig,
};
pub use error::{MeteringError, Result};
pub use executor::{PsqlExecutor, QueryExecutor};
pub use exporter::{Collection, ExportSummary, UsageExporter};
pub use logging::init_logging;
pub use models::{ColumnMap, LastLogin, Row, UsageRecord};
pub use prober::{SchemaProber, SpecializationTables};
pub use query::{Identifier, SelectQuery, build_usage_query};
