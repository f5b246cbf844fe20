//! Orchestration of one export run.
//!
//! A run counts users, discovers email columns, pages through the usage
//! query, anonymizes each surviving row and finally writes the record
//! array. Pages are processed strictly one after another.

use chrono::{Local, Utc};
use std::path::PathBuf;

use crate::admin::{AdminClient, escalate};
use crate::anonymize::{Anonymizer, RecordMetadata};
use crate::config::ExportConfig;
use crate::error::MeteringError;
use crate::executor::QueryExecutor;
use crate::models::{ColumnMap, UsageRecord};
use crate::output::write_records;
use crate::prober::SchemaProber;
use crate::query::{USAGE_FIELD_COUNT, build_usage_query, user_count_query};
use crate::tabular::{parse_rows, parse_scalar};

/// Format of the `created_at` export timestamp.
///
/// `%.6f` always prints six fractional digits, so a whole second renders
/// as `.000000` instead of dropping the fraction.
pub const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Outcome of a completed export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    /// Where the artifact was written
    pub path: PathBuf,
    /// Number of records written
    pub records: usize,
    /// Number of page queries issued
    pub pages: u64,
}

/// Records gathered by a run, before they are written.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    /// Records in arrival order
    pub records: Vec<UsageRecord>,
    /// Number of page queries issued
    pub pages: u64,
}

/// Rows per page for a run: a configured size of 0 means one page
/// covering every user.
pub fn effective_page_size(configured: u64, user_count: u64) -> u64 {
    if configured == 0 { user_count } else { configured }
}

/// Drives one export run over an executor and an admin client.
pub struct UsageExporter<'a> {
    executor: &'a dyn QueryExecutor,
    admin: &'a dyn AdminClient,
    config: &'a ExportConfig,
    anonymizer: &'a Anonymizer,
}

impl<'a> UsageExporter<'a> {
    /// Creates an exporter after validating the export configuration.
    ///
    /// # Errors
    /// Returns a configuration error for an invalid `ExportConfig`.
    pub fn new(
        executor: &'a dyn QueryExecutor,
        admin: &'a dyn AdminClient,
        config: &'a ExportConfig,
        anonymizer: &'a Anonymizer,
    ) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            executor,
            admin,
            config,
            anonymizer,
        })
    }

    /// Total number of users.
    ///
    /// # Errors
    /// Propagates executor failures; returns `UnexpectedOutput` if the
    /// count is missing or not a number.
    pub async fn user_count(&self) -> crate::Result<u64> {
        let output = self.executor.run(&user_count_query().to_string()).await?;
        let value = parse_scalar(&output)?;
        value.parse::<u64>().map_err(|e| {
            MeteringError::unexpected_output(format!("user count '{}' is not a number: {}", value, e))
        })
    }

    /// Server identifier for one record.
    async fn server_id(&self) -> crate::Result<String> {
        self.admin.license_id().await.map_err(escalate)
    }

    /// Fetches, parses and anonymizes one page.
    async fn process_page(
        &self,
        columns: &ColumnMap,
        offset: u64,
        records: &mut Vec<UsageRecord>,
    ) -> crate::Result<()> {
        let query = build_usage_query(columns, self.config.page_size, offset)?;
        let output = self.executor.run(&query.to_string()).await?;

        for row in parse_rows(&output, USAGE_FIELD_COUNT) {
            let metadata = RecordMetadata {
                created_at: Local::now().format(CREATED_AT_FORMAT).to_string(),
                server_id: self.server_id().await?,
            };
            records.push(self.anonymizer.anonymize(&row, &metadata)?);
        }
        Ok(())
    }

    /// Runs the paged collection and returns the records.
    ///
    /// A user count of zero yields no records and issues no page query.
    ///
    /// # Errors
    /// Any failing query, timestamp conversion or admin lookup aborts the
    /// run. An unreachable admin API is `ApplicationNotRunning`.
    pub async fn collect_records(&self) -> crate::Result<Collection> {
        let count = self.user_count().await?;
        tracing::info!("Found {} users", count);
        if count == 0 {
            return Ok(Collection::default());
        }

        let columns = SchemaProber::new(self.executor)
            .discover_email_columns()
            .await?;
        if columns.is_empty() {
            tracing::warn!(
                "No email column discovered; usage rows will not match the expected {} fields",
                USAGE_FIELD_COUNT
            );
        }

        let page_size = effective_page_size(self.config.page_size, count);
        let mut collection = Collection::default();
        let mut offset = 0_u64;
        while offset < count {
            let end = offset.saturating_add(page_size).min(count);
            tracing::info!(
                "Processing {} to {} of {} records",
                offset.saturating_add(1),
                end,
                count
            );
            self.process_page(&columns, offset, &mut collection.records)
                .await?;
            collection.pages = collection.pages.saturating_add(1);
            offset = end;
        }

        tracing::debug!(
            "Collected {} records in {} pages",
            collection.records.len(),
            collection.pages
        );
        Ok(collection)
    }

    /// Runs the collection and writes the artifact.
    ///
    /// # Errors
    /// See [`UsageExporter::collect_records`]; also returns output errors.
    /// Nothing is written when collection fails.
    pub async fn export(&self) -> crate::Result<ExportSummary> {
        let collection = self.collect_records().await?;
        let path = self.config.output_path(Utc::now().timestamp());
        write_records(&collection.records, &path).await?;

        tracing::info!(
            "Exported {} records to {}",
            collection.records.len(),
            path.display()
        );
        Ok(ExportSummary {
            path,
            records: collection.records.len(),
            pages: collection.pages,
        })
    }
}
