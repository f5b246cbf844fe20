//! Export and anonymization settings.

use std::path::{Path, PathBuf};

use crate::error::MeteringError;

/// Version of the record layout written into every exported record.
pub const USAGE_METRICS_SCHEMA_VERSION: &str = "1.1";

/// Default output file-name stem.
pub const DEFAULT_OUTPUT_STEM: &str = "usage_metrics";

/// Salt mixed into every hashed field. Identical across runs and
/// deployments of one release so digests stay comparable.
pub const DEFAULT_HASH_SALT: [u8; 32] = [
    53, 14, 215, 17, 147, 90, 22, 81, 48, 249, 140, 146, 201, 247, 182, 18, 218, 242, 114, 5, 255,
    202, 227, 242, 126, 235, 162, 38, 52, 150, 95, 193,
];

/// Paging and output settings for one export run.
///
/// # Example
/// ```rust
/// use usagemeter_core::config::ExportConfig;
///
/// let config = ExportConfig::new().with_page_size(500).with_output_stem("metrics");
/// assert_eq!(config.page_size, 500);
/// assert_eq!(
///     config.output_path(1_700_000_000).file_name().unwrap(),
///     "metrics_1700000000.json"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Rows per page; 0 fetches every row in one page
    pub page_size: u64,
    /// Directory the artifact is written to
    pub output_dir: PathBuf,
    /// File-name stem; the run timestamp and `.json` are appended
    pub output_stem: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            page_size: 0,
            output_dir: PathBuf::from("."),
            output_stem: DEFAULT_OUTPUT_STEM.to_string(),
        }
    }
}

impl ExportConfig {
    /// Creates an export config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the page size.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Builder method to set the output directory.
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    /// Builder method to set the output file-name stem.
    pub fn with_output_stem(mut self, stem: impl Into<String>) -> Self {
        self.output_stem = stem.into();
        self
    }

    /// Path of the artifact for a run started at `unix_seconds`.
    pub fn output_path(&self, unix_seconds: i64) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.json", self.output_stem, unix_seconds))
    }

    /// Validates the export configuration.
    ///
    /// # Errors
    /// Returns error if the stem is empty or contains path separators
    pub fn validate(&self) -> crate::Result<()> {
        if self.output_stem.trim().is_empty() {
            return Err(MeteringError::configuration(
                "output file name stem cannot be empty",
            ));
        }
        if Path::new(&self.output_stem).components().count() != 1 {
            return Err(MeteringError::configuration(
                "output file name stem must not contain path separators",
            ));
        }
        Ok(())
    }
}

/// Values the anonymization pipeline stamps into or mixes into records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonymizationSettings {
    /// Salt fed to the digest before each hashed value
    pub salt: [u8; 32],
    /// Layout version written as `schema_version`
    pub schema_version: String,
}

impl Default for AnonymizationSettings {
    fn default() -> Self {
        Self {
            salt: DEFAULT_HASH_SALT,
            schema_version: USAGE_METRICS_SCHEMA_VERSION.to_string(),
        }
    }
}

impl AnonymizationSettings {
    /// Builder method to replace the salt.
    pub fn with_salt(mut self, salt: [u8; 32]) -> Self {
        self.salt = salt;
        self
    }

    /// Builder method to replace the schema version.
    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = version.into();
        self
    }
}
