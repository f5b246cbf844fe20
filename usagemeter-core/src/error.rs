//! Error types for the metering export pipeline.
//!
//! Every stage returns these errors explicitly instead of logging and
//! carrying on with missing data, so callers can tell "no rows" apart from
//! "query failed". Database credentials never appear in error messages.

use thiserror::Error;

/// Main error type for usage metering operations.
#[derive(Debug, Error)]
pub enum MeteringError {
    /// Configuration or validation error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The external database client could not be run or reported failure
    #[error("Database client failed: {context}")]
    ExternalProcess {
        context: String,
        exit_code: Option<i32>,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Client output did not have the shape a required value needs
    #[error("Unexpected query output: {context}")]
    UnexpectedOutput { context: String },

    /// Schema discovery produced an identifier that cannot go into SQL
    #[error("Refusing unsafe SQL identifier '{identifier}'")]
    InvalidIdentifier { identifier: String },

    /// A timestamp column did not match the expected format
    #[error("Invalid timestamp '{value}' in field '{field}'")]
    TimestampFormat {
        field: String,
        value: String,
        #[source]
        source: Option<chrono::ParseError>,
    },

    /// The managed application is not running, so no server id exists
    #[error("The application process is not running")]
    ApplicationNotRunning {
        #[source]
        source: crate::admin::AdminError,
    },

    /// The admin API answered with an error or an unusable payload
    #[error("Admin API call failed: {context}")]
    AdminApi {
        context: String,
        #[source]
        source: crate::admin::AdminError,
    },

    /// I/O operation failed
    #[error("I/O operation failed: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization or deserialization failed
    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results with MeteringError
pub type Result<T> = std::result::Result<T, MeteringError>;

impl MeteringError {
    /// Creates a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an error for a client binary that could not be started
    pub fn spawn_failed(binary: &str, error: std::io::Error) -> Self {
        Self::ExternalProcess {
            context: format!("could not run '{}'", binary),
            exit_code: None,
            source: Some(error),
        }
    }

    /// Creates an error for a client that exited unsuccessfully.
    ///
    /// Only the first line of stderr is kept to avoid echoing query text.
    pub fn client_exited(exit_code: Option<i32>, stderr: &str) -> Self {
        let first_line = stderr.lines().next().unwrap_or_default().trim();
        let context = match exit_code {
            Some(code) => format!("exited with status {}: {}", code, first_line),
            None => format!("terminated by signal: {}", first_line),
        };
        Self::ExternalProcess {
            context,
            exit_code,
            source: None,
        }
    }

    /// Creates an unexpected output error
    pub fn unexpected_output(context: impl Into<String>) -> Self {
        Self::UnexpectedOutput {
            context: context.into(),
        }
    }

    /// Creates an invalid identifier error
    pub fn invalid_identifier(identifier: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            identifier: identifier.into(),
        }
    }

    /// Creates an I/O error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
