//! Query execution through the external `psql` client.
//!
//! # Security
//! Connection parameters travel as environment variables of the child
//! process only. Query output contains personal data and is never logged;
//! only its size is traced.

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::ClientConfig;
use crate::error::MeteringError;

/// Runs one SQL statement and returns the client's raw tabular output.
///
/// Implementations block (asynchronously) until the statement finishes.
/// There is no retry; a failure is reported to the caller as-is.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Executes `query` and returns standard output verbatim.
    ///
    /// # Errors
    /// Returns `ExternalProcess` if the client cannot be started or exits
    /// unsuccessfully.
    async fn run(&self, query: &str) -> crate::Result<String>;
}

/// Executes queries by spawning `<psql> -c <query>` once per call.
#[derive(Debug, Clone)]
pub struct PsqlExecutor {
    config: ClientConfig,
}

impl PsqlExecutor {
    /// Creates an executor after validating the client configuration.
    ///
    /// # Errors
    /// Returns a configuration error for an invalid `ClientConfig`
    pub fn new(config: ClientConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration this executor runs with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[async_trait]
impl QueryExecutor for PsqlExecutor {
    async fn run(&self, query: &str) -> crate::Result<String> {
        let binary = self.config.psql_binary.display().to_string();
        tracing::debug!("Running query: {}", query);

        let mut command = Command::new(&self.config.psql_binary);
        command.arg("-c").arg(query).kill_on_drop(true);
        for (name, value) in self.config.database.to_env_vars() {
            command.env(name, value.as_str());
        }

        let output = command.output().await.map_err(|e| {
            tracing::error!("Failed to start {}: {}", binary, e);
            MeteringError::spawn_failed(&binary, e)
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let error = MeteringError::client_exited(output.status.code(), &stderr);
            tracing::error!("{}", error);
            return Err(error);
        }

        tracing::trace!("Query returned {} bytes", output.stdout.len());
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
