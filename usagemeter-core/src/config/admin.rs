//! Admin API connection settings.

use std::time::Duration;
use zeroize::Zeroizing;

use crate::error::MeteringError;

/// Where and how to reach the application's admin API.
#[derive(Clone)]
pub struct AdminConfig {
    /// Admin API host
    pub host: String,
    /// Admin API port
    pub port: u16,
    /// Shared admin password
    password: Zeroizing<String>,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"****")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            password: Zeroizing::new(String::new()),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl AdminConfig {
    /// Creates an admin config with the given password and default address.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: Zeroizing::new(password.into()),
            ..Default::default()
        }
    }

    /// Builder method to set host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Builder method to set port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder method to set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The admin password.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Base URL of the admin API.
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }

    /// Validates admin settings.
    ///
    /// # Errors
    /// Returns error for an empty host or password, or a zero port
    pub fn validate(&self) -> crate::Result<()> {
        if self.host.is_empty() {
            return Err(MeteringError::configuration("admin host cannot be empty"));
        }
        if self.port == 0 {
            return Err(MeteringError::configuration(
                "admin port must be greater than 0",
            ));
        }
        if self.password.is_empty() {
            return Err(MeteringError::configuration(
                "admin password is required",
            ));
        }
        Ok(())
    }
}
