//! Client for the managed application's admin API.
//!
//! The exporter only needs one thing from it: the license id, which serves
//! as the server identifier in every record. The API is a single JSON
//! endpoint taking `{"action": ..., "params": {...}}` requests and
//! answering `{"result": 0, "feedback": {...}}` on success.

use async_trait::async_trait;
use base64::Engine;
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::AdminConfig;
use crate::error::MeteringError;

/// Header carrying the base64-encoded admin password.
pub const AUTH_HEADER: &str = "X-M2EE-Authentication";

/// Failures of an admin API call.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Nothing is listening: the application process is not running
    #[error("Admin API not available at {endpoint}")]
    NotAvailable {
        endpoint: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The API answered with a non-zero result code
    #[error("Admin API action failed with result {result}: {message}")]
    Api { result: i64, message: String },

    /// The answer could not be used
    #[error("Unusable admin API response: {context}")]
    Protocol {
        context: String,
        #[source]
        source: Option<reqwest::Error>,
    },
}

impl AdminError {
    fn protocol(context: impl Into<String>) -> Self {
        Self::Protocol {
            context: context.into(),
            source: None,
        }
    }
}

/// Identity lookups against the managed application.
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Returns the license id of the running application.
    ///
    /// # Errors
    /// `AdminError::NotAvailable` when the application is not running;
    /// other variants for failed or malformed answers.
    async fn license_id(&self) -> Result<String, AdminError>;
}

/// Maps an admin lookup failure onto the run-level error.
///
/// An unavailable application is fatal for the run and gets its own
/// variant.
pub fn escalate(error: AdminError) -> MeteringError {
    match error {
        AdminError::NotAvailable { .. } => MeteringError::ApplicationNotRunning { source: error },
        other => MeteringError::AdminApi {
            context: "license lookup".to_string(),
            source: other,
        },
    }
}

/// Extracts the license id from a `get_license_information` answer.
///
/// # Errors
/// Returns `Api` for non-zero results and `Protocol` when the payload
/// lacks a string `feedback.license_id`.
pub fn decode_license_response(body: &Value) -> Result<String, AdminError> {
    let result = body
        .get("result")
        .and_then(Value::as_i64)
        .ok_or_else(|| AdminError::protocol("missing numeric 'result'"))?;

    if result != 0 {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("no message");
        let message = match body.get("cause").and_then(Value::as_str) {
            Some(cause) => format!("{} (caused by: {})", message, cause),
            None => message.to_string(),
        };
        return Err(AdminError::Api { result, message });
    }

    body.get("feedback")
        .and_then(|feedback| feedback.get("license_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AdminError::protocol("response has no 'feedback.license_id'"))
}

/// Admin client speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAdminClient {
    client: reqwest::Client,
    config: AdminConfig,
}

impl HttpAdminClient {
    /// Creates a client after validating the admin configuration.
    ///
    /// # Errors
    /// Returns a configuration error for invalid settings or if the HTTP
    /// client cannot be built.
    pub fn new(config: AdminConfig) -> crate::Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                MeteringError::configuration(format!("Failed to build admin client: {}", e))
            })?;
        Ok(Self { client, config })
    }

    /// Sends one action and returns the decoded JSON answer.
    async fn request(&self, action: &str) -> Result<Value, AdminError> {
        let endpoint = self.config.endpoint();
        let token = base64::engine::general_purpose::STANDARD.encode(self.config.password());
        tracing::debug!("Admin API request: {}", action);

        let response = self
            .client
            .post(&endpoint)
            .header(AUTH_HEADER, token)
            .json(&json!({ "action": action, "params": {} }))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    AdminError::NotAvailable {
                        endpoint: endpoint.clone(),
                        source: Some(e),
                    }
                } else {
                    AdminError::Protocol {
                        context: format!("request '{}' failed", action),
                        source: Some(e),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdminError::protocol(format!(
                "HTTP status {} for '{}'",
                status, action
            )));
        }

        response.json::<Value>().await.map_err(|e| AdminError::Protocol {
            context: format!("invalid JSON for '{}'", action),
            source: Some(e),
        })
    }
}

#[async_trait]
impl AdminClient for HttpAdminClient {
    async fn license_id(&self) -> Result<String, AdminError> {
        let body = self.request("get_license_information").await?;
        decode_license_response(&body)
    }
}
