//! REST forwarding - synchronous JSON POST to a named backend.
//!
//! The [`RestForwarder`] carries the auth and mail actions, and the
//! [`HttpSink`] uses it for the plain-HTTP logging path.
//!
//! # Status contract
//!
//! ```text
//! 202 Accepted      -> success, body decoded as a ResponseEnvelope
//! 401 Unauthorized  -> AdapterError::Unauthorized ("invalid credentials")
//! anything else     -> AdapterError::UnexpectedStatus ("error calling <svc> service")
//! ```
//!
//! No retries: a transport failure goes straight back to the dispatcher.

use super::{AdapterError, LogSink};
use crate::envelope::{LogRecord, ResponseEnvelope};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for backend requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A named HTTP backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// Name used in error messages ("auth", "mail", "logger")
    pub name: String,

    /// Full URL the payload is POSTed to
    pub url: String,
}

impl ServiceEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Posts JSON payloads to HTTP backends.
///
/// Cheap to clone; the inner client shares its connection pool.
#[derive(Debug, Clone)]
pub struct RestForwarder {
    client: Client,
    timeout: Duration,
}

impl RestForwarder {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// POST `payload` to `service` and decode its envelope.
    ///
    /// An empty 202 body decodes to a default (success, no data) envelope.
    pub async fn forward<T>(
        &self,
        service: &ServiceEndpoint,
        payload: &T,
    ) -> Result<ResponseEnvelope, AdapterError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(payload)?;

        debug!(service = %service.name, url = %service.url, "Forwarding request");

        let response = self
            .client
            .post(&service.url)
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::ACCEPTED => {}
            StatusCode::UNAUTHORIZED => {
                warn!(service = %service.name, "Backend rejected credentials");
                return Err(AdapterError::Unauthorized);
            }
            _ => {
                warn!(
                    service = %service.name,
                    status = %status,
                    "Backend returned unexpected status"
                );
                return Err(AdapterError::UnexpectedStatus {
                    service: service.name.clone(),
                    status: status.as_u16(),
                });
            }
        }

        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(ResponseEnvelope::default());
        }

        serde_json::from_slice(&bytes).map_err(|source| AdapterError::MalformedResponse {
            service: service.name.clone(),
            source,
        })
    }
}

impl Default for RestForwarder {
    fn default() -> Self {
        Self::new()
    }
}

/// Log sink that POSTs the record to the logger service.
#[derive(Debug, Clone)]
pub struct HttpSink {
    forwarder: RestForwarder,
    endpoint: ServiceEndpoint,
}

impl HttpSink {
    pub fn new(forwarder: RestForwarder, url: impl Into<String>) -> Self {
        Self {
            forwarder,
            endpoint: ServiceEndpoint::new("logger", url),
        }
    }
}

#[async_trait]
impl LogSink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn write(&self, record: &LogRecord) -> Result<String, AdapterError> {
        self.forwarder.forward(&self.endpoint, record).await?;
        Ok("logged".to_string())
    }
}
