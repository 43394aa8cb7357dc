//! Protocol adapters.
//!
//! Each adapter translates one broker call into exactly one outbound wire
//! protocol. The logging paths share the [`LogSink`] interface so the
//! dispatcher can pick one by [`SinkKind`] without duplicating routing logic.
//!
//! ## Adapters
//!
//! - [`RestForwarder`]: JSON POST to an HTTP service (auth, mail, logger)
//! - [`HttpSink`]: log record over REST
//! - [`RpcSink`]: log record over a length-prefixed MessagePack RPC
//! - [`GrpcSink`]: log record over gRPC with a fixed deadline
//! - [`QueueSink`]: log record published to an AMQP topic exchange
//!
//! ## Writing another sink
//!
//! ```rust,ignore
//! use courier::adapters::{AdapterError, LogSink};
//! use courier::envelope::LogRecord;
//! use async_trait::async_trait;
//!
//! struct StdoutSink;
//!
//! #[async_trait]
//! impl LogSink for StdoutSink {
//!     fn name(&self) -> &str {
//!         "stdout"
//!     }
//!
//!     async fn write(&self, record: &LogRecord) -> Result<String, AdapterError> {
//!         println!("{}: {}", record.name, record.data);
//!         Ok("logged to stdout".to_string())
//!     }
//! }
//! ```

pub mod grpc;
pub mod queue;
pub mod rest;
pub mod rpc;

use crate::envelope::LogRecord;
use async_trait::async_trait;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use grpc::GrpcSink;
pub use queue::{Publisher, QueueSink};
pub use rest::{HttpSink, RestForwarder, ServiceEndpoint};
pub use rpc::RpcSink;

/// Errors raised by an adapter while talking to its backend.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Backend rejected the credentials (401)
    #[error("invalid credentials")]
    Unauthorized,

    /// Backend answered with a status other than 202
    #[error("error calling {service} service")]
    UnexpectedStatus { service: String, status: u16 },

    /// Backend answered 202 but the body was not a response envelope
    #[error("malformed response from {service} service: {source}")]
    MalformedResponse {
        service: String,
        #[source]
        source: serde_json::Error,
    },

    /// HTTP transport failure (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Socket-level failure on the RPC path
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("RPC encode error: {0}")]
    RpcEncode(#[from] rmp_serde::encode::Error),

    #[error("RPC decode error: {0}")]
    RpcDecode(#[from] rmp_serde::decode::Error),

    /// The remote procedure ran and returned an error string
    #[error("{0}")]
    Remote(String),

    /// Backend replied with something that breaks the wire contract
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("gRPC transport error: {0}")]
    GrpcTransport(#[from] tonic::transport::Error),

    #[error("gRPC call failed: {0}")]
    GrpcStatus(#[from] tonic::Status),

    /// The call did not complete within its deadline
    #[error("call timed out after {0}ms")]
    Timeout(u64),

    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

impl AdapterError {
    /// HTTP status reported to the caller when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdapterError::Unauthorized => StatusCode::UNAUTHORIZED,
            AdapterError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AdapterError::Http(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            AdapterError::Serialization(_) | AdapterError::RpcEncode(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Coarse failure class, used as a log field.
    pub fn category(&self) -> &'static str {
        match self {
            AdapterError::Unauthorized | AdapterError::Remote(_) => "business",
            AdapterError::UnexpectedStatus { .. }
            | AdapterError::MalformedResponse { .. }
            | AdapterError::Protocol(_)
            | AdapterError::RpcDecode(_)
            | AdapterError::GrpcStatus(_) => "protocol",
            AdapterError::Serialization(_) | AdapterError::RpcEncode(_) => "local",
            AdapterError::Http(_)
            | AdapterError::Io(_)
            | AdapterError::GrpcTransport(_)
            | AdapterError::Timeout(_)
            | AdapterError::Amqp(_) => "transport",
        }
    }
}

/// Which logging transport handles a `log` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Http,
    Rpc,
    Grpc,
    Queue,
}

impl SinkKind {
    pub const ALL: [SinkKind; 4] = [SinkKind::Http, SinkKind::Rpc, SinkKind::Grpc, SinkKind::Queue];

    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Http => "http",
            SinkKind::Rpc => "rpc",
            SinkKind::Grpc => "grpc",
            SinkKind::Queue => "queue",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SinkKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown log sink '{}'", s))
    }
}

/// A destination for log records.
///
/// Implementations open and release their own transport resources per call
/// and hold no per-request state, so one instance serves concurrent requests.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Short identifier used in logs (e.g., "rpc", "grpc")
    fn name(&self) -> &str;

    /// Deliver one record.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Success message for the response envelope
    /// * `Err(AdapterError)` - Delivery failed; never retried here
    async fn write(&self, record: &LogRecord) -> Result<String, AdapterError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_kind_parse() {
        assert_eq!("rpc".parse::<SinkKind>(), Ok(SinkKind::Rpc));
        assert_eq!("queue".parse::<SinkKind>(), Ok(SinkKind::Queue));
        assert!("rabbit".parse::<SinkKind>().is_err());

        for kind in SinkKind::ALL {
            assert_eq!(kind.to_string().parse::<SinkKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AdapterError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AdapterError::Timeout(1000).status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            AdapterError::UnexpectedStatus {
                service: "mail".to_string(),
                status: 500,
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AdapterError::Remote("nope".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(AdapterError::Unauthorized.to_string(), "invalid credentials");
        assert_eq!(
            AdapterError::UnexpectedStatus {
                service: "auth".to_string(),
                status: 500,
            }
            .to_string(),
            "error calling auth service"
        );
        assert_eq!(AdapterError::Timeout(1000).to_string(), "call timed out after 1000ms");
    }

    #[test]
    fn test_categories() {
        assert_eq!(AdapterError::Unauthorized.category(), "business");
        assert_eq!(AdapterError::Timeout(5).category(), "transport");
        assert_eq!(AdapterError::Protocol("x".to_string()).category(), "protocol");
    }
}
