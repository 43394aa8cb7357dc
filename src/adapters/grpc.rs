//! gRPC log sink.
//!
//! Calls `logs.LogService/WriteLog` with a hand-derived `prost` message pair,
//! so no protobuf compilation step is needed. The whole call (dial included)
//! runs under a fixed deadline; the channel is dropped on every exit path.

use super::{AdapterError, LogSink};
use crate::envelope::LogRecord;
use async_trait::async_trait;
use http::uri::PathAndQuery;
use std::time::Duration;
use tonic::transport::Endpoint;
use tracing::debug;

/// Default deadline for a single WriteLog call
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(1);

/// HTTP/2 path of the WriteLog method
const WRITE_LOG_PATH: &str = "/logs.LogService/WriteLog";

/// `logs.Log`
#[derive(Clone, PartialEq, prost::Message)]
pub struct Log {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub data: String,
}

/// `logs.LogRequest`
#[derive(Clone, PartialEq, prost::Message)]
pub struct LogRequest {
    #[prost(message, optional, tag = "1")]
    pub log_entry: Option<Log>,
}

/// `logs.LogResponse`
#[derive(Clone, PartialEq, prost::Message)]
pub struct LogResponse {
    #[prost(string, tag = "1")]
    pub result: String,
}

impl From<&LogRecord> for LogRequest {
    fn from(record: &LogRecord) -> Self {
        Self {
            log_entry: Some(Log {
                name: record.name.clone(),
                data: record.data.clone(),
            }),
        }
    }
}

/// Log sink calling the logger service over gRPC (plaintext HTTP/2).
#[derive(Debug, Clone)]
pub struct GrpcSink {
    /// Endpoint URI, e.g. `http://logger-service:50001`
    addr: String,
    deadline: Duration,
}

impl GrpcSink {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Set custom deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    async fn write_log(&self, request: LogRequest) -> Result<LogResponse, AdapterError> {
        let channel = Endpoint::from_shared(self.addr.clone())?.connect().await?;
        let mut client = tonic::client::Grpc::new(channel);

        client.ready().await?;

        let codec = tonic_prost::ProstCodec::<LogRequest, LogResponse>::default();
        let path = PathAndQuery::from_static(WRITE_LOG_PATH);

        // Propagated as grpc-timeout so the logger gives up at the same moment
        let mut request = tonic::Request::new(request);
        request.set_timeout(self.deadline);

        let response = client.unary(request, path, codec).await?;

        Ok(response.into_inner())
    }

    /// Issue one WriteLog call bounded by the deadline.
    pub async fn call(&self, record: &LogRecord) -> Result<LogResponse, AdapterError> {
        debug!(addr = %self.addr, deadline_ms = self.deadline.as_millis() as u64, "Calling WriteLog");

        match tokio::time::timeout(self.deadline, self.write_log(record.into())).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout(self.deadline.as_millis() as u64)),
        }
    }
}

#[async_trait]
impl LogSink for GrpcSink {
    fn name(&self) -> &str {
        "grpc"
    }

    async fn write(&self, record: &LogRecord) -> Result<String, AdapterError> {
        self.call(record).await?;
        Ok("logged via gRPC!".to_string())
    }
}
