//! Lightweight binary RPC to the logger service.
//!
//! Every call dials a fresh TCP connection, sends one request frame, waits
//! for one reply frame and drops the socket. Nothing is pooled.
//!
//! # Wire format
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────────┐
//! │ len: u32 BE  │ MessagePack map (named fields)           │
//! └──────────────┴──────────────────────────────────────────┘
//!
//! request: { seq, method: "RPCServer.LogInfo", params: { name, data } }
//! reply:   { seq, error: nil | "...", result: nil | "..." }
//! ```

use super::{AdapterError, LogSink};
use crate::envelope::LogRecord;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

/// Remote procedure used by the logger service
pub const DEFAULT_METHOD: &str = "RPCServer.LogInfo";

/// One RPC invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub seq: u64,
    pub method: String,
    pub params: LogRecord,
}

/// The server's answer to an [`RpcRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcReply {
    pub seq: u64,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub result: Option<String>,
}

/// Log sink speaking the framed MessagePack RPC.
#[derive(Debug)]
pub struct RpcSink {
    addr: String,
    method: String,
    next_seq: AtomicU64,
}

impl RpcSink {
    /// Create a sink dialing `addr` (a `host:port` string)
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            method: DEFAULT_METHOD.to_string(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Call a different remote procedure
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Dial, invoke once, and return the remote string result.
    pub async fn call(&self, record: &LogRecord) -> Result<String, AdapterError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            seq,
            method: self.method.clone(),
            params: record.clone(),
        };

        let stream = TcpStream::connect(&self.addr).await?;
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

        debug!(addr = %self.addr, method = %self.method, seq, "Sending RPC request");

        framed
            .send(Bytes::from(rmp_serde::to_vec_named(&request)?))
            .await?;

        let frame = framed
            .next()
            .await
            .ok_or_else(|| AdapterError::Protocol("connection closed before reply".to_string()))??;

        let reply: RpcReply = rmp_serde::from_slice(&frame)?;

        if reply.seq != seq {
            return Err(AdapterError::Protocol(format!(
                "reply sequence {} does not match request {}",
                reply.seq, seq
            )));
        }

        match reply.error {
            Some(error) if !error.is_empty() => Err(AdapterError::Remote(error)),
            _ => Ok(reply.result.unwrap_or_default()),
        }
    }
}

#[async_trait]
impl LogSink for RpcSink {
    fn name(&self) -> &str {
        "rpc"
    }

    async fn write(&self, record: &LogRecord) -> Result<String, AdapterError> {
        self.call(record).await
    }
}
