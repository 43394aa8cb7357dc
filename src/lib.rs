//! # Courier Request Broker
//!
//! A single HTTP entry point that accepts a client action and forwards it to
//! exactly one backend, each reached over its own wire protocol.
//!
//! ## Architecture
//!
//! ```text
//! Client -> HTTP API -> Dispatcher -> REST  (auth, mail, logger)
//!                                  -> RPC   (logger)
//!                                  -> gRPC  (logger)
//!                                  -> AMQP  (logs_topic exchange)
//! ```
//!
//! ## Modules
//!
//! - [`envelope`]: Request/response shapes shared with callers and backends
//! - [`adapters`]: One adapter per outbound protocol
//! - [`connection`]: Startup dial of the message broker with bounded backoff
//! - [`dispatcher`]: Action classification and routing
//! - [`api`]: axum routes
//! - [`config`]: TOML configuration

pub mod adapters;
pub mod api;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod envelope;
pub mod shutdown;

// Re-export commonly used types at crate root
pub use adapters::{AdapterError, LogSink, SinkKind};
pub use dispatcher::{DispatchError, Dispatcher};
pub use envelope::{ActionEnvelope, LogRecord, ResponseEnvelope};
