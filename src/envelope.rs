//! Wire shapes exchanged with callers and backends.
//!
//! The [`ActionEnvelope`] is what a caller POSTs to the broker; the
//! [`ResponseEnvelope`] is what every endpoint answers with, whatever backend
//! protocol was used underneath.
//!
//! # Example
//!
//! ```json
//! {
//!   "action": "mail",
//!   "mail": {
//!     "from": "a@x.com",
//!     "to": "b@x.com",
//!     "subject": "hi",
//!     "message": "hello"
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The backend capability a caller asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Auth,
    Log,
    Mail,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Auth => "auth",
            Action::Log => "log",
            Action::Mail => "mail",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an `action` tag is outside the fixed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auth" => Ok(Action::Auth),
            "log" => Ok(Action::Log),
            "mail" => Ok(Action::Mail),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// Inbound request body.
///
/// `action` is kept as a raw string so an unrecognised tag is reported as
/// "unknown action" instead of a generic decode error.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionEnvelope {
    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthPayload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mail: Option<MailMessage>,
}

/// Credentials forwarded to the authentication service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuthPayload {
    pub email: String,
    pub password: String,
}

/// A log entry, identical across the HTTP, RPC, gRPC and queue paths.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogRecord {
    pub name: String,
    pub data: String,
}

impl LogRecord {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Message forwarded to the mail service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub message: String,
}

/// Uniform result shape returned to callers (and by the HTTP backends).
///
/// `error == false` means the backend fully accepted the operation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub error: bool,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseEnvelope {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            error: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
            data: None,
        }
    }

    /// Attach a data payload
    pub fn with_data(mut self, data: Option<Value>) -> Self {
        self.data = data;
        self
    }
}
