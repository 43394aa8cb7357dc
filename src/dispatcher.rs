//! Dispatcher - classifies an inbound envelope and routes it to one adapter.
//!
//! # Routing
//!
//! ```text
//! action | adapter
//! -------|---------------------------------------------
//! auth   | RestForwarder -> authentication service
//! mail   | RestForwarder -> mail service
//! log    | LogSink chosen by SinkKind (http/rpc/grpc/queue)
//! other  | classification failure, no network call
//! ```
//!
//! Every outcome, including adapter failures, is turned into a
//! [`ResponseEnvelope`] plus an HTTP status; nothing here panics on a
//! backend error.

use crate::adapters::{AdapterError, LogSink, RestForwarder, ServiceEndpoint, SinkKind};
use crate::envelope::{Action, ActionEnvelope, ResponseEnvelope};
use http::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a request did not produce a successful envelope.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Body is not a valid action envelope
    #[error("invalid request body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown action")]
    UnknownAction(String),

    /// Recognised action without its sub-payload
    #[error("missing '{0}' payload")]
    MissingPayload(Action),

    #[error("no log sink configured for '{0}'")]
    SinkUnavailable(SinkKind),

    /// The selected adapter failed
    #[error("{source}")]
    Adapter {
        adapter: String,
        #[source]
        source: AdapterError,
    },
}

impl DispatchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::Malformed(_)
            | DispatchError::UnknownAction(_)
            | DispatchError::MissingPayload(_) => StatusCode::BAD_REQUEST,
            DispatchError::SinkUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Adapter { source, .. } => source.status_code(),
        }
    }

    /// True for failures detected before any adapter was selected.
    pub fn is_classification(&self) -> bool {
        matches!(
            self,
            DispatchError::Malformed(_)
                | DispatchError::UnknownAction(_)
                | DispatchError::MissingPayload(_)
        )
    }

    fn adapter(adapter: &str, source: AdapterError) -> Self {
        DispatchError::Adapter {
            adapter: adapter.to_string(),
            source,
        }
    }
}

/// Routes action envelopes to the auth, mail and logging backends.
///
/// Holds no per-request state; wrap in `Arc` and share across handlers.
pub struct Dispatcher {
    forwarder: RestForwarder,
    auth: ServiceEndpoint,
    mail: ServiceEndpoint,
    sinks: HashMap<SinkKind, Arc<dyn LogSink>>,
    default_sink: SinkKind,
}

impl Dispatcher {
    pub fn new(forwarder: RestForwarder, auth_url: impl Into<String>, mail_url: impl Into<String>) -> Self {
        Self {
            forwarder,
            auth: ServiceEndpoint::new("auth", auth_url),
            mail: ServiceEndpoint::new("mail", mail_url),
            sinks: HashMap::new(),
            default_sink: SinkKind::Rpc,
        }
    }

    /// Register the sink used for `kind`, replacing any previous one.
    pub fn with_sink(mut self, kind: SinkKind, sink: Arc<dyn LogSink>) -> Self {
        debug!(kind = %kind, sink = %sink.name(), "Registering log sink");
        self.sinks.insert(kind, sink);
        self
    }

    /// Sink used by [`Dispatcher::dispatch`] for `log` actions
    pub fn with_default_sink(mut self, kind: SinkKind) -> Self {
        self.default_sink = kind;
        self
    }

    pub fn default_sink(&self) -> SinkKind {
        self.default_sink
    }

    /// Registered sink kinds, in declaration order.
    pub fn sink_kinds(&self) -> Vec<SinkKind> {
        SinkKind::ALL
            .into_iter()
            .filter(|kind| self.sinks.contains_key(kind))
            .collect()
    }

    /// Dispatch a raw body, logging through the default sink.
    pub async fn dispatch(&self, body: &[u8]) -> (StatusCode, ResponseEnvelope) {
        self.dispatch_with(body, self.default_sink).await
    }

    /// Dispatch a raw body, logging through `sink`.
    pub async fn dispatch_with(&self, body: &[u8], sink: SinkKind) -> (StatusCode, ResponseEnvelope) {
        match self.route(body, sink).await {
            Ok(envelope) => (StatusCode::ACCEPTED, envelope),
            Err(e) => {
                let status = e.status_code();
                if e.is_classification() {
                    debug!(error = %e, "Rejected request");
                } else if let DispatchError::Adapter { adapter, source } = &e {
                    warn!(
                        adapter = %adapter,
                        category = source.category(),
                        status = status.as_u16(),
                        error = %source,
                        "Adapter call failed"
                    );
                } else {
                    warn!(error = %e, "Dispatch failed");
                }
                (status, ResponseEnvelope::failure(e.to_string()))
            }
        }
    }

    /// Decode, classify and invoke exactly one adapter.
    pub async fn route(&self, body: &[u8], sink: SinkKind) -> Result<ResponseEnvelope, DispatchError> {
        let envelope: ActionEnvelope = serde_json::from_slice(body)?;

        let action: Action = envelope
            .action
            .parse()
            .map_err(|_| DispatchError::UnknownAction(envelope.action.clone()))?;

        info!(action = %action, "Dispatching request");

        match action {
            Action::Auth => {
                let auth = envelope.auth.ok_or(DispatchError::MissingPayload(action))?;
                let reply = self
                    .forwarder
                    .forward(&self.auth, &auth)
                    .await
                    .map_err(|e| DispatchError::adapter("auth", e))?;

                Ok(ResponseEnvelope::ok("Authenticate!").with_data(reply.data))
            }
            Action::Mail => {
                let mail = envelope.mail.ok_or(DispatchError::MissingPayload(action))?;
                self.forwarder
                    .forward(&self.mail, &mail)
                    .await
                    .map_err(|e| DispatchError::adapter("mail", e))?;

                Ok(ResponseEnvelope::ok(format!("Sent to {}", mail.to)))
            }
            Action::Log => {
                let record = envelope.log.ok_or(DispatchError::MissingPayload(action))?;
                let target = self
                    .sinks
                    .get(&sink)
                    .ok_or(DispatchError::SinkUnavailable(sink))?;

                let message = target
                    .write(&record)
                    .await
                    .map_err(|e| DispatchError::adapter(target.name(), e))?;

                Ok(ResponseEnvelope::ok(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{spawn_stub, RecordingSink};
    use crate::envelope::{AuthPayload, LogRecord, MailMessage};
    use axum::{http::StatusCode as AxumStatus, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Counts hits and captures bodies of a stub REST backend.
    #[derive(Clone, Default)]
    struct Backend {
        hits: Arc<AtomicUsize>,
        bodies: Arc<Mutex<Vec<Value>>>,
    }

    impl Backend {
        async fn spawn(&self, status: AxumStatus, reply: Value) -> String {
            let backend = self.clone();
            let app = Router::new().route(
                "/",
                post(move |Json(body): Json<Value>| {
                    let backend = backend.clone();
                    let reply = reply.clone();
                    async move {
                        backend.hits.fetch_add(1, Ordering::SeqCst);
                        backend.bodies.lock().unwrap().push(body);
                        (status, Json(reply))
                    }
                }),
            );
            format!("http://{}/", spawn_stub(app).await)
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        auth: Backend,
        mail: Backend,
        rpc: Arc<RecordingSink>,
        queue: Arc<RecordingSink>,
    }

    async fn harness(auth_status: AxumStatus, mail_status: AxumStatus) -> Harness {
        let auth = Backend::default();
        let mail = Backend::default();
        let auth_url = auth
            .spawn(
                auth_status,
                json!({"error": false, "message": "Logged in", "data": {"email": "a@x.com"}}),
            )
            .await;
        let mail_url = mail.spawn(mail_status, json!({"error": false, "message": "sent"})).await;

        let rpc = Arc::new(RecordingSink::default());
        let queue = Arc::new(RecordingSink::default());

        let dispatcher = Dispatcher::new(RestForwarder::new(), auth_url, mail_url)
            .with_sink(SinkKind::Rpc, rpc.clone())
            .with_sink(SinkKind::Queue, queue.clone());

        Harness {
            dispatcher,
            auth,
            mail,
            rpc,
            queue,
        }
    }

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[tokio::test]
    async fn test_mail_end_to_end() {
        let h = harness(AxumStatus::ACCEPTED, AxumStatus::ACCEPTED).await;

        let (status, envelope) = h
            .dispatcher
            .dispatch(&body(json!({
                "action": "mail",
                "mail": {"from": "a@x.com", "to": "b@x.com", "subject": "hi", "message": "hello"}
            })))
            .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"error": false, "message": "Sent to b@x.com"})
        );

        assert_eq!(h.mail.hits(), 1);
        assert_eq!(h.auth.hits(), 0);
        let sent: MailMessage =
            serde_json::from_value(h.mail.bodies.lock().unwrap()[0].clone()).unwrap();
        assert_eq!(
            sent,
            MailMessage {
                from: "a@x.com".to_string(),
                to: "b@x.com".to_string(),
                subject: "hi".to_string(),
                message: "hello".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_auth_success_preserves_data() {
        let h = harness(AxumStatus::ACCEPTED, AxumStatus::ACCEPTED).await;

        let (status, envelope) = h
            .dispatcher
            .dispatch(&body(json!({
                "action": "auth",
                "auth": {"email": "a@x.com", "password": "secret"}
            })))
            .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(!envelope.error);
        assert_eq!(envelope.message, "Authenticate!");
        assert_eq!(envelope.data, Some(json!({"email": "a@x.com"})));

        assert_eq!(h.auth.hits(), 1);
        assert_eq!(h.mail.hits(), 0);
        let sent: AuthPayload =
            serde_json::from_value(h.auth.bodies.lock().unwrap()[0].clone()).unwrap();
        assert_eq!(sent.password, "secret");
    }

    #[tokio::test]
    async fn test_auth_invalid_credentials() {
        let h = harness(AxumStatus::UNAUTHORIZED, AxumStatus::ACCEPTED).await;

        let (status, envelope) = h
            .dispatcher
            .dispatch(&body(json!({
                "action": "auth",
                "auth": {"email": "a@x.com", "password": "wrong"}
            })))
            .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(envelope.error);
        assert_eq!(envelope.message, "invalid credentials");
        assert!(envelope.data.is_none());
    }

    #[tokio::test]
    async fn test_mail_backend_failure() {
        let h = harness(AxumStatus::ACCEPTED, AxumStatus::INTERNAL_SERVER_ERROR).await;

        let (status, envelope) = h
            .dispatcher
            .dispatch(&body(json!({
                "action": "mail",
                "mail": {"from": "a", "to": "b", "subject": "c", "message": "d"}
            })))
            .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(envelope.error);
        assert_eq!(envelope.message, "error calling mail service");
    }

    #[tokio::test]
    async fn test_log_uses_default_sink() {
        let h = harness(AxumStatus::ACCEPTED, AxumStatus::ACCEPTED).await;

        let (status, envelope) = h
            .dispatcher
            .dispatch(&body(json!({"action": "log", "log": {"name": "event", "data": "x"}})))
            .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(envelope.message, "recorded event");
        assert_eq!(h.rpc.received(), vec![LogRecord::new("event", "x")]);
        assert!(h.queue.received().is_empty());
        assert_eq!(h.auth.hits() + h.mail.hits(), 0);
    }

    #[tokio::test]
    async fn test_log_with_explicit_sink() {
        let h = harness(AxumStatus::ACCEPTED, AxumStatus::ACCEPTED).await;

        let (status, _) = h
            .dispatcher
            .dispatch_with(
                &body(json!({"action": "log", "log": {"name": "test", "data": "x"}})),
                SinkKind::Queue,
            )
            .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(h.queue.received(), vec![LogRecord::new("test", "x")]);
        assert!(h.rpc.received().is_empty());
    }

    #[tokio::test]
    async fn test_log_sink_not_registered() {
        let h = harness(AxumStatus::ACCEPTED, AxumStatus::ACCEPTED).await;

        let (status, envelope) = h
            .dispatcher
            .dispatch_with(
                &body(json!({"action": "log", "log": {"name": "a", "data": "b"}})),
                SinkKind::Grpc,
            )
            .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(envelope.error);
    }

    #[tokio::test]
    async fn test_log_sink_failure_wrapped() {
        let sink = Arc::new(RecordingSink::failing());
        let dispatcher = Dispatcher::new(RestForwarder::new(), "http://unused", "http://unused")
            .with_sink(SinkKind::Rpc, sink.clone());

        let (status, envelope) = dispatcher
            .dispatch(&body(json!({"action": "log", "log": {"name": "a", "data": "b"}})))
            .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(envelope.error);
        assert_eq!(envelope.message, "sink down");
        assert_eq!(sink.received().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_action_makes_no_calls() {
        let h = harness(AxumStatus::ACCEPTED, AxumStatus::ACCEPTED).await;

        let (status, envelope) = h
            .dispatcher
            .dispatch(&body(json!({
                "action": "launch",
                "log": {"name": "a", "data": "b"},
                "mail": {"from": "a", "to": "b", "subject": "c", "message": "d"}
            })))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(envelope, ResponseEnvelope::failure("unknown action"));
        assert_eq!(h.auth.hits() + h.mail.hits(), 0);
        assert!(h.rpc.received().is_empty());
        assert!(h.queue.received().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let h = harness(AxumStatus::ACCEPTED, AxumStatus::ACCEPTED).await;

        let (status, envelope) = h.dispatcher.dispatch(b"{not json").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(envelope.error);
        assert!(envelope.message.starts_with("invalid request body"));
        assert_eq!(h.auth.hits() + h.mail.hits(), 0);
    }

    #[tokio::test]
    async fn test_missing_payload() {
        let h = harness(AxumStatus::ACCEPTED, AxumStatus::ACCEPTED).await;

        let err = h
            .dispatcher
            .route(&body(json!({"action": "mail"})), SinkKind::Rpc)
            .await
            .unwrap_err();

        assert!(err.is_classification());
        assert_eq!(err.to_string(), "missing 'mail' payload");
        assert_eq!(h.mail.hits(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_not_retried() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dispatcher = Dispatcher::new(
            RestForwarder::new(),
            format!("http://{}/", addr),
            format!("http://{}/", addr),
        );

        let (status, envelope) = dispatcher
            .dispatch(&body(json!({"action": "auth", "auth": {"email": "a", "password": "b"}})))
            .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(envelope.error);
        assert!(envelope.message.starts_with("HTTP error"));
    }

    #[test]
    fn test_sink_kinds() {
        let dispatcher = Dispatcher::new(RestForwarder::new(), "http://a", "http://m")
            .with_sink(SinkKind::Queue, Arc::new(RecordingSink::default()))
            .with_sink(SinkKind::Http, Arc::new(RecordingSink::default()))
            .with_default_sink(SinkKind::Queue);

        assert_eq!(dispatcher.sink_kinds(), vec![SinkKind::Http, SinkKind::Queue]);
        assert_eq!(dispatcher.default_sink(), SinkKind::Queue);
    }
}
