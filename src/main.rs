use courier::adapters::{
    GrpcSink, HttpSink, Publisher, QueueSink, RestForwarder, RpcSink, SinkKind,
};
use courier::api::{self, AppState};
use courier::config::CourierConfig;
use courier::connection;
use courier::dispatcher::Dispatcher;
use courier::shutdown::ShutdownSignal;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize Logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    dotenvy::dotenv().ok();

    // 2. Load Configuration
    let config = match CourierConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    // 3. Connect to the message broker; the service does not start without it
    let policy = config.amqp.retry_policy();
    let rabbit = match connection::connect_amqp(&config.amqp.url, &policy).await {
        Ok(connection) => Arc::new(connection),
        Err(e) => {
            error!(error = %e, "Giving up on message broker");
            std::process::exit(1);
        }
    };

    // 4. Build the dispatcher with every log sink
    let forwarder = RestForwarder::new().with_timeout(Duration::from_millis(config.services.timeout_ms));
    let publisher = Publisher::new(rabbit.clone()).with_exchange(&config.amqp.exchange);

    let dispatcher = Dispatcher::new(
        forwarder.clone(),
        &config.services.auth_url,
        &config.services.mail_url,
    )
    .with_sink(
        SinkKind::Http,
        Arc::new(HttpSink::new(forwarder, &config.services.logger_url)),
    )
    .with_sink(
        SinkKind::Rpc,
        Arc::new(RpcSink::new(&config.rpc.addr).with_method(&config.rpc.method)),
    )
    .with_sink(
        SinkKind::Grpc,
        Arc::new(GrpcSink::new(&config.grpc.addr).with_deadline(Duration::from_millis(config.grpc.deadline_ms))),
    )
    .with_sink(
        SinkKind::Queue,
        Arc::new(QueueSink::new(publisher.clone()).with_routing_key(&config.amqp.routing_key)),
    )
    .with_default_sink(config.dispatch.default_sink());

    let state = Arc::new(
        AppState::new(dispatcher)
            .with_publisher(publisher)
            .with_api_key(config.server.api_key.clone()),
    );

    if state.api_key.is_none() {
        warn!("server.api_key not set, dispatch routes are unauthenticated");
    }

    // 5. Start Server
    let shutdown = ShutdownSignal::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move { shutdown.listen_for_signals().await }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, default_log_sink = %config.dispatch.default_sink(), "Courier broker listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown.clone().recv_owned())
        .await?;

    // 6. Release the broker connection
    if let Err(e) = rabbit.close(200, "shutdown").await {
        warn!(error = %e, "Failed to close message broker connection");
    }

    info!("Courier broker stopped");
    Ok(())
}
