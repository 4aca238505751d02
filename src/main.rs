use std::time::Duration;

use futures::future::join_all;
use opentelemetry::global;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use vitrine::{app, config::Configuration, initialize_state, telemetry};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // the endpoint is needed before logging starts, so peek at the file.
    let path = std::env::var("CONFIG_PATH").unwrap_or_default();
    let endpoint = Configuration::default()
        .path(path.into())
        .read()
        .ok()
        .and_then(|config| config.telemetry.otlp_endpoint.clone());

    let logging = endpoint
        .as_deref()
        .map(telemetry::setup_logging)
        .transpose()?;
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vitrine=info,tower_http=info".into()),
        )
        .with(fmt::layer())
        .with(logging)
        .init();

    let tracer = match endpoint.as_deref() {
        Some(endpoint) => {
            let provider = telemetry::setup_tracer(endpoint)?;
            global::set_tracer_provider(provider.clone());
            Some(provider)
        },
        None => None,
    };

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "metrics recorder not installed");
            None
        },
    };

    let (state, workers) = initialize_state(metrics).await?;
    let port = state.config.port;

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, version = state.config.version(), "server started");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // the router owned the last outbox handle, queued effects drain now.
    if tokio::time::timeout(DRAIN_TIMEOUT, join_all(workers)).await.is_err() {
        tracing::warn!("background tasks still running, giving up");
    }
    if let Some(provider) = tracer {
        provider.shutdown()?;
    }

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(err) => tracing::error!(error = %err, "cannot listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
}
