//! Vitrine is the backend of a classifieds marketplace: listing search,
//! fan posts, profile settings and identity verification on top of a
//! hosted backend.

#![forbid(unsafe_code)]

pub mod backend;
pub mod config;
pub mod error;
pub mod fan_post;
pub mod filters;
pub mod geo;
pub mod listing;
pub mod outbox;
pub mod profile;
pub mod ranking;
mod router;
pub mod search;
pub mod session;
pub mod telemetry;
pub mod upload;
pub mod verification;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::FromRef;
use axum::http::{Method, StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use backend::{Backend, MemoryBackend, RestClient};
use outbox::Outbox;

pub use error::ServerError;

/// Default timeout of backend calls.
const BACKEND_TIMEOUT: Duration = Duration::from_secs(8);

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub backend: Backend,
    pub outbox: Outbox,
    pub metrics: Option<PrometheusHandle>,
}

impl FromRef<AppState> for Backend {
    fn from_ref(state: &AppState) -> Backend {
        state.backend.clone()
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout, uploads included.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(30)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        .route("/metrics", get(router::status::metrics))
        .nest("/auth", router::auth::router())
        .nest("/account", router::auth::account())
        .nest("/listings", router::listings::router())
        .nest("/profile", router::profile::router())
        .nest("/fan-posts", router::fan_posts::router())
        .route("/earnings", get(router::fan_posts::earnings))
        .nest("/verification", router::verification::router())
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Backend described by the configuration, or an in-memory one.
pub fn connect_backend(
    config: &config::Configuration,
) -> Result<Backend, backend::BackendError> {
    match &config.backend {
        Some(cfg) => {
            let timeout = cfg
                .timeout_ms
                .map_or(BACKEND_TIMEOUT, Duration::from_millis);
            let client = RestClient::new(&cfg.url, &cfg.anon_key, timeout)?;

            tracing::info!(url = cfg.url, "using hosted backend");
            Ok(Backend::rest(client))
        },
        None => {
            tracing::warn!(
                "missing `backend` entry on `config.yaml` file, data is kept in memory"
            );
            Ok(Backend::memory(&MemoryBackend::default()))
        },
    }
}

/// Initialize the application state.
///
/// Returns the state and the background tasks to await on shutdown.
pub async fn initialize_state(
    metrics: Option<PrometheusHandle>,
) -> Result<(AppState, Vec<JoinHandle<()>>), Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let path = std::env::var("CONFIG_PATH").unwrap_or_default();
    let config = config::Configuration::default().path(path.into()).read()?;

    let backend = connect_backend(&config)?;
    let (outbox, worker) = Outbox::spawn(backend.tables.clone(), config.outbox_capacity);
    let listener = session::track_auth_events(backend.auth.subscribe(), outbox.clone());

    Ok((
        AppState {
            config,
            backend,
            outbox,
            metrics,
        },
        vec![worker, listener],
    ))
}
