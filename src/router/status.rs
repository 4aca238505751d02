//! Public instance status and metrics exposition.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use crate::AppState;
use crate::config::Configuration;

/// Structured configuration.
#[derive(Serialize)]
pub struct Status {
    version: String,
    name: String,
    url: String,
}

/// Public server status.
pub async fn status(State(config): State<Arc<Configuration>>) -> Json<Status> {
    Json(Status {
        version: config.version().to_owned(),
        name: config.name.clone(),
        url: config.url.clone(),
    })
}

/// Prometheus exposition, when a recorder is installed.
pub async fn metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use crate::tests::{json, make_request, state};
    use crate::*;

    #[tokio::test]
    async fn test_status() {
        let (state, _, _) = state().await;
        let response = make_request(app(state), Method::GET, "/status.json", None, String::new()).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["name"], "vitrine");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let (state, _, _) = state().await;
        let response = make_request(app(state), Method::GET, "/metrics", None, String::new()).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
