//! Listing search and city pages.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::AppState;
use crate::error::Result;
use crate::filters::SearchFilters;
use crate::outbox::SideEffect;
use crate::ranking::locality::LocalListing;
use crate::router::Valid;
use crate::search::{self, SearchResults};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/search", post(search_handler))
        .route("/local", get(local_handler))
}

async fn search_handler(
    State(state): State<AppState>,
    Valid(filters): Valid<SearchFilters>,
) -> Result<Json<SearchResults>> {
    let results =
        search::search(state.backend.tables.as_ref(), &filters, &state.config.search).await?;

    state.outbox.push(SideEffect::Analytics {
        event: "search".into(),
        user_id: None,
        properties: json!({
            "location": filters.location,
            "category": filters.category,
            "results": results.listings.len(),
        }),
    });

    Ok(Json(results))
}

#[derive(Debug, Deserialize)]
pub struct LocalQuery {
    city: String,
}

async fn local_handler(
    State(state): State<AppState>,
    Query(query): Query<LocalQuery>,
) -> Result<Json<Vec<LocalListing>>> {
    let listings =
        search::local(state.backend.tables.as_ref(), &query.city, &state.config.search).await?;

    Ok(Json(listings))
}
