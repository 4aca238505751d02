//! Profile settings of the signed-in user.

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::AppState;
use crate::error::Result;
use crate::profile::{self, ProfileSettings, ProfileUpdate};
use crate::router::{Form, UPLOAD_LIMIT};
use crate::session::Session;
use crate::upload::StoredImage;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_settings).patch(update_settings))
        .route(
            "/images",
            post(upload_images).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
}

async fn get_settings(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<ProfileSettings>> {
    let backend = state.backend.scoped(&session);
    Ok(Json(profile::get(&backend, &session).await?))
}

/// Apply form updates in order. Validation runs on the resulting settings.
async fn update_settings(
    State(state): State<AppState>,
    session: Session,
    Json(updates): Json<Vec<ProfileUpdate>>,
) -> Result<Json<ProfileSettings>> {
    let backend = state.backend.scoped(&session);
    Ok(Json(profile::update(&backend, &session, updates).await?))
}

async fn upload_images(
    State(state): State<AppState>,
    session: Session,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Vec<StoredImage>>)> {
    let form = Form::read(multipart).await?;
    let backend = state.backend.scoped(&session);

    let stored = profile::upload_images(
        &backend,
        &state.config.storage.profile_images,
        &state.config.watermark.label,
        &session,
        form.files,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(stored)))
}
