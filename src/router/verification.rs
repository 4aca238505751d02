//! Identity verification documents.

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::router::{Form, UPLOAD_LIMIT, invalid};
use crate::session::Session;
use crate::verification::{self, DocumentType, VerificationDocument};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(status))
        .route(
            "/{document_type}",
            put(upload).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
        .route("/submit", post(submit))
}

#[derive(Debug, Serialize)]
pub struct Status {
    documents: Vec<VerificationDocument>,
    missing: Vec<DocumentType>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submitted {
    submitted_at: DateTime<Utc>,
}

async fn status(State(state): State<AppState>, session: Session) -> Result<Json<Status>> {
    let backend = state.backend.scoped(&session);
    let documents = verification::documents(&backend, &session).await?;

    Ok(Json(Status {
        missing: verification::missing_documents(&documents),
        documents,
    }))
}

/// Upload one document from the `file` field.
async fn upload(
    State(state): State<AppState>,
    session: Session,
    Path(kind): Path<DocumentType>,
    multipart: Multipart,
) -> Result<Json<VerificationDocument>> {
    let form = Form::read(multipart).await?;
    let file = match <[_; 1]>::try_from(form.files) {
        Ok([file]) => file,
        Err(files) if files.is_empty() => return Err(invalid("file", "A file is required.")),
        Err(files) => return Err(ServerError::TooManyFiles { count: files.len() }),
    };
    let backend = state.backend.scoped(&session);

    let document = verification::upload(
        &backend,
        &state.config.storage.verification_documents,
        &session,
        kind,
        file,
    )
    .await?;

    Ok(Json(document))
}

async fn submit(State(state): State<AppState>, session: Session) -> Result<Json<Submitted>> {
    let backend = state.backend.scoped(&session);
    let submitted_at = verification::submit(&backend, &session).await?;

    Ok(Json(Submitted { submitted_at }))
}
