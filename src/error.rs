//! Error handler for vitrine.

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use image_processor::ImageError;
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::backend::BackendError;
use crate::verification::DocumentType;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error("{0}")]
    Image(#[from] ImageError),

    #[error("at most {max} files per upload, got {count}", max = crate::upload::MAX_BATCH)]
    TooManyFiles { count: usize },

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("error parsing form data: {0}")]
    Multipart(#[from] MultipartError),

    #[error("backend request failed: {0}")]
    Backend(#[from] BackendError),

    #[error("verification documents missing")]
    MissingDocuments(Vec<DocumentType>),

    #[error("resource not found")]
    NotFound,

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("invalid 'Authorization' header")]
    Unauthorized,
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// One error per missing document.
    pub fn missing(mut self, documents: &[DocumentType]) -> Self {
        self.errors = Some(
            documents
                .iter()
                .map(|document| FieldError {
                    field: document.as_str().to_owned(),
                    message: "Document is missing.".to_owned(),
                })
                .collect(),
        );
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue
                    .message
                    .as_deref()
                    .map_or_else(|| issue.to_string(), str::to_owned),
            })
        })
        .collect()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => {
                response.errors(validation_errors)
            },

            ServerError::Image(_) | ServerError::TooManyFiles { .. } => {
                response.title("Invalid upload.")
            },

            ServerError::Multipart(err) => response
                .title("Server error during data parsing.")
                .details(&err.body_text()),

            ServerError::Backend(BackendError::InvalidCredentials) => response
                .title("Invalid credentials.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::Backend(err) => {
                tracing::error!(error = %err, "backend call failed");

                response
                    .title("Upstream service failed.")
                    .details(&match err {
                        BackendError::Status { message, .. } => message.clone(),
                        _ => "Backend is unreachable.".to_owned(),
                    })
                    .status(StatusCode::BAD_GATEWAY)
            },

            ServerError::MissingDocuments(documents) => response
                .title("Verification documents are missing.")
                .missing(documents)
                .status(StatusCode::UNPROCESSABLE_ENTITY),

            ServerError::NotFound => response
                .title("Resource not found.")
                .status(StatusCode::NOT_FOUND),

            ServerError::Unauthorized => response
                .title("Missing or invalid 'Authorization' header.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");

                ResponseError::default()
            },

            ServerError::Axum(_) => response,
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
