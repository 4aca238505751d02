//! HTTP API.

pub mod auth;
pub mod fan_posts;
pub mod listings;
pub mod profile;
pub mod status;
pub mod verification;

use std::collections::HashMap;

use axum::Json;
use axum::extract::{FromRequest, Multipart, Request};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::ServerError;
use crate::upload::{FileUpload, MAX_BATCH};

/// Largest accepted upload request.
pub const UPLOAD_LIMIT: usize =
    MAX_BATCH * image_processor::validation::MAX_FILE_SIZE + 1024 * 1024;

/// Validation error on a single field.
pub(crate) fn invalid(field: &'static str, message: &'static str) -> ServerError {
    let mut errors = ValidationErrors::new();
    errors.add(field, ValidationError::new("invalid").with_message(message.into()));
    ServerError::Validation(errors)
}

/// JSON body checked with [`Validate`] before reaching the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Multipart form split into text fields and files.
#[derive(Debug, Default)]
pub struct Form {
    pub fields: HashMap<String, String>,
    pub files: Vec<FileUpload>,
}

impl Form {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ServerError> {
        let mut form = Form::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_owned();

            match field.file_name().map(str::to_owned) {
                Some(file_name) => {
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_owned();
                    let bytes = field.bytes().await?.to_vec();

                    form.files.push(FileUpload {
                        file_name,
                        content_type,
                        bytes,
                    });
                },
                None => {
                    let value = field.text().await?;
                    form.fields.insert(name, value);
                },
            }
        }

        Ok(form)
    }

    /// Text field, blank counting as missing.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}
