//! Batch image upload.

use std::sync::Arc;

use futures::future::join_all;
use image_processor::validation;
use serde::Serialize;
use sha1::{Digest, Sha1};

use crate::backend::Storage;
use crate::error::{Result, ServerError};

/// Largest number of files accepted in one batch.
pub const MAX_BATCH: usize = 7;

/// A file received from a multipart form.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Where an image ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredImage {
    pub path: String,
    pub url: String,
}

/// Check every file before anything is sent to storage.
pub fn validate_batch(files: &[FileUpload]) -> Result<()> {
    if files.len() > MAX_BATCH {
        return Err(ServerError::TooManyFiles { count: files.len() });
    }

    for file in files {
        validation::validate(&file.bytes, &file.content_type)?;
    }

    Ok(())
}

/// Content-addressed storage path of processed bytes.
pub fn object_path(owner: &str, bytes: &[u8], extension: &str) -> String {
    let digest = Sha1::digest(bytes);
    format!("{owner}/{}.{extension}", hex::encode(digest))
}

/// Normalize then store one image.
pub async fn upload_one(
    storage: &dyn Storage,
    bucket: &str,
    owner: &str,
    label: &str,
    file: FileUpload,
) -> Result<StoredImage> {
    let label = label.to_owned();
    let processed = tokio::task::spawn_blocking(move || {
        image_processor::normalize(&file.bytes, &file.content_type, &label)
    })
    .await
    .map_err(|err| ServerError::Internal {
        details: "image processing task failed".into(),
        source: Some(Box::new(err)),
    })??;

    let path = object_path(owner, &processed.buffer, processed.kind.extension());
    let path = storage
        .upload(bucket, &path, processed.buffer, processed.kind.mime())
        .await?;
    metrics::counter!("images_processed_total").increment(1);

    Ok(StoredImage {
        url: storage.public_url(bucket, &path),
        path,
    })
}

/// Validate every file, then normalize and upload them concurrently.
///
/// Every upload runs to completion even when another one fails; the batch
/// then fails with the first error and stored files are kept.
pub async fn upload_batch(
    storage: Arc<dyn Storage>,
    bucket: &str,
    owner: &str,
    label: &str,
    files: Vec<FileUpload>,
) -> Result<Vec<StoredImage>> {
    validate_batch(&files)?;

    let uploads = files
        .into_iter()
        .map(|file| upload_one(storage.as_ref(), bucket, owner, label, file));
    let results = join_all(uploads).await;

    let failed = results.iter().filter(|result| result.is_err()).count();
    if failed > 0 {
        tracing::warn!(
            owner,
            bucket,
            failed,
            total = results.len(),
            "batch upload partially failed"
        );
    }

    results.into_iter().collect()
}
