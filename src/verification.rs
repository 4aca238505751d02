//! Identity verification documents.
//!
//! A user uploads one file per [`DocumentType`]; uploading again replaces
//! the file and resets its review. Submission is accepted once every type is
//! on file, whatever the review state of each document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::backend::{Backend, Filter, Query, first_row, from_rows, to_row};
use crate::error::{Result, ServerError};
use crate::listing;
use crate::session::Session;
use crate::upload::FileUpload;

pub const TABLE: &str = "verification_documents";

/// Kind of identity proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    IdCard,
    SelfieWithId,
    NewspaperPhoto,
    UpperBodySelfie,
}

impl DocumentType {
    /// Every document required for submission.
    pub const ALL: [DocumentType; 4] = [
        DocumentType::IdCard,
        DocumentType::SelfieWithId,
        DocumentType::NewspaperPhoto,
        DocumentType::UpperBodySelfie,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::IdCard => "id_card",
            DocumentType::SelfieWithId => "selfie_with_id",
            DocumentType::NewspaperPhoto => "newspaper_photo",
            DocumentType::UpperBodySelfie => "upper_body_selfie",
        }
    }
}

/// Review state of a document.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationDocument {
    pub id: String,
    pub user_id: String,
    pub document_type: DocumentType,
    /// Storage path, `None` until uploaded.
    pub file_path: Option<String>,
    #[serde(default)]
    pub status: ApprovalStatus,
    pub rejection_reason: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Document types not on file yet, in canonical order.
pub fn missing_documents(documents: &[VerificationDocument]) -> Vec<DocumentType> {
    DocumentType::ALL
        .into_iter()
        .filter(|kind| {
            !documents
                .iter()
                .any(|doc| doc.document_type == *kind && doc.file_path.is_some())
        })
        .collect()
}

/// Documents of the signed-in user.
pub async fn documents(
    backend: &Backend,
    session: &Session,
) -> Result<Vec<VerificationDocument>> {
    let query = Query::table(TABLE)
        .filter(Filter::eq("user_id", session.user_id.as_str()))
        .order("document_type", true);

    Ok(from_rows(backend.tables.select(&query).await?)?)
}

/// Store `file` as the document of type `kind`, replacing any previous one.
///
/// The file is validated but kept untouched: documents live in a private
/// bucket and reviewers need the original.
pub async fn upload(
    backend: &Backend,
    bucket: &str,
    session: &Session,
    kind: DocumentType,
    file: FileUpload,
) -> Result<VerificationDocument> {
    let upload = image_processor::validation::validate(&file.bytes, &file.content_type)?;

    let path = format!(
        "{}/{}.{}",
        session.user_id,
        kind.as_str(),
        upload.kind.extension()
    );
    let path = backend
        .storage
        .upload(bucket, &path, file.bytes, upload.kind.mime())
        .await?;

    let row = to_row(&json!({
        "user_id": session.user_id,
        "document_type": kind,
        "file_path": path,
        "status": ApprovalStatus::Pending,
        "rejection_reason": Value::Null,
        "uploaded_at": Utc::now(),
    }))?;
    let rows = backend
        .tables
        .upsert(TABLE, row, &["user_id", "document_type"])
        .await?;

    tracing::info!(
        user_id = %session.user_id,
        document = kind.as_str(),
        "verification document uploaded"
    );

    first_row(rows)?.ok_or_else(|| ServerError::Internal {
        details: "upsert returned no row".into(),
        source: None,
    })
}

/// Submit every document for review and stamp the profile.
pub async fn submit(backend: &Backend, session: &Session) -> Result<DateTime<Utc>> {
    let documents = documents(backend, session).await?;

    let missing = missing_documents(&documents);
    if !missing.is_empty() {
        return Err(ServerError::MissingDocuments(missing));
    }

    let submitted_at = Utc::now();
    let patch = to_row(&json!({ "verification_submitted_at": submitted_at }))?;
    let updated = backend
        .tables
        .update(
            listing::TABLE,
            &[Filter::eq("id", session.user_id.as_str())],
            patch,
        )
        .await?;

    if updated.is_empty() {
        return Err(ServerError::NotFound);
    }

    Ok(submitted_at)
}
