//! Ports to the hosted backend.
//!
//! Every persistent concern (tables, object storage, authentication and
//! server-side functions) lives behind one of the traits below. Two adapters
//! exist: [`RestClient`] talks to a PostgREST/GoTrue/Storage compatible
//! backend over HTTP, [`MemoryBackend`] keeps everything in process and is
//! used for tests and local development.

mod memory;
mod query;
mod rest;

pub use memory::*;
pub use query::*;
pub use rest::*;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::session::Session;

/// One table row, as sent and received on the wire.
pub type Row = serde_json::Map<String, Value>;

pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors raised by backend adapters.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid backend payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("{0}")]
    Rejected(String),
}

/// Row-oriented table access.
#[async_trait]
pub trait Tables: Send + Sync {
    /// Fetch rows matching `query`.
    async fn select(&self, query: &Query) -> Result<Vec<Row>>;

    /// Insert rows and return them as stored.
    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>>;

    /// Merge `patch` into every row matching `filters`.
    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>>;

    /// Insert `row`, or merge it into the row sharing the values of
    /// `on_conflict` columns.
    async fn upsert(
        &self,
        table: &str,
        row: Row,
        on_conflict: &[&str],
    ) -> Result<Vec<Row>>;

    /// Delete rows matching `filters` and return them.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>>;

    /// Same tables, acting with the credentials of `access_token`.
    fn scoped(&self, access_token: &str) -> Arc<dyn Tables>;
}

/// Object storage.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store `bytes` at `path`, replacing any existing object.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String>;

    /// Public URL of an object.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Paths of objects starting with `prefix`.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// Remove objects.
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()>;

    /// Same storage, acting with the credentials of `access_token`.
    fn scoped(&self, access_token: &str) -> Arc<dyn Storage>;
}

/// Authentication provider.
#[async_trait]
pub trait Auth: Send + Sync {
    /// User owning `access_token`, if the token is still valid.
    async fn current_user(&self, access_token: &str) -> Result<Option<AuthUser>>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession>;

    async fn sign_out(&self, access_token: &str) -> Result<()>;

    async fn update_password(
        &self,
        access_token: &str,
        password: &str,
    ) -> Result<AuthUser>;

    async fn update_email(&self, access_token: &str, email: &str) -> Result<AuthUser>;

    /// Exchange a one-time token (recovery, sign-up confirmation...) for a
    /// session.
    async fn verify_otp(
        &self,
        email: &str,
        token: &str,
        kind: OtpKind,
    ) -> Result<AuthSession>;

    /// Subscribe to auth state changes. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Server-side functions.
#[async_trait]
pub trait Procedures: Send + Sync {
    async fn invoke(&self, name: &str, args: Value) -> Result<Value>;

    /// Same procedures, acting with the credentials of `access_token`.
    fn scoped(&self, access_token: &str) -> Arc<dyn Procedures>;
}

/// Authenticated user as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

/// Tokens issued after a successful sign-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub user: AuthUser,
}

/// Kind of one-time token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpKind {
    Recovery,
    Signup,
    EmailChange,
    Magiclink,
}

/// Auth state change.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn { user_id: String },
    SignedOut,
    PasswordRecovery { user_id: String },
    UserUpdated { user_id: String },
}

/// Handles on every backend port.
#[derive(Clone)]
pub struct Backend {
    pub tables: Arc<dyn Tables>,
    pub storage: Arc<dyn Storage>,
    pub auth: Arc<dyn Auth>,
    pub procedures: Arc<dyn Procedures>,
}

impl Backend {
    /// Backend reached over HTTP.
    pub fn rest(client: RestClient) -> Self {
        let client = Arc::new(client);

        Self {
            tables: client.clone(),
            storage: client.clone(),
            auth: client.clone(),
            procedures: client,
        }
    }

    /// Backend kept in memory.
    pub fn memory(memory: &MemoryBackend) -> Self {
        Self {
            tables: Arc::new(memory.tables.clone()),
            storage: Arc::new(memory.storage.clone()),
            auth: Arc::new(memory.auth.clone()),
            procedures: Arc::new(memory.procedures.clone()),
        }
    }

    /// Same backend acting on behalf of the user owning `session`.
    pub fn scoped(&self, session: &Session) -> Self {
        Self {
            tables: self.tables.scoped(&session.access_token),
            storage: self.storage.scoped(&session.access_token),
            auth: Arc::clone(&self.auth),
            procedures: self.procedures.scoped(&session.access_token),
        }
    }
}

/// Serialize `value` into a [`Row`].
pub fn to_row<T: Serialize>(value: &T) -> Result<Row> {
    match serde_json::to_value(value)? {
        Value::Object(row) => Ok(row),
        other => Err(BackendError::Rejected(format!(
            "expected an object, got {other}"
        ))),
    }
}

/// Deserialize rows into `T`.
pub fn from_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(Value::Object(row)).map_err(Into::into))
        .collect()
}

/// Deserialize the first row into `T`.
pub fn first_row<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Option<T>> {
    rows.into_iter()
        .next()
        .map(|row| serde_json::from_value(Value::Object(row)))
        .transpose()
        .map_err(Into::into)
}
