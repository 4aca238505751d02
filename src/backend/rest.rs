//! HTTP adapter for a PostgREST, GoTrue and Storage compatible backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use super::{
    Auth, AuthEvent, AuthSession, AuthUser, BackendError, Filter, OtpKind,
    Procedures, Query, Result, Row, Storage, Tables,
};

const EVENTS_CAPACITY: usize = 64;

/// Client for the hosted backend.
///
/// Unscoped clients authenticate with the anonymous key only; [`scoped`]
/// ones forward the user access token so row-level security applies.
///
/// [`scoped`]: Tables::scoped
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    anon_key: String,
    bearer: Option<String>,
    events: broadcast::Sender<AuthEvent>,
}

impl RestClient {
    /// Create a client for the backend at `base_url`.
    pub fn new(
        base_url: &str,
        anon_key: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vitrine/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            anon_key: anon_key.to_owned(),
            bearer: None,
            events,
        })
    }

    fn with_bearer(&self, access_token: &str) -> Self {
        Self {
            bearer: Some(access_token.to_owned()),
            ..self.clone()
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let bearer = self.bearer.as_deref().unwrap_or(&self.anon_key);

        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    fn user_request(
        &self,
        method: reqwest::Method,
        path: &str,
        access_token: &str,
    ) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
    }

    fn notify(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }
}

/// Turn non-2xx answers into [`BackendError::Status`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or(body);

    Err(BackendError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Error payloads differ between services.
#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.message
            .or(self.msg)
            .or(self.error_description)
            .or(self.error)
    }
}

fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters.iter().map(Filter::to_param).collect()
}

#[async_trait]
impl Tables for RestClient {
    async fn select(&self, query: &Query) -> Result<Vec<Row>> {
        let response = self
            .request(reqwest::Method::GET, &format!("/rest/v1/{}", query.table))
            .query(&query.to_params())
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        let response = self
            .request(reqwest::Method::POST, &format!("/rest/v1/{table}"))
            .header("Prefer", "return=representation")
            .json(&rows)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>> {
        let response = self
            .request(reqwest::Method::PATCH, &format!("/rest/v1/{table}"))
            .header("Prefer", "return=representation")
            .query(&filter_params(filters))
            .json(&patch)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    async fn upsert(
        &self,
        table: &str,
        row: Row,
        on_conflict: &[&str],
    ) -> Result<Vec<Row>> {
        let response = self
            .request(reqwest::Method::POST, &format!("/rest/v1/{table}"))
            .header(
                "Prefer",
                "return=representation,resolution=merge-duplicates",
            )
            .query(&[("on_conflict", on_conflict.join(","))])
            .json(&[row])
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/rest/v1/{table}"))
            .header("Prefer", "return=representation")
            .query(&filter_params(filters))
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    fn scoped(&self, access_token: &str) -> Arc<dyn Tables> {
        Arc::new(self.with_bearer(access_token))
    }
}

#[derive(Deserialize)]
struct StoredObject {
    name: String,
}

#[async_trait]
impl Storage for RestClient {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/storage/v1/object/{bucket}/{path}"),
            )
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;
        check(response).await?;

        Ok(path.to_owned())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{path}", self.base_url)
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let (folder, _) = prefix.rsplit_once('/').unwrap_or(("", prefix));
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/storage/v1/object/list/{bucket}"),
            )
            .json(&json!({ "prefix": folder, "limit": 1000 }))
            .send()
            .await?;

        let objects: Vec<StoredObject> = check(response).await?.json().await?;
        Ok(objects
            .into_iter()
            .map(|object| {
                if folder.is_empty() {
                    object.name
                } else {
                    format!("{folder}/{}", object.name)
                }
            })
            .filter(|path| path.starts_with(prefix))
            .collect())
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }

        let response = self
            .request(reqwest::Method::DELETE, &format!("/storage/v1/object/{bucket}"))
            .json(&json!({ "prefixes": paths }))
            .send()
            .await?;
        check(response).await?;

        Ok(())
    }

    fn scoped(&self, access_token: &str) -> Arc<dyn Storage> {
        Arc::new(self.with_bearer(access_token))
    }
}

#[async_trait]
impl Auth for RestClient {
    async fn current_user(&self, access_token: &str) -> Result<Option<AuthUser>> {
        let response = self
            .user_request(reqwest::Method::GET, "/auth/v1/user", access_token)
            .send()
            .await?;

        match check(response).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(BackendError::Status { status: 401 | 403, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let response = self
            .request(reqwest::Method::POST, "/auth/v1/token")
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        let session: AuthSession = match check(response).await {
            Ok(response) => response.json().await?,
            Err(BackendError::Status { status: 400, .. }) => {
                return Err(BackendError::InvalidCredentials);
            },
            Err(err) => return Err(err),
        };

        self.notify(AuthEvent::SignedIn {
            user_id: session.user.id.clone(),
        });
        Ok(session)
    }

    async fn sign_out(&self, access_token: &str) -> Result<()> {
        let response = self
            .user_request(reqwest::Method::POST, "/auth/v1/logout", access_token)
            .send()
            .await?;
        check(response).await?;

        self.notify(AuthEvent::SignedOut);
        Ok(())
    }

    async fn update_password(
        &self,
        access_token: &str,
        password: &str,
    ) -> Result<AuthUser> {
        let response = self
            .user_request(reqwest::Method::PUT, "/auth/v1/user", access_token)
            .json(&json!({ "password": password }))
            .send()
            .await?;
        let user: AuthUser = check(response).await?.json().await?;

        self.notify(AuthEvent::UserUpdated {
            user_id: user.id.clone(),
        });
        Ok(user)
    }

    async fn update_email(&self, access_token: &str, email: &str) -> Result<AuthUser> {
        let response = self
            .user_request(reqwest::Method::PUT, "/auth/v1/user", access_token)
            .json(&json!({ "email": email }))
            .send()
            .await?;
        let user: AuthUser = check(response).await?.json().await?;

        self.notify(AuthEvent::UserUpdated {
            user_id: user.id.clone(),
        });
        Ok(user)
    }

    async fn verify_otp(
        &self,
        email: &str,
        token: &str,
        kind: OtpKind,
    ) -> Result<AuthSession> {
        let response = self
            .request(reqwest::Method::POST, "/auth/v1/verify")
            .json(&json!({ "email": email, "token": token, "type": kind }))
            .send()
            .await?;

        let session: AuthSession = match check(response).await {
            Ok(response) => response.json().await?,
            Err(BackendError::Status { status: 400 | 401 | 403, .. }) => {
                return Err(BackendError::InvalidCredentials);
            },
            Err(err) => return Err(err),
        };

        self.notify(match kind {
            OtpKind::Recovery => AuthEvent::PasswordRecovery {
                user_id: session.user.id.clone(),
            },
            _ => AuthEvent::SignedIn {
                user_id: session.user.id.clone(),
            },
        });
        Ok(session)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl Procedures for RestClient {
    async fn invoke(&self, name: &str, args: Value) -> Result<Value> {
        let response = self
            .request(reqwest::Method::POST, &format!("/rest/v1/rpc/{name}"))
            .json(&args)
            .send()
            .await?;

        let response = check(response).await?;
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_slice(&body)?)
    }

    fn scoped(&self, access_token: &str) -> Arc<dyn Procedures> {
        Arc::new(self.with_bearer(access_token))
    }
}
