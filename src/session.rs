//! Signed-in user resolved per request.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header;
use axum::http::request::Parts;
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::backend::{AuthEvent, Backend};
use crate::error::ServerError;
use crate::outbox::{Outbox, SideEffect};

const BEARER: &str = "Bearer ";

/// Identity of the caller, threaded explicitly into every service requiring
/// a signed-in user.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user_id: String,
    pub email: Option<String>,
    pub access_token: String,
}

/// Token carried by the `Authorization` header, if any.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .map(|value| value.strip_prefix(BEARER).unwrap_or(value).trim())
        .filter(|token| !token.is_empty())
}

impl<S> FromRequestParts<S> for Session
where
    Backend: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ServerError::Unauthorized)?;
        let backend = Backend::from_ref(state);

        let user = backend
            .auth
            .current_user(token)
            .await?
            .ok_or(ServerError::Unauthorized)?;

        Ok(Session {
            user_id: user.id,
            email: user.email,
            access_token: token.to_owned(),
        })
    }
}

/// Record sign-ins and sign-outs as analytics events until the auth
/// provider goes away.
pub fn track_auth_events(
    mut events: broadcast::Receiver<AuthEvent>,
    outbox: Outbox,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (event, user_id) = match events.recv().await {
                Ok(AuthEvent::SignedIn { user_id }) => ("signed_in", Some(user_id)),
                Ok(AuthEvent::SignedOut) => ("signed_out", None),
                Ok(AuthEvent::PasswordRecovery { user_id }) => {
                    ("password_recovery", Some(user_id))
                },
                Ok(AuthEvent::UserUpdated { user_id }) => ("user_updated", Some(user_id)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "auth events skipped");
                    continue;
                },
                Err(RecvError::Closed) => break,
            };

            outbox.push(SideEffect::Analytics {
                event: event.to_owned(),
                user_id,
                properties: json!({}),
            });
        }
    })
}
