//! Sign-in, sign-out and credential updates, delegated to the auth provider.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::backend::{AuthSession, AuthUser, OtpKind};
use crate::error::Result;
use crate::router::Valid;
use crate::session::Session;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Credentials {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(min = 1, max = 255, message = "Password is required."))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Verification {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(min = 6, max = 64, message = "Token is invalid."))]
    pub token: String,
    #[serde(rename = "type")]
    pub kind: OtpKind,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct NewPassword {
    #[validate(length(
        min = 8,
        max = 255,
        message = "Password must contain at least 8 characters."
    ))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct NewEmail {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
}

/// `/auth` routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/verify", post(verify))
}

/// `/account` routes.
pub fn account() -> Router<AppState> {
    Router::new()
        .route("/password", patch(update_password))
        .route("/email", patch(update_email))
}

async fn login(
    State(state): State<AppState>,
    Valid(body): Valid<Credentials>,
) -> Result<Json<AuthSession>> {
    let session = state
        .backend
        .auth
        .sign_in(&body.email.to_lowercase(), &body.password)
        .await?;

    Ok(Json(session))
}

async fn logout(State(state): State<AppState>, session: Session) -> Result<StatusCode> {
    state.backend.auth.sign_out(&session.access_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Exchange a one-time token, such as a recovery link, for a session.
async fn verify(
    State(state): State<AppState>,
    Valid(body): Valid<Verification>,
) -> Result<Json<AuthSession>> {
    let session = state
        .backend
        .auth
        .verify_otp(&body.email.to_lowercase(), &body.token, body.kind)
        .await?;

    Ok(Json(session))
}

async fn update_password(
    State(state): State<AppState>,
    session: Session,
    Valid(body): Valid<NewPassword>,
) -> Result<Json<AuthUser>> {
    let user = state
        .backend
        .auth
        .update_password(&session.access_token, &body.password)
        .await?;

    Ok(Json(user))
}

async fn update_email(
    State(state): State<AppState>,
    session: Session,
    Valid(body): Valid<NewEmail>,
) -> Result<Json<AuthUser>> {
    let user = state
        .backend
        .auth
        .update_email(&session.access_token, &body.email.to_lowercase())
        .await?;

    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use crate::tests::{json, make_request, state};
    use crate::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_login() {
        let (state, _, _) = state().await;

        let response = make_request(
            app(state.clone()),
            Method::POST,
            "/auth/login",
            None,
            json!({ "email": "Mila@example.com", "password": "correct horse battery" })
                .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["user"]["email"], "mila@example.com");

        let response = make_request(
            app(state),
            Method::POST,
            "/auth/login",
            None,
            json!({ "email": "mila@example.com", "password": "wrong" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_body() {
        let (state, _, _) = state().await;

        let response = make_request(
            app(state),
            Method::POST,
            "/auth/login",
            None,
            json!({ "email": "not an email", "password": "x" }).to_string(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json(response).await;
        assert_eq!(body["errors"][0]["field"], "email");
    }

    #[tokio::test]
    async fn test_recovery_then_new_password() {
        let (state, memory, _) = state().await;
        let otp = memory
            .auth
            .issue_otp("mila@example.com", backend::OtpKind::Recovery)
            .await;

        let response = make_request(
            app(state.clone()),
            Method::POST,
            "/auth/verify",
            None,
            json!({ "email": "mila@example.com", "token": otp, "type": "recovery" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let token = json(response).await["access_token"].as_str().unwrap().to_owned();

        let response = make_request(
            app(state.clone()),
            Method::PATCH,
            "/account/password",
            Some(&token),
            json!({ "password": "a brand new password" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        // the token is single use.
        let response = make_request(
            app(state),
            Method::POST,
            "/auth/verify",
            None,
            json!({ "email": "mila@example.com", "token": otp, "type": "recovery" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_requires_session() {
        let (state, _, token) = state().await;

        let response =
            make_request(app(state.clone()), Method::POST, "/auth/logout", None, String::new()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response =
            make_request(app(state.clone()), Method::POST, "/auth/logout", Some(&token), String::new())
                .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // the token no longer resolves.
        let response =
            make_request(app(state), Method::POST, "/auth/logout", Some(&token), String::new()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
