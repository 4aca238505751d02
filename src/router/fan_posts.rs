//! Fan posts and creator earnings.

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::Value;
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::fan_post::{self, Comment, FanPost, FeedQuery, LikeState, NewComment, NewFanPost, Report};
use crate::router::{Form, UPLOAD_LIMIT, Valid, invalid};
use crate::session::Session;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(feed).post(create).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
        .route("/{id}", delete(soft_delete))
        .route("/{id}/like", post(like))
        .route("/{id}/comments", post(comment))
        .route("/{id}/unlock", post(unlock))
        .route("/{id}/report", post(report))
}

/// Read a post from its multipart form. Every file is media.
fn new_post(form: &Form) -> Result<NewFanPost> {
    let is_premium = match form.field("isPremium") {
        None | Some("false") => false,
        Some("true") => true,
        Some(_) => return Err(invalid("isPremium", "Expected true or false.")),
    };
    let unlock_price = form
        .field("unlockPrice")
        .map(str::parse::<u32>)
        .transpose()
        .map_err(|_| invalid("unlockPrice", "Price must be a whole number of credits."))?;

    let post = NewFanPost {
        body: form.field("body").unwrap_or_default().to_owned(),
        theme: form.field("theme").map(str::to_owned),
        is_premium,
        unlock_price,
    };
    post.validate()?;

    Ok(post)
}

async fn feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<FanPost>>> {
    query.validate()?;
    Ok(Json(fan_post::feed(&state.backend, &query).await?))
}

async fn create(
    State(state): State<AppState>,
    session: Session,
    multipart: Multipart,
) -> Result<(StatusCode, Json<FanPost>)> {
    let form = Form::read(multipart).await?;
    let post = new_post(&form)?;
    let backend = state.backend.scoped(&session);

    let post = fan_post::create(
        &backend,
        &session,
        &state.config.storage.fan_media,
        &state.config.watermark.label,
        post,
        form.files,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(post)))
}

async fn like(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
) -> Result<Json<LikeState>> {
    let backend = state.backend.scoped(&session);
    Ok(Json(fan_post::toggle_like(&backend, &session, &id).await?))
}

async fn comment(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
    Valid(body): Valid<NewComment>,
) -> Result<(StatusCode, Json<Comment>)> {
    let backend = state.backend.scoped(&session);
    let comment = fan_post::comment(&backend, &state.outbox, &session, &id, body).await?;

    Ok((StatusCode::CREATED, Json(comment)))
}

async fn unlock(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let backend = state.backend.scoped(&session);
    Ok(Json(fan_post::unlock(&backend, &session, &id).await?))
}

async fn report(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
    Valid(body): Valid<Report>,
) -> Result<Json<Value>> {
    let backend = state.backend.scoped(&session);
    Ok(Json(fan_post::report(&backend, &session, &id, body).await?))
}

async fn soft_delete(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let backend = state.backend.scoped(&session);
    fan_post::delete(&backend, &session, &id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Aggregate earnings of the signed-in creator.
pub async fn earnings(State(state): State<AppState>, session: Session) -> Result<Json<Value>> {
    let backend = state.backend.scoped(&session);
    Ok(Json(fan_post::earnings(&backend, &session).await?))
}

#[cfg(test)]
mod tests {
    use crate::tests::{json, make_request, multipart, send_multipart, state};
    use crate::upload::tests::png;
    use crate::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_post_lifecycle() {
        let (state, _, token) = state().await;

        let form = multipart(
            &[("body", "New set is online"), ("theme", "summer")],
            &[("media", png(800, 600))],
        );
        let response = send_multipart(app(state.clone()), Method::POST, "/fan-posts", &token, form).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let post = json(response).await;
        let id = post["id"].as_str().unwrap().to_owned();
        assert_eq!(post["media_urls"].as_array().unwrap().len(), 1);

        let response = make_request(
            app(state.clone()),
            Method::POST,
            &format!("/fan-posts/{id}/like"),
            Some(&token),
            String::new(),
        )
        .await;
        assert_eq!(json(response).await, json!({ "liked": true, "likes": 1 }));

        let response = make_request(
            app(state.clone()),
            Method::POST,
            &format!("/fan-posts/{id}/comments"),
            Some(&token),
            json!({ "body": "first" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response =
            make_request(app(state.clone()), Method::GET, "/fan-posts?perPage=5", None, String::new()).await;
        let feed = json(response).await;
        assert_eq!(feed[0]["comments"][0]["body"], "first");
        assert_eq!(feed[0]["likes_count"], 1);

        let response = make_request(
            app(state.clone()),
            Method::DELETE,
            &format!("/fan-posts/{id}"),
            Some(&token),
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response =
            make_request(app(state), Method::GET, "/fan-posts", None, String::new()).await;
        assert_eq!(json(response).await, json!([]));
    }

    #[tokio::test]
    async fn test_premium_needs_price() {
        let (state, memory, token) = state().await;

        let form = multipart(&[("body", "exclusive"), ("isPremium", "true")], &[]);
        let response = send_multipart(app(state.clone()), Method::POST, "/fan-posts", &token, form).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let form = multipart(&[("body", "exclusive"), ("isPremium", "true"), ("unlockPrice", "many")], &[]);
        let response = send_multipart(app(state), Method::POST, "/fan-posts", &token, form).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["errors"][0]["field"], "unlockPrice");

        assert!(memory.tables.rows(fan_post::TABLE).await.is_empty());
    }

    #[tokio::test]
    async fn test_feed_rejects_huge_page() {
        let (state, _, _) = state().await;

        let response = make_request(
            app(state.clone()),
            Method::GET,
            "/fan-posts?page=18446744073709551615",
            None,
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["errors"][0]["field"], "page");

        let response =
            make_request(app(state), Method::GET, "/fan-posts?page=3", None, String::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_post() {
        let (state, _, token) = state().await;

        let response = make_request(
            app(state),
            Method::POST,
            "/fan-posts/missing/unlock",
            Some(&token),
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_earnings_forward_backend_errors() {
        let (state, memory, token) = state().await;

        let response =
            make_request(app(state.clone()), Method::GET, "/earnings", Some(&token), String::new()).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        memory
            .procedures
            .register("get_creator_earnings", |_| Ok(json!({ "total": 42 })))
            .await;
        let response = make_request(app(state), Method::GET, "/earnings", Some(&token), String::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["total"], 42);
    }
}
