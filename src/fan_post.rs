//! Fan posts: subscription content published by listing owners.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use validator::{Validate, ValidationError};

use crate::backend::{
    Backend, Filter, Query, Tables, first_row, from_rows, to_row,
};
use crate::error::{Result, ServerError};
use crate::outbox::{Outbox, SideEffect};
use crate::session::Session;
use crate::upload::{self, FileUpload};

pub const TABLE: &str = "fan_posts";
pub const LIKES_TABLE: &str = "fan_post_likes";
pub const COMMENTS_TABLE: &str = "fan_post_comments";

/// Comment under a fan post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanPost {
    pub id: String,
    pub author_id: String,
    #[serde(default, deserialize_with = "crate::listing::nullable")]
    pub body: String,
    pub theme: Option<String>,
    #[serde(default, deserialize_with = "crate::listing::nullable")]
    pub is_premium: bool,
    /// Price in credits.
    pub unlock_price: Option<u32>,
    #[serde(default, deserialize_with = "crate::listing::nullable")]
    pub likes_count: u32,
    #[serde(default, deserialize_with = "crate::listing::nullable")]
    pub comments_count: u32,
    #[serde(default, deserialize_with = "crate::listing::nullable")]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    pub created_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Post as written by its author.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_price"))]
pub struct NewFanPost {
    #[validate(length(min = 1, max = 2000, message = "Post must be 1 to 2000 characters long."))]
    pub body: String,
    #[validate(length(max = 50, message = "Theme must be at most 50 characters long."))]
    pub theme: Option<String>,
    #[serde(default)]
    pub is_premium: bool,
    #[validate(range(min = 1, max = 10000, message = "Price must be between 1 and 10000 credits."))]
    pub unlock_price: Option<u32>,
}

fn validate_price(post: &NewFanPost) -> std::result::Result<(), ValidationError> {
    if post.is_premium && post.unlock_price.is_none() {
        return Err(ValidationError::new("price")
            .with_message("Premium posts need an unlock price.".into()));
    }
    Ok(())
}

/// Comment as written by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewComment {
    #[validate(length(min = 1, max = 500, message = "Comment must be 1 to 500 characters long."))]
    pub body: String,
}

/// Report against a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Report {
    #[validate(length(min = 3, max = 500, message = "Reason must be 3 to 500 characters long."))]
    pub reason: String,
}

/// Page of the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedQuery {
    pub author_id: Option<String>,
    #[validate(range(max = 10_000, message = "Page must not exceed 10000."))]
    pub page: usize,
    #[validate(range(min = 1, max = 50, message = "Page size must be between 1 and 50."))]
    pub per_page: usize,
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self {
            author_id: None,
            page: 0,
            per_page: 20,
        }
    }
}

/// Like state of a post after a toggle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LikeState {
    pub liked: bool,
    pub likes: u32,
}

/// Newest active posts, with their comments.
pub async fn feed(backend: &Backend, query: &FeedQuery) -> Result<Vec<FanPost>> {
    let mut select = Query::table(TABLE)
        .filter(Filter::IsNull("deleted_at".into()))
        .order("created_at", false)
        .range(query.page.saturating_mul(query.per_page), query.per_page);
    if let Some(author_id) = &query.author_id {
        select = select.filter(Filter::eq("author_id", author_id.as_str()));
    }

    let mut posts: Vec<FanPost> = from_rows(backend.tables.select(&select).await?)?;
    if posts.is_empty() {
        return Ok(posts);
    }

    let ids: Vec<&str> = posts.iter().map(|post| post.id.as_str()).collect();
    let comments = Query::table(COMMENTS_TABLE)
        .filter(Filter::is_in("post_id", ids))
        .order("created_at", true);
    let comments: Vec<Comment> = from_rows(backend.tables.select(&comments).await?)?;

    let mut by_post: HashMap<String, Vec<Comment>> = HashMap::new();
    for comment in comments {
        by_post.entry(comment.post_id.clone()).or_default().push(comment);
    }
    for post in &mut posts {
        post.comments = by_post.remove(&post.id).unwrap_or_default();
    }

    Ok(posts)
}

/// Active post by id.
async fn find(tables: &dyn Tables, post_id: &str) -> Result<FanPost> {
    let query = Query::table(TABLE)
        .filter(Filter::eq("id", post_id))
        .filter(Filter::IsNull("deleted_at".into()));

    first_row(tables.select(&query).await?)?.ok_or(ServerError::NotFound)
}

/// Publish a post with its media.
///
/// Media are validated before anything is written. When an upload fails
/// after the post row exists, the row is deleted again.
pub async fn create(
    backend: &Backend,
    session: &Session,
    bucket: &str,
    label: &str,
    post: NewFanPost,
    media: Vec<FileUpload>,
) -> Result<FanPost> {
    upload::validate_batch(&media)?;

    let row = to_row(&json!({
        "author_id": session.user_id,
        "body": post.body,
        "theme": post.theme,
        "is_premium": post.is_premium,
        "unlock_price": post.unlock_price,
        "likes_count": 0,
        "comments_count": 0,
        "media_urls": [],
        "deleted_at": null,
    }))?;
    let created: FanPost = first_row(backend.tables.insert(TABLE, vec![row]).await?)?
        .ok_or_else(|| ServerError::Internal {
            details: "insert returned no row".into(),
            source: None,
        })?;

    if media.is_empty() {
        return Ok(created);
    }

    let stored = match upload::upload_batch(
        backend.storage.clone(),
        bucket,
        &session.user_id,
        label,
        media,
    )
    .await
    {
        Ok(stored) => stored,
        Err(err) => {
            discard(backend.tables.as_ref(), &created.id).await;
            return Err(err);
        },
    };

    let urls: Vec<String> = stored.into_iter().map(|image| image.url).collect();
    let patch = to_row(&json!({ "media_urls": urls }))?;
    let updated = backend
        .tables
        .update(TABLE, &[Filter::eq("id", created.id.as_str())], patch)
        .await?;

    Ok(first_row(updated)?.unwrap_or(FanPost {
        media_urls: urls,
        ..created
    }))
}

/// Best-effort removal of a post whose media could not be stored.
async fn discard(tables: &dyn Tables, post_id: &str) {
    match tables.delete(TABLE, &[Filter::eq("id", post_id)]).await {
        Ok(_) => tracing::info!(post_id, "discarded post after media failure"),
        Err(err) => tracing::error!(
            post_id,
            error = %err,
            "orphaned post left after media failure"
        ),
    }
}

/// Like the post, or remove the like when already there.
pub async fn toggle_like(
    backend: &Backend,
    session: &Session,
    post_id: &str,
) -> Result<LikeState> {
    find(backend.tables.as_ref(), post_id).await?;

    let mine = [
        Filter::eq("post_id", post_id),
        Filter::eq("user_id", session.user_id.as_str()),
    ];
    let removed = backend.tables.delete(LIKES_TABLE, &mine).await?;
    let liked = removed.is_empty();
    if liked {
        let row = to_row(&json!({ "post_id": post_id, "user_id": session.user_id }))?;
        backend.tables.insert(LIKES_TABLE, vec![row]).await?;
    }

    let likes = recount(backend.tables.as_ref(), LIKES_TABLE, post_id, "likes_count").await?;
    Ok(LikeState { liked, likes })
}

/// Recompute a counter column from its source table.
async fn recount(
    tables: &dyn Tables,
    source: &str,
    post_id: &str,
    column: &str,
) -> Result<u32> {
    let query = Query::table(source)
        .columns("post_id")
        .filter(Filter::eq("post_id", post_id));
    let count = u32::try_from(tables.select(&query).await?.len()).unwrap_or(u32::MAX);

    let mut patch = serde_json::Map::new();
    patch.insert(column.to_owned(), json!(count));
    tables
        .update(TABLE, &[Filter::eq("id", post_id)], patch)
        .await?;

    Ok(count)
}

/// Comment on a post. The comment is mirrored to moderation in the
/// background.
pub async fn comment(
    backend: &Backend,
    outbox: &Outbox,
    session: &Session,
    post_id: &str,
    comment: NewComment,
) -> Result<Comment> {
    find(backend.tables.as_ref(), post_id).await?;

    let row = to_row(&json!({
        "post_id": post_id,
        "author_id": session.user_id,
        "body": comment.body,
    }))?;
    let created: Comment = first_row(backend.tables.insert(COMMENTS_TABLE, vec![row]).await?)?
        .ok_or_else(|| ServerError::Internal {
            details: "insert returned no row".into(),
            source: None,
        })?;

    recount(backend.tables.as_ref(), COMMENTS_TABLE, post_id, "comments_count").await?;

    outbox.push(SideEffect::MirrorComment {
        comment_id: created.id.clone(),
        post_id: created.post_id.clone(),
        author_id: created.author_id.clone(),
        body: created.body.clone(),
        access_token: session.access_token.clone(),
    });

    Ok(created)
}

/// Unlock premium content with credits.
pub async fn unlock(backend: &Backend, session: &Session, post_id: &str) -> Result<Value> {
    let post = find(backend.tables.as_ref(), post_id).await?;
    if !post.is_premium {
        return Ok(json!({ "unlocked": true, "charged": 0 }));
    }

    Ok(backend
        .procedures
        .invoke(
            "unlock_fan_post",
            json!({ "post_id": post_id, "user_id": session.user_id }),
        )
        .await?)
}

/// Flag a post for moderation.
pub async fn report(
    backend: &Backend,
    session: &Session,
    post_id: &str,
    report: Report,
) -> Result<Value> {
    find(backend.tables.as_ref(), post_id).await?;

    Ok(backend
        .procedures
        .invoke(
            "report_content",
            json!({
                "content_type": "fan_post",
                "content_id": post_id,
                "reporter_id": session.user_id,
                "reason": report.reason,
            }),
        )
        .await?)
}

/// Aggregate earnings of the signed-in creator.
pub async fn earnings(backend: &Backend, session: &Session) -> Result<Value> {
    Ok(backend
        .procedures
        .invoke("get_creator_earnings", json!({ "creator_id": session.user_id }))
        .await?)
}

/// Soft delete a post of the signed-in author.
pub async fn delete(backend: &Backend, session: &Session, post_id: &str) -> Result<()> {
    let patch = to_row(&json!({ "deleted_at": Utc::now() }))?;
    let deleted = backend
        .tables
        .update(
            TABLE,
            &[
                Filter::eq("id", post_id),
                Filter::eq("author_id", session.user_id.as_str()),
                Filter::IsNull("deleted_at".into()),
            ],
            patch,
        )
        .await?;

    if deleted.is_empty() {
        return Err(ServerError::NotFound);
    }

    Ok(())
}

/// Authors with at least one active post.
pub async fn active_authors(tables: &dyn Tables) -> Result<HashSet<String>> {
    let query = Query::table(TABLE)
        .columns("author_id")
        .filter(Filter::IsNull("deleted_at".into()));

    Ok(tables
        .select(&query)
        .await?
        .into_iter()
        .filter_map(|row| row.get("author_id")?.as_str().map(str::to_owned))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Storage};
    use crate::outbox::MODERATION_TABLE;
    use crate::upload::tests::file;

    const BUCKET: &str = "fan-media";

    fn session(user_id: &str) -> Session {
        Session {
            user_id: user_id.to_owned(),
            email: None,
            access_token: format!("{user_id}-token"),
        }
    }

    fn text(body: &str) -> NewFanPost {
        NewFanPost {
            body: body.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_post_validation() {
        assert!(text("hello").validate().is_ok());
        assert!(text("").validate().is_err());

        let premium = NewFanPost {
            is_premium: true,
            ..text("exclusive")
        };
        assert!(premium.validate().is_err());
        assert!(
            NewFanPost {
                unlock_price: Some(50),
                ..premium
            }
            .validate()
            .is_ok()
        );
    }

    #[tokio::test]
    async fn test_create_with_media() {
        let memory = MemoryBackend::default();
        let backend = Backend::memory(&memory);

        let post = create(
            &backend,
            &session("author"),
            BUCKET,
            "VITRINE",
            text("new set"),
            vec![file("a.png", 800, 600), file("b.png", 900, 700)],
        )
        .await
        .unwrap();

        assert_eq!(post.author_id, "author");
        assert_eq!(post.media_urls.len(), 2);
        assert_eq!(memory.storage.list(BUCKET, "author/").await.unwrap().len(), 2);
        assert_eq!(memory.tables.rows(TABLE).await[0]["media_urls"], json!(post.media_urls));
    }

    #[tokio::test]
    async fn test_media_failure_discards_post() {
        let memory = MemoryBackend::default();
        let backend = Backend::memory(&memory);
        memory.storage.reject_paths("author/").await;

        let result = create(
            &backend,
            &session("author"),
            BUCKET,
            "VITRINE",
            text("new set"),
            vec![file("a.png", 800, 600)],
        )
        .await;

        assert!(matches!(result, Err(ServerError::Backend(_))));
        assert!(memory.tables.rows(TABLE).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_media_writes_nothing() {
        let memory = MemoryBackend::default();
        let backend = Backend::memory(&memory);

        let result = create(
            &backend,
            &session("author"),
            BUCKET,
            "VITRINE",
            text("new set"),
            vec![file("a.png", 100, 100)],
        )
        .await;

        assert!(matches!(result, Err(ServerError::Image(_))));
        assert!(memory.tables.rows(TABLE).await.is_empty());
    }

    #[tokio::test]
    async fn test_like_toggle_and_comments() {
        let memory = MemoryBackend::default();
        let backend = Backend::memory(&memory);
        let (outbox, worker) = Outbox::spawn(backend.tables.clone(), 8);

        let post = create(&backend, &session("author"), BUCKET, "VITRINE", text("hi"), vec![])
            .await
            .unwrap();

        let state = toggle_like(&backend, &session("fan"), &post.id).await.unwrap();
        assert_eq!(state, LikeState { liked: true, likes: 1 });
        let state = toggle_like(&backend, &session("other"), &post.id).await.unwrap();
        assert_eq!(state.likes, 2);
        let state = toggle_like(&backend, &session("fan"), &post.id).await.unwrap();
        assert_eq!(state, LikeState { liked: false, likes: 1 });

        let created = comment(
            &backend,
            &outbox,
            &session("fan"),
            &post.id,
            NewComment { body: "lovely".into() },
        )
        .await
        .unwrap();

        let posts = feed(&backend, &FeedQuery::default()).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].likes_count, 1);
        assert_eq!(posts[0].comments_count, 1);
        assert_eq!(posts[0].comments, vec![created.clone()]);

        drop(outbox);
        worker.await.unwrap();
        let mirrored = memory.tables.rows(MODERATION_TABLE).await;
        assert_eq!(mirrored[0]["content_id"], json!(created.id));
    }

    #[tokio::test]
    async fn test_soft_delete() {
        let memory = MemoryBackend::default();
        let backend = Backend::memory(&memory);

        let post = create(&backend, &session("author"), BUCKET, "VITRINE", text("hi"), vec![])
            .await
            .unwrap();
        assert!(active_authors(backend.tables.as_ref()).await.unwrap().contains("author"));

        assert!(matches!(
            delete(&backend, &session("intruder"), &post.id).await,
            Err(ServerError::NotFound)
        ));
        delete(&backend, &session("author"), &post.id).await.unwrap();

        assert!(feed(&backend, &FeedQuery::default()).await.unwrap().is_empty());
        assert!(active_authors(backend.tables.as_ref()).await.unwrap().is_empty());
        assert!(matches!(
            toggle_like(&backend, &session("fan"), &post.id).await,
            Err(ServerError::NotFound)
        ));
        // the row itself is kept.
        assert_eq!(memory.tables.rows(TABLE).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unlock_and_earnings_call_procedures() {
        let memory = MemoryBackend::default();
        let backend = Backend::memory(&memory);
        memory
            .procedures
            .register("unlock_fan_post", |_| Ok(json!({ "unlocked": true, "charged": 50 })))
            .await;
        memory
            .procedures
            .register("get_creator_earnings", |_| Ok(json!({ "total": 120 })))
            .await;

        let premium = NewFanPost {
            is_premium: true,
            unlock_price: Some(50),
            ..text("exclusive")
        };
        let post = create(&backend, &session("author"), BUCKET, "VITRINE", premium, vec![])
            .await
            .unwrap();

        let unlocked = unlock(&backend, &session("fan"), &post.id).await.unwrap();
        assert_eq!(unlocked["charged"], 50);
        let earnings = earnings(&backend, &session("author")).await.unwrap();
        assert_eq!(earnings["total"], 120);

        let calls = memory.procedures.calls().await;
        assert_eq!(calls[0].0, "unlock_fan_post");
        assert_eq!(calls[0].1["user_id"], "fan");
        assert_eq!(calls[1].1["creator_id"], "author");
    }

    #[tokio::test]
    async fn test_report_unknown_procedure_is_backend_error() {
        let memory = MemoryBackend::default();
        let backend = Backend::memory(&memory);
        let post = create(&backend, &session("author"), BUCKET, "VITRINE", text("hi"), vec![])
            .await
            .unwrap();

        let result = report(
            &backend,
            &session("fan"),
            &post.id,
            Report {
                reason: "spam".into(),
            },
        )
        .await;
        assert!(matches!(result, Err(ServerError::Backend(_))));
    }
}
