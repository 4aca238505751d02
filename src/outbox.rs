//! Best-effort side effects.
//!
//! Side effects are queued without blocking the caller and delivered at most
//! once by a background worker. A full queue drops the effect, a failed
//! delivery is only logged.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{self, Tables, to_row};

pub const MODERATION_TABLE: &str = "moderation_queue";
pub const ANALYTICS_TABLE: &str = "analytics_events";

/// Side effect nobody waits for.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Copy a fan post comment into the moderation queue, with the
    /// credentials of its author.
    MirrorComment {
        comment_id: String,
        post_id: String,
        author_id: String,
        body: String,
        access_token: String,
    },
    /// Record a product analytics event.
    Analytics {
        event: String,
        user_id: Option<String>,
        properties: Value,
    },
}

impl SideEffect {
    fn kind(&self) -> &'static str {
        match self {
            SideEffect::MirrorComment { .. } => "mirror_comment",
            SideEffect::Analytics { .. } => "analytics",
        }
    }
}

/// Sending half of the queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::Sender<SideEffect>,
}

impl Outbox {
    /// Start the delivery worker.
    ///
    /// The worker stops once every [`Outbox`] clone is dropped and the queue
    /// is drained.
    pub fn spawn(tables: Arc<dyn Tables>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<SideEffect>(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(effect) = receiver.recv().await {
                let kind = effect.kind();
                if let Err(err) = deliver(tables.as_ref(), effect).await {
                    tracing::warn!(kind, error = %err, "side effect delivery failed");
                }
            }
            tracing::debug!("outbox drained");
        });

        (Self { sender }, worker)
    }

    /// Queue `effect`. Returns `false` when it was dropped.
    pub fn push(&self, effect: SideEffect) -> bool {
        let kind = effect.kind();

        match self.sender.try_send(effect) {
            Ok(()) => true,
            Err(err) => {
                metrics::counter!("outbox_dropped_total", "kind" => kind).increment(1);
                tracing::warn!(kind, error = %err, "side effect dropped");
                false
            },
        }
    }
}

async fn deliver(tables: &dyn Tables, effect: SideEffect) -> backend::Result<()> {
    match effect {
        SideEffect::MirrorComment {
            comment_id,
            post_id,
            author_id,
            body,
            access_token,
        } => {
            let row = to_row(&json!({
                "content_type": "fan_post_comment",
                "content_id": comment_id,
                "post_id": post_id,
                "author_id": author_id,
                "body": body,
                "status": "pending",
            }))?;
            tables
                .scoped(&access_token)
                .insert(MODERATION_TABLE, vec![row])
                .await?;
        },
        SideEffect::Analytics {
            event,
            user_id,
            properties,
        } => {
            let row = to_row(&json!({
                "event": event,
                "user_id": user_id,
                "properties": properties,
            }))?;
            tables.insert(ANALYTICS_TABLE, vec![row]).await?;
        },
    }

    Ok(())
}
