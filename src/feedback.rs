//! Client for the recommendation engine's feedback and item APIs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::Id;

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("recommender unreachable: {0}")]
    Transport(String),
    #[error("recommender returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Like,
    Repost,
}

impl FeedbackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackKind::Like => "like",
            FeedbackKind::Repost => "repost",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FeedbackEvent {
    pub feedback_type: FeedbackKind,
    pub user_id: String,
    pub item_id: String,
    pub timestamp: String,
}

impl FeedbackEvent {
    pub fn new(kind: FeedbackKind, user_id: Id, post_id: Id, at: DateTime<Utc>) -> Self {
        Self {
            feedback_type: kind,
            user_id: user_id.to_string(),
            item_id: post_id.to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Item {
    pub item_id: String,
    pub is_hidden: bool,
    pub categories: Vec<String>,
    pub labels: Vec<String>,
    pub timestamp: String,
}

impl Item {
    pub fn visible(post_id: Id, labels: Vec<String>, at: DateTime<Utc>) -> Self {
        Self {
            item_id: post_id.to_string(),
            is_hidden: false,
            categories: Vec::new(),
            labels,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    pub fn hidden(post_id: Id, at: DateTime<Utc>) -> Self {
        Self { is_hidden: true, ..Self::visible(post_id, Vec::new(), at) }
    }
}

/// Calls are synchronous from the caller's side; an error fails the enclosing unit of work.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn add_feedback(&self, events: &[FeedbackEvent]) -> Result<(), NotifierError>;
    async fn remove_feedback(&self, event: &FeedbackEvent) -> Result<(), NotifierError>;
    async fn upsert_item(&self, item: &Item) -> Result<(), NotifierError>;
}

/// Gorse-compatible REST client.
#[derive(Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpNotifier {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifierError::Transport(e.to_string()))?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), api_key })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let rb = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => rb.header("X-API-Key", key),
            None => rb,
        }
    }

    async fn send(&self, rb: reqwest::RequestBuilder) -> Result<(), NotifierError> {
        let resp = rb.send().await.map_err(|e| NotifierError::Transport(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), %body, "recommender rejected request");
        Err(NotifierError::Status { status: status.as_u16(), body })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn add_feedback(&self, events: &[FeedbackEvent]) -> Result<(), NotifierError> {
        self.send(self.request(reqwest::Method::POST, "/api/feedback").json(events)).await
    }

    async fn remove_feedback(&self, event: &FeedbackEvent) -> Result<(), NotifierError> {
        let path = format!(
            "/api/feedback/{}/{}/{}",
            event.feedback_type.as_str(),
            event.user_id,
            event.item_id
        );
        self.send(self.request(reqwest::Method::DELETE, &path)).await
    }

    async fn upsert_item(&self, item: &Item) -> Result<(), NotifierError> {
        self.send(self.request(reqwest::Method::POST, "/api/item").json(item)).await
    }
}

/// Used when no recommender is configured.
#[derive(Clone, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn add_feedback(&self, events: &[FeedbackEvent]) -> Result<(), NotifierError> {
        debug!(count = events.len(), "recommender disabled; dropping feedback");
        Ok(())
    }

    async fn remove_feedback(&self, event: &FeedbackEvent) -> Result<(), NotifierError> {
        debug!(item = %event.item_id, "recommender disabled; dropping feedback removal");
        Ok(())
    }

    async fn upsert_item(&self, item: &Item) -> Result<(), NotifierError> {
        debug!(item = %item.item_id, hidden = item.is_hidden, "recommender disabled; dropping item");
        Ok(())
    }
}
