use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

/// Fixed page size for every post listing.
pub const PAGE_SIZE: i64 = 20;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Id,
    pub user_id: Id,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub source_id: Option<Id>,
    pub source_user_id: Option<Id>,
    pub attachments: Vec<String>,
    pub photo_ratio: f64,
    pub likes: i64,
    pub reposts: i64,
    /// Whether the viewer authored this post. Derived per read, never stored.
    #[sqlx(default)]
    pub own: bool,
}

impl Post {
    pub fn is_repost(&self) -> bool {
        self.source_id.is_some()
    }
}

/// Row to insert; the store assigns `id` and zeroes the counters.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub user_id: Id,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub source_id: Option<Id>,
    pub source_user_id: Option<Id>,
    pub attachments: Vec<String>,
    pub photo_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    pub user_id: Id,
    pub post_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Tag {
    pub id: Id,
    pub name: String,
}

/// Filters for the search listing. Empty vectors match everything.
#[derive(Debug, Clone, Default)]
pub struct PostQuery {
    pub tags: Vec<String>,
    pub keywords: Vec<String>,
}

/// Body of `POST /v0/posts`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePost {
    #[serde(default)]
    pub text: String,
    pub tags: Option<Vec<String>>,
    pub attachments: Option<Vec<String>>,
    pub photo_ratio: Option<f64>,
    pub source_id: Option<Id>,
    pub source_user_id: Option<Id>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PostEnvelope {
    pub own: bool,
    pub post: Post,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserPostsEnvelope {
    pub own: bool,
    pub posts: Vec<Post>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SearchEnvelope {
    pub posts: Vec<Post>,
}
