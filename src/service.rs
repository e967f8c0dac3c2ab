use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::error::ServiceError;
use crate::feedback::{FeedbackEvent, FeedbackKind, Item, Notifier};
use crate::models::*;
use crate::repo::{RepoError, Session};
use crate::tx::{Flow, Halt, TxCoordinator, UnitResult};

pub const MAX_TEXT_CHARS: usize = 2000;
pub const MAX_TAGS: usize = 20;
pub const MAX_TAG_CHARS: usize = 64;
pub const MAX_ATTACHMENTS: usize = 10;

/// Validated create request.
#[derive(Debug, Clone)]
pub struct Draft {
    pub post: NewPost,
    pub tags: Vec<String>,
}

fn invalid(msg: &str) -> ServiceError {
    ServiceError::Validation(msg.to_string())
}

/// Trims, drops blanks and de-duplicates while keeping first-seen order.
fn normalize_terms(terms: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(terms.len());
    for t in terms.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !out.iter().any(|seen| seen == t) {
            out.push(t.to_string());
        }
    }
    out
}

pub fn validate_post(req: CreatePost, author: Id, now: DateTime<Utc>) -> Result<Draft, ServiceError> {
    let repost = match (req.source_id, req.source_user_id) {
        (Some(_), Some(_)) => true,
        (None, None) => false,
        _ => return Err(invalid("sourceId and sourceUserId must be given together")),
    };
    let carries = |list: &Option<Vec<String>>| list.as_ref().is_some_and(|v| !v.is_empty());
    if repost && (carries(&req.tags) || carries(&req.attachments) || req.photo_ratio.is_some()) {
        return Err(invalid("a repost cannot carry tags, attachments or photoRatio"));
    }
    if req.text.chars().count() > MAX_TEXT_CHARS {
        return Err(invalid("text too long"));
    }

    let photo_ratio = req.photo_ratio.unwrap_or(0.0);
    if !photo_ratio.is_finite() || photo_ratio < 0.0 {
        return Err(invalid("photoRatio must be a non-negative number"));
    }

    let attachments = req.attachments.unwrap_or_default();
    if attachments.len() > MAX_ATTACHMENTS {
        return Err(invalid("too many attachments"));
    }
    if attachments.iter().any(|a| a.trim().is_empty()) {
        return Err(invalid("attachment reference cannot be empty"));
    }
    if !repost && attachments.is_empty() && req.text.trim().is_empty() {
        return Err(invalid("post needs text or attachments"));
    }

    let tags = normalize_terms(&req.tags.unwrap_or_default());
    if tags.len() > MAX_TAGS {
        return Err(invalid("too many tags"));
    }
    if tags.iter().any(|t| t.chars().count() > MAX_TAG_CHARS) {
        return Err(invalid("tag too long"));
    }

    Ok(Draft {
        post: NewPost {
            user_id: author,
            text: req.text,
            created_at: now,
            source_id: req.source_id,
            source_user_id: req.source_user_id,
            attachments,
            photo_ratio,
        },
        tags,
    })
}

fn check_page(page: i64) -> Result<i64, ServiceError> {
    if page < 0 { Err(invalid("page must be non-negative")) } else { Ok(page) }
}

async fn like_unit(s: &mut dyn Session, notifier: Arc<dyn Notifier>, user_id: Id, post_id: Id) -> UnitResult<()> {
    match s.likes().find_by_ids(user_id, post_id).await {
        Ok(_) => return Ok(Flow::Halt(Halt::Conflict)),
        Err(RepoError::NotFound) => {}
        Err(e) => return Err(e.into()),
    }
    if s.posts().increment_likes(post_id).await? == 0 {
        return Ok(Flow::Halt(Halt::NotFound));
    }
    // a concurrent like of the same pair fails here and rolls back the increment
    s.likes().create(Like { user_id, post_id }).await?;
    notifier
        .add_feedback(&[FeedbackEvent::new(FeedbackKind::Like, user_id, post_id, Utc::now())])
        .await?;
    Ok(Flow::Done(()))
}

async fn unlike_unit(s: &mut dyn Session, notifier: Arc<dyn Notifier>, user_id: Id, post_id: Id) -> UnitResult<()> {
    match s.likes().find_by_ids(user_id, post_id).await {
        Ok(_) => {}
        Err(RepoError::NotFound) => return Ok(Flow::Halt(Halt::Conflict)),
        Err(e) => return Err(e.into()),
    }
    if s.posts().decrement_likes(post_id).await? == 0 {
        return Ok(Flow::Halt(Halt::NotFound));
    }
    if s.likes().delete(user_id, post_id).await? == 0 {
        // removed by a concurrent unlike after the existence check
        return Err(ServiceError::Conflict);
    }
    notifier
        .remove_feedback(&FeedbackEvent::new(FeedbackKind::Like, user_id, post_id, Utc::now()))
        .await?;
    Ok(Flow::Done(()))
}

async fn create_unit(s: &mut dyn Session, notifier: Arc<dyn Notifier>, draft: Draft) -> UnitResult<Post> {
    let Draft { post: new, tags } = draft;
    if let (Some(source_id), Some(source_user_id)) = (new.source_id, new.source_user_id) {
        // a source by another author is reported like a missing one
        match s.posts().find_by_id(source_id, new.user_id).await {
            Ok(source) if source.user_id == source_user_id => {}
            Ok(_) | Err(RepoError::NotFound) => return Ok(Flow::Halt(Halt::NotFound)),
            Err(e) => return Err(e.into()),
        }
        if s.posts().increment_reposts(source_id).await? == 0 {
            return Ok(Flow::Halt(Halt::NotFound));
        }
    }

    let post = s.posts().create(new).await?;
    if !tags.is_empty() {
        let resolved = s.tags().bulk_insert(&tags).await?;
        s.tags().bulk_insert_relation(&resolved, post.id).await?;
    }

    let now = Utc::now();
    notifier.upsert_item(&Item::visible(post.id, tags, now)).await?;
    if let Some(source_id) = post.source_id {
        notifier
            .add_feedback(&[FeedbackEvent::new(FeedbackKind::Repost, post.user_id, source_id, now)])
            .await?;
    }
    Ok(Flow::Done(post))
}

async fn delete_unit(s: &mut dyn Session, notifier: Arc<dyn Notifier>, post_id: Id, requester: Id) -> UnitResult<()> {
    // absent and not-owned are indistinguishable on purpose
    if s.posts().delete_with_guard(post_id, requester).await? == 0 {
        return Ok(Flow::Halt(Halt::NotFound));
    }
    notifier.upsert_item(&Item::hidden(post_id, Utc::now())).await?;
    Ok(Flow::Done(()))
}

/// Post and like operations. Writes run as one unit of work each; reads use an
/// ambient session.
#[derive(Clone)]
pub struct PostService {
    tx: TxCoordinator,
    notifier: Arc<dyn Notifier>,
}

impl PostService {
    pub fn new(tx: TxCoordinator, notifier: Arc<dyn Notifier>) -> Self {
        Self { tx, notifier }
    }

    #[instrument(skip(self))]
    pub async fn like(&self, user_id: Id, post_id: Id) -> Result<(), ServiceError> {
        let notifier = self.notifier.clone();
        self.tx
            .run(move |s| Box::pin(like_unit(s, notifier, user_id, post_id)))
            .await?
            .into_result()
    }

    #[instrument(skip(self))]
    pub async fn unlike(&self, user_id: Id, post_id: Id) -> Result<(), ServiceError> {
        let notifier = self.notifier.clone();
        self.tx
            .run(move |s| Box::pin(unlike_unit(s, notifier, user_id, post_id)))
            .await?
            .into_result()
    }

    #[instrument(skip(self, req))]
    pub async fn create_post(&self, author: Id, req: CreatePost) -> Result<Post, ServiceError> {
        let draft = validate_post(req, author, Utc::now())?;
        let notifier = self.notifier.clone();
        let post = self.tx
            .run(move |s| Box::pin(create_unit(s, notifier, draft)))
            .await?
            .into_result()?;
        info!(post_id = post.id, repost = post.is_repost(), "post created");
        Ok(post)
    }

    #[instrument(skip(self))]
    pub async fn delete_post(&self, post_id: Id, requester: Id) -> Result<(), ServiceError> {
        let notifier = self.notifier.clone();
        self.tx
            .run(move |s| Box::pin(delete_unit(s, notifier, post_id, requester)))
            .await?
            .into_result()?;
        info!(post_id, "post deleted");
        Ok(())
    }

    pub async fn get_post(&self, post_id: Id, viewer: Id) -> Result<Post, ServiceError> {
        let mut s = self.tx.store().session().await?;
        Ok(s.posts().find_by_id(post_id, viewer).await?)
    }

    pub async fn post_tags(&self, post_id: Id) -> Result<Vec<Tag>, ServiceError> {
        let mut s = self.tx.store().session().await?;
        Ok(s.tags().find_by_post(post_id).await?)
    }

    pub async fn user_posts(&self, user_id: Id, page: i64, viewer: Id) -> Result<Vec<Post>, ServiceError> {
        let page = check_page(page)?;
        let mut s = self.tx.store().session().await?;
        Ok(s.posts().user_posts(user_id, page, viewer).await?)
    }

    pub async fn search(&self, tags: &[String], keywords: &[String], page: i64, viewer: Id) -> Result<Vec<Post>, ServiceError> {
        let page = check_page(page)?;
        let query = PostQuery { tags: normalize_terms(tags), keywords: normalize_terms(keywords) };
        let mut s = self.tx.store().session().await?;
        Ok(s.posts().find_by_query(&query, page, viewer).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(text: &str) -> CreatePost {
        CreatePost { text: text.into(), ..Default::default() }
    }

    #[test]
    fn repost_requires_both_source_fields() {
        let r = CreatePost { source_id: Some(1), ..req("") };
        assert!(matches!(validate_post(r, 5, Utc::now()), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn repost_rejects_media_and_tags() {
        let base = CreatePost { source_id: Some(1), source_user_id: Some(2), ..req("") };
        for r in [
            CreatePost { tags: Some(vec!["a".into()]), ..base.clone() },
            CreatePost { attachments: Some(vec!["m1".into()]), ..base.clone() },
            CreatePost { photo_ratio: Some(1.5), ..base.clone() },
        ] {
            assert!(matches!(validate_post(r, 5, Utc::now()), Err(ServiceError::Validation(_))));
        }
        assert!(validate_post(base, 5, Utc::now()).is_ok());
    }

    #[test]
    fn repost_accepts_empty_lists() {
        let r = CreatePost {
            source_id: Some(1),
            source_user_id: Some(2),
            tags: Some(vec![]),
            attachments: Some(vec![]),
            ..req("")
        };
        let draft = validate_post(r, 5, Utc::now()).unwrap();
        assert!(draft.tags.is_empty());
        assert!(draft.post.attachments.is_empty());
    }

    #[test]
    fn tags_are_trimmed_and_deduplicated() {
        let r = CreatePost { tags: Some(vec![" a".into(), "b".into(), "a ".into(), "  ".into()]), ..req("hello") };
        let draft = validate_post(r, 5, Utc::now()).unwrap();
        assert_eq!(draft.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(draft.post.photo_ratio, 0.0);
    }

    #[test]
    fn blank_original_post_is_rejected() {
        assert!(validate_post(req("   "), 5, Utc::now()).is_err());
        let with_media = CreatePost { attachments: Some(vec!["img/1".into()]), ..req("") };
        assert!(validate_post(with_media, 5, Utc::now()).is_ok());
    }

    #[test]
    fn photo_ratio_must_be_finite() {
        let r = CreatePost { photo_ratio: Some(f64::NAN), ..req("x") };
        assert!(validate_post(r, 5, Utc::now()).is_err());
    }
}
