#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use feedpost::error::ServiceError;
use feedpost::feedback::{FeedbackEvent, Item, Notifier, NotifierError};
use feedpost::models::{CreatePost, Id, Post, Tag};
use feedpost::repo::inmem::InMemStore;
use feedpost::repo::Store;
use feedpost::{PostService, TxCoordinator};

/// Records every call; fails all of them while `failing` is set.
#[derive(Default)]
pub struct RecordingNotifier {
    added: Mutex<Vec<FeedbackEvent>>,
    removed: Mutex<Vec<FeedbackEvent>>,
    items: Mutex<Vec<Item>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn set_failing(&self, on: bool) { self.failing.store(on, Ordering::SeqCst); }
    pub fn added(&self) -> Vec<FeedbackEvent> { self.added.lock().unwrap().clone() }
    pub fn removed(&self) -> Vec<FeedbackEvent> { self.removed.lock().unwrap().clone() }
    pub fn items(&self) -> Vec<Item> { self.items.lock().unwrap().clone() }

    fn check(&self) -> Result<(), NotifierError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(NotifierError::Status { status: 503, body: "unavailable".into() })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn add_feedback(&self, events: &[FeedbackEvent]) -> Result<(), NotifierError> {
        self.check()?;
        self.added.lock().unwrap().extend_from_slice(events);
        Ok(())
    }
    async fn remove_feedback(&self, event: &FeedbackEvent) -> Result<(), NotifierError> {
        self.check()?;
        self.removed.lock().unwrap().push(event.clone());
        Ok(())
    }
    async fn upsert_item(&self, item: &Item) -> Result<(), NotifierError> {
        self.check()?;
        self.items.lock().unwrap().push(item.clone());
        Ok(())
    }
}

pub struct Harness {
    pub store: InMemStore,
    pub notifier: Arc<RecordingNotifier>,
    pub svc: PostService,
}

impl Harness {
    pub fn new() -> Self {
        let store = InMemStore::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let svc = PostService::new(TxCoordinator::new(Arc::new(store.clone())), notifier.clone());
        Self { store, notifier, svc }
    }

    pub async fn original(&self, author: Id, text: &str) -> Post {
        self.svc
            .create_post(author, CreatePost { text: text.into(), ..Default::default() })
            .await
            .unwrap()
    }

    pub async fn tagged(&self, author: Id, text: &str, tags: &[&str]) -> Post {
        let tags = tags.iter().map(|t| t.to_string()).collect();
        self.svc
            .create_post(author, CreatePost { text: text.into(), tags: Some(tags), ..Default::default() })
            .await
            .unwrap()
    }

    pub async fn repost(&self, author: Id, source: &Post) -> Result<Post, ServiceError> {
        self.svc
            .create_post(author, CreatePost {
                source_id: Some(source.id),
                source_user_id: Some(source.user_id),
                ..Default::default()
            })
            .await
    }

    pub async fn post(&self, id: Id) -> Option<Post> {
        match self.svc.get_post(id, 0).await {
            Ok(p) => Some(p),
            Err(ServiceError::NotFound) => None,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    pub async fn liked(&self, user: Id, post: Id) -> bool {
        let mut s = self.store.session().await.unwrap();
        s.likes().find_by_ids(user, post).await.is_ok()
    }

    pub async fn tags_of(&self, post: Id) -> Vec<Tag> {
        self.svc.post_tags(post).await.unwrap()
    }
}
