#![cfg(feature = "inmem-store")]

mod common;

use common::Harness;
use feedpost::error::ServiceError;
use feedpost::feedback::FeedbackKind;
use futures_util::future::join_all;

#[tokio::test]
async fn like_counts_once_and_duplicate_conflicts() {
    let h = Harness::new();
    let p = h.original(1, "hello").await;

    h.svc.like(2, p.id).await.unwrap();
    assert_eq!(h.post(p.id).await.unwrap().likes, 1);
    assert!(h.liked(2, p.id).await);

    let err = h.svc.like(2, p.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict));
    assert_eq!(h.post(p.id).await.unwrap().likes, 1);

    let added = h.notifier.added();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].feedback_type, FeedbackKind::Like);
    assert_eq!(added[0].user_id, "2");
    assert_eq!(added[0].item_id, p.id.to_string());
}

#[tokio::test]
async fn unlike_without_like_conflicts() {
    let h = Harness::new();
    let p = h.original(1, "hello").await;

    let err = h.svc.unlike(2, p.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict));
    assert_eq!(h.post(p.id).await.unwrap().likes, 0);
    assert!(h.notifier.removed().is_empty());
}

#[tokio::test]
async fn unlike_removes_row_and_decrements() {
    let h = Harness::new();
    let p = h.original(1, "hello").await;
    h.svc.like(2, p.id).await.unwrap();
    h.svc.like(3, p.id).await.unwrap();

    h.svc.unlike(2, p.id).await.unwrap();
    assert_eq!(h.post(p.id).await.unwrap().likes, 1);
    assert!(!h.liked(2, p.id).await);
    assert!(h.liked(3, p.id).await);

    let removed = h.notifier.removed();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].user_id, "2");
}

#[tokio::test]
async fn like_on_missing_post_is_not_found() {
    let h = Harness::new();
    let err = h.svc.like(2, 999).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound));
    assert!(!h.liked(2, 999).await);
    assert!(h.notifier.added().is_empty());
}

#[tokio::test]
async fn notifier_failure_rolls_back_like() {
    let h = Harness::new();
    let p = h.original(1, "hello").await;

    h.notifier.set_failing(true);
    let err = h.svc.like(2, p.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Notifier(_)));
    h.notifier.set_failing(false);

    assert_eq!(h.post(p.id).await.unwrap().likes, 0);
    assert!(!h.liked(2, p.id).await);

    // the like can be retried once the recommender is back
    h.svc.like(2, p.id).await.unwrap();
    assert_eq!(h.post(p.id).await.unwrap().likes, 1);
}

#[tokio::test]
async fn notifier_failure_rolls_back_unlike() {
    let h = Harness::new();
    let p = h.original(1, "hello").await;
    h.svc.like(2, p.id).await.unwrap();

    h.notifier.set_failing(true);
    assert!(h.svc.unlike(2, p.id).await.is_err());
    h.notifier.set_failing(false);

    assert_eq!(h.post(p.id).await.unwrap().likes, 1);
    assert!(h.liked(2, p.id).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_likes_never_lose_an_increment() {
    let h = Harness::new();
    let p = h.original(1, "popular").await;

    let results = join_all((100..120).map(|user| h.svc.like(user, p.id))).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(h.post(p.id).await.unwrap().likes, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_likes_apply_once() {
    let h = Harness::new();
    let p = h.original(1, "hello").await;

    let results = join_all((0..8).map(|_| h.svc.like(2, p.id))).await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, ServiceError::Conflict)));
    assert_eq!(h.post(p.id).await.unwrap().likes, 1);
}
