use std::time::Duration;

use chrono::TimeZone;
use feedpost::feedback::{FeedbackEvent, FeedbackKind, HttpNotifier, Item, Notifier, NotifierError};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn at() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn client(server: &MockServer, key: Option<&str>) -> HttpNotifier {
    HttpNotifier::new(&server.uri(), key.map(str::to_string), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn add_feedback_posts_batch_with_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/feedback"))
        .and(header("X-API-Key", "k3y"))
        .and(body_json(serde_json::json!([{
            "FeedbackType": "like",
            "UserId": "2",
            "ItemId": "10",
            "Timestamp": "2024-03-01T12:00:00Z"
        }])))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"RowAffected": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let ev = FeedbackEvent::new(FeedbackKind::Like, 2, 10, at());
    client(&server, Some("k3y")).add_feedback(&[ev]).await.unwrap();
}

#[tokio::test]
async fn remove_feedback_targets_the_triple() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/feedback/like/2/10"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let ev = FeedbackEvent::new(FeedbackKind::Like, 2, 10, at());
    client(&server, None).remove_feedback(&ev).await.unwrap();
}

#[tokio::test]
async fn hidden_item_is_upserted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/item"))
        .and(body_json(serde_json::json!({
            "ItemId": "10",
            "IsHidden": true,
            "Categories": [],
            "Labels": [],
            "Timestamp": "2024-03-01T12:00:00Z"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server, None).upsert_item(&Item::hidden(10, at())).await.unwrap();
}

#[tokio::test]
async fn server_error_is_reported_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = client(&server, None)
        .upsert_item(&Item::visible(1, vec!["a".into()], at()))
        .await
        .unwrap_err();
    match err {
        NotifierError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    // nothing listens on the discard port
    let n = HttpNotifier::new("http://127.0.0.1:9", None, Duration::from_millis(500)).unwrap();
    let err = n.add_feedback(&[]).await.unwrap_err();
    assert!(matches!(err, NotifierError::Transport(_)));
}
