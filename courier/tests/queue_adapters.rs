//! List and delay adapters over the in-memory backend clients.

use std::time::Duration;

use courier::*;
use courier_testkit::{sample_payloads, InMemoryListBackend, InMemoryMessageBackend};
use serde_json::json;

const NO_WAIT: Duration = Duration::ZERO;

#[tokio::test]
async fn list_queue_is_fifo_and_preserves_payloads() {
    let backend = InMemoryListBackend::new();
    let queue = ListQueue::new(backend.clone(), NO_WAIT);

    let mut sent = Vec::new();
    for payload in sample_payloads() {
        sent.push(queue.push("emails", &payload, NO_WAIT).await.expect("push"));
    }
    assert_eq!(backend.len("emails"), sent.len());

    let on_wire: Vec<Envelope> = backend
        .bodies("emails")
        .iter()
        .rev()
        .map(|body| Envelope::from_wire(body).expect("well-formed envelope"))
        .collect();
    assert_eq!(on_wire, sent);

    for expected in sent {
        let got = queue.pop("emails").await.expect("pop").expect("message");
        assert_eq!(got, expected);
    }
    assert!(queue.pop("emails").await.expect("pop").is_none());
}

#[tokio::test]
async fn list_queue_ignores_delay() {
    let backend = InMemoryListBackend::new();
    let queue = ListQueue::new(backend.clone(), NO_WAIT);

    queue
        .push("emails", &json!({"later": true}), Duration::from_secs(3600))
        .await
        .expect("delay is ignored, not rejected");

    let got = queue.pop("emails").await.expect("pop");
    assert!(got.is_some(), "message is visible at once");
}

#[tokio::test]
async fn list_queue_push_failure_is_a_push_error() {
    let backend = InMemoryListBackend::new();
    backend.fail_next_pushes(1);
    let queue = ListQueue::new(backend.clone(), NO_WAIT);

    let err = queue.push("emails", &json!({}), NO_WAIT).await.unwrap_err();
    assert!(matches!(err, QueueError::Push { ref queue, .. } if queue == "emails"));
    assert!(backend.is_empty("emails"));
}

#[tokio::test]
async fn list_queue_malformed_message_is_consumed() {
    let backend = InMemoryListBackend::new();
    backend.inject_raw("emails", "not json at all");
    let queue = ListQueue::new(backend.clone(), NO_WAIT);

    let err = queue.pop("emails").await.unwrap_err();
    assert!(matches!(err, QueueError::Malformed(_)));
    assert!(backend.is_empty("emails"));
}

#[tokio::test]
async fn delay_queue_sanitizes_queue_names() {
    let backend = InMemoryMessageBackend::new();
    let queue = DelayQueue::new(backend.clone(), NO_WAIT);

    let sent = queue
        .push("mail/outbound", &json!({"to": "b@example.com"}), NO_WAIT)
        .await
        .expect("push");
    assert_eq!(backend.queue_names(), vec!["mail_outbound".to_string()]);

    let got = queue.pop("mail/outbound").await.expect("pop").expect("message");
    assert_eq!(got, sent);
}

#[tokio::test]
async fn delay_queue_send_failure_is_a_push_error() {
    let backend = InMemoryMessageBackend::new();
    backend.fail_next_sends(1);
    let queue = DelayQueue::new(backend.clone(), NO_WAIT);

    let err = queue
        .push("mail/outbound", &json!({}), NO_WAIT)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Push { ref queue, .. } if queue == "mail/outbound"));
    assert_eq!(backend.queued("mail_outbound"), 0);
    assert!(backend.queue_names().is_empty());

    queue
        .push("mail/outbound", &json!({}), NO_WAIT)
        .await
        .expect("next send succeeds");
    assert_eq!(backend.queued("mail_outbound"), 1);
}

#[tokio::test]
async fn delay_queue_rejects_delay_beyond_backend_maximum() {
    let backend = InMemoryMessageBackend::with_max_delay(Duration::from_secs(900));
    let queue = DelayQueue::new(backend.clone(), NO_WAIT);

    let err = queue
        .push("emails", &json!({}), Duration::from_secs(901))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueueError::UnsupportedDelay {
            requested_secs: 901,
            max_secs: 900
        }
    ));
    assert_eq!(backend.queued("emails"), 0);

    queue
        .push("emails", &json!({}), Duration::from_secs(900))
        .await
        .expect("maximum delay is accepted");
    assert_eq!(backend.delays("emails"), vec![Duration::from_secs(900)]);
}

#[tokio::test(start_paused = true)]
async fn delay_queue_hides_message_until_delay_elapses() {
    let backend = InMemoryMessageBackend::new();
    let queue = DelayQueue::new(backend.clone(), NO_WAIT);

    queue
        .push("emails", &json!({"n": 1}), Duration::from_secs(30))
        .await
        .expect("push");
    assert!(queue.pop("emails").await.expect("pop").is_none());

    tokio::time::advance(Duration::from_secs(31)).await;
    let got = queue.pop("emails").await.expect("pop").expect("message");
    assert_eq!(got.data, json!({"n": 1}));
}

#[tokio::test]
async fn delay_queue_deletes_before_decoding() {
    let backend = InMemoryMessageBackend::new();
    backend.inject_raw("emails", r#"{"id":"abc","data":"{not json"}"#);
    let queue = DelayQueue::new(backend.clone(), NO_WAIT);

    let err = queue.pop("emails").await.unwrap_err();
    assert!(matches!(err, QueueError::Malformed(_)));
    assert_eq!(backend.deleted(), 1);
    assert_eq!(backend.in_flight(), 0);
    assert_eq!(backend.queued("emails"), 0);
}

#[tokio::test]
async fn delay_queue_empty_pop_is_not_an_error() {
    let queue = DelayQueue::new(InMemoryMessageBackend::new(), NO_WAIT);
    assert!(queue.pop("nothing-here").await.expect("pop").is_none());
}
