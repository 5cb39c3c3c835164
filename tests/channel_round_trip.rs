//! End-to-end tests for the asynchronous transport: envelopes in, envelopes
//! out, with the consumer loop wired the way the binary wires it.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use contextd::channel::{ChannelReader, ChannelWriter, Consumer, LocalChannel};
use contextd::model::Context;
use contextd::protocol::{ACTION_CREATE, ACTION_DELETE, ACTION_UPDATE, Envelope, ErrorBody, Kind, Message};
use contextd::router::EnvelopeRouter;
use contextd::service::{ContextService, HistoryService};
use contextd::store::MemoryStore;

struct Harness {
    history: HistoryService,
    requests: contextd::channel::LocalPublisher,
    request_reader: Arc<contextd::channel::LocalSubscriber>,
    responses: contextd::channel::LocalSubscriber,
    cancel: CancellationToken,
}

fn start() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let history = HistoryService::new(store.clone());
    let service = ContextService::new(store.clone(), history.clone());

    let (request_tx, request_rx) = LocalChannel::new(16);
    let (response_tx, response_rx) = LocalChannel::new(16);
    let request_reader = Arc::new(request_rx);

    let consumer = Consumer::new(
        request_reader.clone(),
        Arc::new(response_tx),
        EnvelopeRouter::new("context", service),
        store,
        Duration::from_millis(10),
    );

    let cancel = CancellationToken::new();
    tokio::spawn(consumer.run(cancel.clone()));

    Harness {
        history,
        requests: request_tx,
        request_reader,
        responses: response_rx,
        cancel,
    }
}

async fn round_trip(harness: &Harness, request: &Envelope) -> Envelope {
    harness.requests.publish(request).await.unwrap();
    harness.responses.fetch().await.unwrap().envelope
}

#[tokio::test]
async fn full_lifecycle_over_the_channel() {
    let harness = start();

    // Create {A, x}.
    let create = Envelope::request(
        Message::new("context", ACTION_CREATE).with_data(json!({"name": "A", "content": "x"})),
    )
    .with_correlation_id("corr-lifecycle")
    .with_trace_id("trace-lifecycle")
    .with_idempotency_key("key-create");

    let reply = round_trip(&harness, &create).await;
    assert_eq!(reply.kind, Kind::Response);
    assert_eq!(reply.correlation_id, "corr-lifecycle");
    assert_eq!(reply.trace_id, "trace-lifecycle");
    assert_eq!(reply.idempotency_key, "key-create");

    let created: Context = serde_json::from_value(reply.message.data).unwrap();
    assert_eq!(created.version, 1);
    assert!(created.is_active);

    // Update with the observed version.
    let update = Envelope::request(Message::new("context", ACTION_UPDATE).with_data(json!({
        "id": created.id,
        "version": 1,
        "name": "B",
        "content": "x"
    })));
    let reply = round_trip(&harness, &update).await;
    assert_eq!(reply.kind, Kind::Response);
    let updated: Context = serde_json::from_value(reply.message.data).unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.name, "B");

    // Stale update loses the race it started.
    let reply = round_trip(&harness, &update).await;
    assert_eq!(reply.kind, Kind::Error);
    let body: ErrorBody = serde_json::from_value(reply.message.data).unwrap();
    assert_eq!(body.status, 409);
    assert!(body.retriable);

    // Delete consumes a version and stays queryable through history.
    let delete = Envelope::request(
        Message::new("context", ACTION_DELETE).with_data(json!({"id": created.id})),
    );
    let reply = round_trip(&harness, &delete).await;
    assert_eq!(reply.kind, Kind::Response);
    let deleted: Context = serde_json::from_value(reply.message.data).unwrap();
    assert!(!deleted.is_active);
    assert_eq!(deleted.version, 3);

    let rows = harness.history.history_for_context(created.id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!((rows[0].name.as_str(), rows[0].version), ("A", 1));
    assert_eq!((rows[1].name.as_str(), rows[1].version), ("B", 2));

    harness.cancel.cancel();
}

#[tokio::test]
async fn error_envelopes_preserve_correlation_metadata() {
    let harness = start();

    let request = Envelope::request(
        Message::new("context", "archive").with_data(json!({})),
    )
    .with_correlation_id("corr-err")
    .with_trace_id("trace-err")
    .with_idempotency_key("key-err");

    let reply = round_trip(&harness, &request).await;
    assert_eq!(reply.kind, Kind::Error);
    assert_eq!(reply.correlation_id, "corr-err");
    assert_eq!(reply.trace_id, "trace-err");
    assert_eq!(reply.idempotency_key, "key-err");

    harness.cancel.cancel();
}

#[tokio::test]
async fn offsets_commit_only_after_handling() {
    let harness = start();
    assert_eq!(harness.request_reader.committed(), 0);

    let create = Envelope::request(
        Message::new("context", ACTION_CREATE).with_data(json!({"name": "A", "content": "x"})),
    );
    harness.requests.publish(&create).await.unwrap();

    // The reply is published before the offset commit, so poll briefly.
    let _ = harness.responses.fetch().await.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while harness.request_reader.committed() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "commit never happened");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(harness.request_reader.committed(), 1);

    harness.cancel.cancel();
}
