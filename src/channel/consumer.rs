//! Channel consumer loop.
//!
//! Pulls envelopes sequentially, guards against broker redelivery with the
//! dedup store, routes through the envelope router, publishes the reply, and
//! commits the offset only after handling completes. Fetch and commit
//! failures are logged and retried with a fixed backoff; they never crash
//! the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelReader, ChannelWriter, Delivery};
use crate::error::ChannelError;
use crate::protocol::{Envelope, Kind};
use crate::router::EnvelopeRouter;
use crate::store::DedupStore;

/// Long-lived worker processing one message at a time.
pub struct Consumer {
    reader: Arc<dyn ChannelReader>,
    writer: Arc<dyn ChannelWriter>,
    router: EnvelopeRouter,
    dedup: Arc<dyn DedupStore>,
    backoff: Duration,
}

impl Consumer {
    pub fn new(
        reader: Arc<dyn ChannelReader>,
        writer: Arc<dyn ChannelWriter>,
        router: EnvelopeRouter,
        dedup: Arc<dyn DedupStore>,
        backoff: Duration,
    ) -> Self {
        Self {
            reader,
            writer,
            router,
            dedup,
            backoff,
        }
    }

    /// Run until cancelled or the channel closes.
    ///
    /// On cancellation the loop stops fetching and releases the reader; it
    /// does not drain in-flight messages.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("channel consumer started");

        loop {
            let delivery = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("consumer cancelled, releasing reader");
                    break;
                }
                fetched = self.reader.fetch() => match fetched {
                    Ok(delivery) => delivery,
                    Err(ChannelError::Closed) => {
                        tracing::info!("request channel closed, stopping consumer");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "channel fetch failed, backing off");
                        tokio::time::sleep(self.backoff).await;
                        continue;
                    }
                },
            };

            let outbound = self.handle(&delivery).await;

            if let Err(e) = self.writer.publish(&outbound).await {
                tracing::error!(
                    correlation_id = %outbound.correlation_id,
                    error = %e,
                    "failed to publish reply envelope"
                );
            }

            self.commit(&delivery, &cancel).await;
        }

        self.reader.close().await;
    }

    /// Produce the reply for one delivery, applying redelivery detection.
    async fn handle(&self, delivery: &Delivery) -> Envelope {
        let envelope = &delivery.envelope;
        let key = envelope.idempotency_key.as_str();

        if !key.is_empty() {
            match self.dedup.is_processed(key).await {
                Ok(true) => {
                    tracing::warn!(
                        idempotency_key = key,
                        correlation_id = %envelope.correlation_id,
                        "duplicate delivery detected, reporting without re-applying"
                    );
                    return envelope.error_reply(409, "duplicate delivery", false);
                }
                Ok(false) => {}
                // Dedup lookup failure favors availability: process the
                // message rather than stall the partition.
                Err(e) => {
                    tracing::error!(idempotency_key = key, error = %e, "dedup lookup failed");
                }
            }
        }

        let outbound = self.router.route(envelope).await;

        // Record the key only after a success response, so a failed request
        // can be retried with the same key.
        if outbound.kind == Kind::Response
            && !key.is_empty()
            && let Err(e) = self.dedup.mark_processed(key).await
        {
            tracing::error!(idempotency_key = key, error = %e, "failed to record idempotency key");
        }

        outbound
    }

    async fn commit(&self, delivery: &Delivery, cancel: &CancellationToken) {
        while let Err(e) = self.reader.commit(delivery).await {
            tracing::error!(
                offset = delivery.offset,
                error = %e,
                "offset commit failed, retrying after backoff"
            );
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::channel::LocalChannel;
    use crate::model::Context;
    use crate::protocol::{ACTION_CREATE, ErrorBody, Message};
    use crate::service::{ContextService, HistoryService};
    use crate::store::MemoryStore;

    struct Rig {
        store: Arc<MemoryStore>,
        requests: crate::channel::LocalPublisher,
        request_reader: Arc<crate::channel::LocalSubscriber>,
        responses: Arc<crate::channel::LocalSubscriber>,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn_consumer() -> Rig {
        let store = Arc::new(MemoryStore::new());
        let history = HistoryService::new(store.clone());
        let service = ContextService::new(store.clone(), history);
        let router = EnvelopeRouter::new("context", service);

        let (request_tx, request_rx) = LocalChannel::new(16);
        let (response_tx, response_rx) = LocalChannel::new(16);
        let request_reader = Arc::new(request_rx);

        let consumer = Consumer::new(
            request_reader.clone(),
            Arc::new(response_tx),
            router,
            store.clone(),
            Duration::from_millis(10),
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(cancel.clone()));

        Rig {
            store,
            requests: request_tx,
            request_reader,
            responses: Arc::new(response_rx),
            cancel,
            handle,
        }
    }

    async fn wait_for_commits(rig: &Rig, count: u64) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while rig.request_reader.committed() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "offset commit never happened"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn create_request(key: &str) -> Envelope {
        Envelope::request(
            Message::new("context", ACTION_CREATE)
                .with_data(serde_json::json!({"name": "a", "content": "x"})),
        )
        .with_idempotency_key(key)
    }

    #[tokio::test]
    async fn processes_request_and_publishes_response() {
        let rig = spawn_consumer();

        rig.requests.publish(&create_request("k-1")).await.unwrap();

        let reply = rig.responses.fetch().await.unwrap().envelope;
        assert_eq!(reply.kind, Kind::Response);
        assert_eq!(reply.idempotency_key, "k-1");

        let created: Context = serde_json::from_value(reply.message.data).unwrap();
        assert_eq!(created.version, 1);

        rig.cancel.cancel();
        rig.handle.await.unwrap();
    }

    #[tokio::test]
    async fn redelivery_is_detected_not_reapplied() {
        let rig = spawn_consumer();

        let request = create_request("k-dup");
        rig.requests.publish(&request).await.unwrap();
        let first = rig.responses.fetch().await.unwrap().envelope;
        assert_eq!(first.kind, Kind::Response);

        // Broker redelivers the same message.
        rig.requests.publish(&request).await.unwrap();
        let second = rig.responses.fetch().await.unwrap().envelope;
        assert_eq!(second.kind, Kind::Error);
        let body: ErrorBody = serde_json::from_value(second.message.data).unwrap();
        assert_eq!(body.status, 409);
        assert!(!body.retriable);

        // No second context was created.
        let contexts = crate::store::ContextStore::filter(
            rig.store.as_ref(),
            &crate::model::ContextFilter {
                name: Some("a".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(contexts.len(), 1);

        rig.cancel.cancel();
        rig.handle.await.unwrap();
    }

    #[tokio::test]
    async fn business_error_still_commits_offset() {
        let rig = spawn_consumer();

        let bogus = Envelope::request(
            Message::new("context", "update").with_data(serde_json::json!({
                "id": uuid::Uuid::new_v4(),
                "version": 1,
                "name": "a",
                "content": "x"
            })),
        );
        rig.requests.publish(&bogus).await.unwrap();

        let reply = rig.responses.fetch().await.unwrap().envelope;
        assert_eq!(reply.kind, Kind::Error);
        let body: ErrorBody = serde_json::from_value(reply.message.data).unwrap();
        assert_eq!(body.status, 404);

        wait_for_commits(&rig, 1).await;

        rig.cancel.cancel();
        rig.handle.await.unwrap();
    }

    #[tokio::test]
    async fn failed_request_does_not_burn_idempotency_key() {
        let rig = spawn_consumer();

        // Invalid create: required content missing.
        let invalid = Envelope::request(
            Message::new("context", ACTION_CREATE).with_data(serde_json::json!({"name": "a"})),
        )
        .with_idempotency_key("k-retry");
        rig.requests.publish(&invalid).await.unwrap();
        let reply = rig.responses.fetch().await.unwrap().envelope;
        assert_eq!(reply.kind, Kind::Error);

        // Corrected retry with the same key succeeds.
        rig.requests.publish(&create_request("k-retry")).await.unwrap();
        let reply = rig.responses.fetch().await.unwrap().envelope;
        assert_eq!(reply.kind, Kind::Response);

        rig.cancel.cancel();
        rig.handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let rig = spawn_consumer();
        rig.cancel.cancel();
        rig.handle.await.unwrap();
    }
}
