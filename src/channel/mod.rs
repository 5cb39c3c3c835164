//! Message-channel seam.
//!
//! The broker itself lives outside this crate; it is consumed through the
//! narrow [`ChannelReader`]/[`ChannelWriter`] traits (fetch, commit,
//! publish). [`LocalChannel`] is the in-process queue-backed implementation
//! used by local development and the test suite; broker adapters (Kafka and
//! friends) implement the same traits out of tree.

mod consumer;

pub use consumer::Consumer;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::error::ChannelError;
use crate::protocol::Envelope;

/// One fetched message plus the offset to commit after handling it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: Envelope,
    pub offset: u64,
}

/// Sequential consumer side of a channel.
#[async_trait]
pub trait ChannelReader: Send + Sync {
    /// Block until the next message is available.
    async fn fetch(&self) -> Result<Delivery, ChannelError>;

    /// Commit the delivery's offset. Called only after the handler has
    /// completed (success or handled business error).
    async fn commit(&self, delivery: &Delivery) -> Result<(), ChannelError>;

    /// Release the reader. Safe to call once during shutdown.
    async fn close(&self);
}

/// Producer side of a channel.
#[async_trait]
pub trait ChannelWriter: Send + Sync {
    async fn publish(&self, envelope: &Envelope) -> Result<(), ChannelError>;
}

/// In-process channel: a bounded queue with reader-side offsets.
pub struct LocalChannel;

impl LocalChannel {
    /// Create a connected publisher/subscriber pair.
    pub fn new(capacity: usize) -> (LocalPublisher, LocalSubscriber) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            LocalPublisher { tx },
            LocalSubscriber {
                rx: Mutex::new(rx),
                next_offset: AtomicU64::new(0),
                committed: AtomicU64::new(0),
            },
        )
    }
}

/// Writer half of a [`LocalChannel`].
#[derive(Clone)]
pub struct LocalPublisher {
    tx: mpsc::Sender<Envelope>,
}

#[async_trait]
impl ChannelWriter for LocalPublisher {
    async fn publish(&self, envelope: &Envelope) -> Result<(), ChannelError> {
        self.tx
            .send(envelope.clone())
            .await
            .map_err(|_| ChannelError::Closed)
    }
}

/// Reader half of a [`LocalChannel`].
pub struct LocalSubscriber {
    rx: Mutex<mpsc::Receiver<Envelope>>,
    next_offset: AtomicU64,
    committed: AtomicU64,
}

impl LocalSubscriber {
    /// Number of committed deliveries. Used by tests to observe progress.
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelReader for LocalSubscriber {
    async fn fetch(&self) -> Result<Delivery, ChannelError> {
        let mut rx = self.rx.lock().await;
        let envelope = rx.recv().await.ok_or(ChannelError::Closed)?;
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        Ok(Delivery { envelope, offset })
    }

    async fn commit(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        self.committed.store(delivery.offset + 1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.rx.lock().await.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Kind, Message};

    #[tokio::test]
    async fn publish_fetch_commit_round_trip() {
        let (publisher, subscriber) = LocalChannel::new(8);

        let envelope = Envelope::request(Message::new("context", "create"));
        publisher.publish(&envelope).await.unwrap();

        let delivery = subscriber.fetch().await.unwrap();
        assert_eq!(delivery.envelope.kind, Kind::Request);
        assert_eq!(delivery.offset, 0);
        assert_eq!(subscriber.committed(), 0);

        subscriber.commit(&delivery).await.unwrap();
        assert_eq!(subscriber.committed(), 1);
    }

    #[tokio::test]
    async fn fetch_after_close_reports_closed() {
        let (publisher, subscriber) = LocalChannel::new(8);
        drop(publisher);

        let err = subscriber.fetch().await.unwrap_err();
        assert!(matches!(err, ChannelError::Closed));
    }
}
