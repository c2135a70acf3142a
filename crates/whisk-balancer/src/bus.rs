//! Message bus seam and the in-process partitioned bus.
//!
//! Every invoker reads its own topic (`invoker{N}`); completions and
//! heartbeats flow back on the shared `completed` and `health` topics.
//! Payloads are JSON-encoded bytes so a networked broker can slot in
//! behind [`MessageProducer`] without touching the dispatch path.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Default number of undelivered messages a topic buffers.
pub const DEFAULT_TOPIC_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("topic {0} is full")]
    QueueFull(String),

    #[error("topic {0} is closed")]
    Closed(String),

    #[error("topic {0} already has a subscriber")]
    AlreadySubscribed(String),

    #[error("message codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Publishes raw payloads to a named topic.
#[async_trait]
pub trait MessageProducer: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

/// Encode `message` as JSON and publish it.
pub async fn send_json<T: Serialize + Sync>(
    producer: &dyn MessageProducer,
    topic: &str,
    message: &T,
) -> Result<(), BusError> {
    let payload = serde_json::to_vec(message)?;
    producer.publish(topic, payload).await
}

/// Decode a JSON payload received from a topic.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, BusError> {
    Ok(serde_json::from_slice(payload)?)
}

struct Topic {
    sender: mpsc::Sender<Vec<u8>>,
    /// Handed out to the first subscriber.
    receiver: Option<mpsc::Receiver<Vec<u8>>>,
}

/// Bounded in-process bus with one consumer per topic.
///
/// Topics are created on first use by either side, so messages published
/// before a consumer subscribes are buffered up to the topic capacity.
pub struct InMemoryBus {
    capacity: usize,
    topics: Mutex<HashMap<String, Topic>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Take the receiving end of `topic`.
    pub fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Vec<u8>>, BusError> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = topics
            .entry(topic.to_string())
            .or_insert_with(|| Self::open(self.capacity));
        let receiver = entry
            .receiver
            .take()
            .ok_or_else(|| BusError::AlreadySubscribed(topic.to_string()))?;
        debug!(topic, "subscribed");
        Ok(receiver)
    }

    fn open(capacity: usize) -> Topic {
        let (sender, receiver) = mpsc::channel(capacity);
        Topic {
            sender,
            receiver: Some(receiver),
        }
    }

    fn sender(&self, topic: &str) -> mpsc::Sender<Vec<u8>> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.to_string())
            .or_insert_with(|| Self::open(self.capacity))
            .sender
            .clone()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageProducer for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let sender = self.sender(topic);
        sender.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BusError::QueueFull(topic.to_string()),
            mpsc::error::TrySendError::Closed(_) => BusError::Closed(topic.to_string()),
        })?;
        trace!(topic, "message published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whisk_core::{COMPLETION_TOPIC, CompletionMessage, InvokerId};

    #[tokio::test]
    async fn publish_before_subscribe_is_buffered() {
        let bus = InMemoryBus::new();
        bus.publish("invoker0", b"one".to_vec()).await.unwrap();
        bus.publish("invoker0", b"two".to_vec()).await.unwrap();

        let mut rx = bus.subscribe("invoker0").unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"one");
        assert_eq!(rx.recv().await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let bus = InMemoryBus::new();
        let mut a = bus.subscribe("invoker0").unwrap();
        let mut b = bus.subscribe("invoker1").unwrap();
        bus.publish("invoker1", b"x".to_vec()).await.unwrap();

        assert_eq!(b.recv().await.unwrap(), b"x");
        assert!(a.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_subscriber_is_rejected() {
        let bus = InMemoryBus::new();
        let _rx = bus.subscribe("health").unwrap();
        assert!(matches!(
            bus.subscribe("health"),
            Err(BusError::AlreadySubscribed(_))
        ));
    }

    #[tokio::test]
    async fn full_topic_fails_fast() {
        let bus = InMemoryBus::with_capacity(1);
        bus.publish("invoker0", vec![1]).await.unwrap();
        assert!(matches!(
            bus.publish("invoker0", vec![2]).await,
            Err(BusError::QueueFull(_))
        ));
    }

    #[tokio::test]
    async fn dropped_subscriber_closes_topic() {
        let bus = InMemoryBus::new();
        drop(bus.subscribe("invoker0").unwrap());
        assert!(matches!(
            bus.publish("invoker0", vec![1]).await,
            Err(BusError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn json_helpers_round_trip_messages() {
        let bus = InMemoryBus::new();
        let mut rx = bus.subscribe(COMPLETION_TOPIC).unwrap();
        let msg = CompletionMessage {
            activation_id: "abc".into(),
            invoker: InvokerId::new(3),
            success: true,
            is_system_error: false,
            result: None,
        };
        send_json(&bus, COMPLETION_TOPIC, &msg).await.unwrap();

        let decoded: CompletionMessage = decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert!(decode::<CompletionMessage>(b"not json").is_err());
    }
}
