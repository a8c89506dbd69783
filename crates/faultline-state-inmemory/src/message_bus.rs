use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{trace, warn};

use faultline_core::{BusMessage, CoreError, MessageBus};

/// Default number of messages buffered per subscriber
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// In-process publish/subscribe bus on a tokio broadcast channel.
///
/// A subscriber that falls more than the capacity behind loses the oldest
/// messages.
pub struct InMemoryMessageBus {
    sender: broadcast::Sender<BusMessage>,
}

impl InMemoryMessageBus {
    /// Create a bus with the given per-subscriber buffer
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(
        &self,
        topic: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<(), CoreError> {
        let message = BusMessage {
            topic: topic.to_string(),
            event_type: event_type.to_string(),
            payload,
        };
        // No receivers is not an error
        let delivered = self.sender.send(message).unwrap_or(0);
        trace!(topic, event_type, delivered, "Message published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, BusMessage>, CoreError> {
        let receiver = self.sender.subscribe();
        let topic = topic.to_string();
        let messages = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => return Some((message, receiver)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Bus subscriber lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |message| futures::future::ready(message.topic == topic));
        Ok(messages.boxed())
    }
}
