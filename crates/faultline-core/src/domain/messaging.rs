//! Message bus collaborator.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CoreError;

/// Event types published on the notifications topic
pub mod event_types {
    /// A deduced alarm became active
    pub const DEDUCED_ALARM_ACTIVATED: &str = "faultline.deduced_alarm.activate";
    /// A deduced alarm was retracted
    pub const DEDUCED_ALARM_DEACTIVATED: &str = "faultline.deduced_alarm.deactivate";
    /// An external workflow should run
    pub const EXECUTE_EXTERNAL: &str = "faultline.execute_external";
}

/// A message as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Topic the message was published on
    pub topic: String,
    /// Event type
    pub event_type: String,
    /// Payload
    pub payload: Value,
}

/// Publish/subscribe transport
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload; succeeds even if nobody is listening
    async fn publish(&self, topic: &str, event_type: &str, payload: Value) -> Result<(), CoreError>;

    /// Stream of messages published on a topic after this call
    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, BusMessage>, CoreError>;
}
