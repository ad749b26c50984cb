use async_trait::async_trait;
use common::topics::FleetTopic;
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid fleet topic `{0}`")]
    InvalidTopic(String),
    #[error("failed to encode fleet message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("publish to `{topic}` failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// Broker connection used for both directions of the fleet protocol.
///
/// Delivery is at-least-once; receivers deduplicate.
#[async_trait]
pub trait FleetTransport: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Every message published after the call, on every channel.
    fn subscribe(&self) -> broadcast::Receiver<FleetMessage>;
}

/// In-process bus. An external broker bridge forwards gateway traffic into
/// it through the HTTP ingest endpoint.
#[derive(Debug, Clone)]
pub struct LocalFleetBus {
    sender: broadcast::Sender<FleetMessage>,
}

impl LocalFleetBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for LocalFleetBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FleetTransport for LocalFleetBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if FleetTopic::parse(topic).is_none() {
            return Err(TransportError::InvalidTopic(topic.to_string()));
        }
        let message = FleetMessage {
            topic: topic.to_string(),
            payload,
        };
        // Nobody listening is not a failure: the job stays PENDING and the
        // ack-timeout sweep resolves it.
        if self.sender.send(message).is_err() {
            debug!(topic, "fleet message published without subscribers");
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<FleetMessage> {
        self.sender.subscribe()
    }
}
