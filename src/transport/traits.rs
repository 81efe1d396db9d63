//! Transport trait abstraction for the broker connection

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Delivery guarantee requested for a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Acknowledgement failed: {0}")]
    Ack(String),

    #[error("No broker acknowledgement within {0:?}")]
    Timeout(Duration),

    #[error("Delivery abandoned before acknowledgement")]
    Abandoned,
}

/// A message delivered by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    /// Broker packet id, needed to acknowledge QoS 1 deliveries
    pub pkid: u16,
}

/// Handle on an outbound publish that resolves once the broker confirms it
#[derive(Debug)]
pub struct Delivery {
    rx: Option<oneshot::Receiver<Result<(), TransportError>>>,
}

impl Delivery {
    /// Delivery that resolves when the paired sender is signalled
    pub fn pending(rx: oneshot::Receiver<Result<(), TransportError>>) -> Self {
        Self { rx: Some(rx) }
    }

    /// Delivery that is already confirmed
    pub fn completed() -> Self {
        Self { rx: None }
    }

    /// Wait up to `limit` for the broker's confirmation
    pub async fn wait(self, limit: Duration) -> Result<(), TransportError> {
        let Some(rx) = self.rx else {
            return Ok(());
        };

        match tokio::time::timeout(limit, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Abandoned),
            Err(_) => Err(TransportError::Timeout(limit)),
        }
    }
}

/// Outbound side of the broker connection shared by every pipeline stage
#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue a publish; the returned [`Delivery`] tracks the broker's confirmation
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS)
        -> Result<Delivery, TransportError>;

    /// Acknowledge an inbound delivery so the broker stops redelivering it
    async fn ack(&self, message: &InboundMessage) -> Result<(), TransportError>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
