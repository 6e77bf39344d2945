//! Transport seams for the two delivery routes.

use crate::delivery::error::DeliveryError;
use crate::delivery::message::{DeliveryAck, OutboundMessage};
use async_trait::async_trait;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Bidirectional channel that acknowledges messages asynchronously.
#[async_trait]
pub trait StreamingTransport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Queue `message` (which carries a correlation id) and return a receiver
    /// that resolves when the matching ack arrives. The receiver errors if the
    /// connection drops first.
    async fn send(
        &self,
        message: &OutboundMessage,
    ) -> Result<oneshot::Receiver<DeliveryAck>, DeliveryError>;

    /// Drop the pending ack for `correlation_id`. A late ack is then ignored.
    fn forget(&self, correlation_id: Uuid);
}

/// One-shot request route used when streaming fails.
#[async_trait]
pub trait FallbackTransport: Send + Sync {
    async fn post(&self, message: &OutboundMessage) -> Result<DeliveryAck, DeliveryError>;
}
