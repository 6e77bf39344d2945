//! Ack-aware delivery with a single fallback.
//!
//! A packet goes out on the streaming route when it is connected and waits up
//! to the ack timeout for its acknowledgement. On timeout, disconnect or no
//! connection the same message is posted once over the fallback route, and the
//! outcome of that post is the outcome of the delivery. A message the stream
//! rejects outright (it cannot be encoded) is not posted either. Failed packets
//! are not retried: the next tick carries fresher data.

use crate::delivery::error::DeliveryError;
use crate::delivery::message::{DeliveryAck, OutboundMessage};
use crate::delivery::transport::{FallbackTransport, StreamingTransport};
use crate::transparency::SharedTelemetryStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Delivery front end shared by all ticks of a session.
#[derive(Clone)]
pub struct DeliveryChannel {
    stream: Option<Arc<dyn StreamingTransport>>,
    fallback: Arc<dyn FallbackTransport>,
    ack_timeout: Duration,
    stats: SharedTelemetryStats,
}

impl DeliveryChannel {
    pub fn new(
        stream: Option<Arc<dyn StreamingTransport>>,
        fallback: Arc<dyn FallbackTransport>,
        ack_timeout: Duration,
        stats: SharedTelemetryStats,
    ) -> Self {
        Self {
            stream,
            fallback,
            ack_timeout,
            stats,
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// Whether a streaming route exists and is currently connected.
    pub fn is_streaming(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_connected())
    }

    /// Deliver one message, falling back to the request route at most once.
    pub async fn deliver(&self, message: OutboundMessage) -> Result<DeliveryAck, DeliveryError> {
        let correlation_id = message.correlation_id.unwrap_or_else(Uuid::new_v4);
        let message = message.with_correlation_id(correlation_id);

        let result = match self.stream_with_ack(&message, correlation_id).await {
            Ok(ack) => Ok(ack),
            Err(reason) if reason.is_stream_failure() => {
                debug!(%correlation_id, %reason, "using fallback route");
                self.fallback.post(&message).await
            }
            // The message itself is unusable; the fallback would fail the same way
            Err(e) => Err(e),
        };

        match &result {
            Ok(ack) => self.stats.record_delivered(ack.route),
            Err(_) => self.stats.record_delivery_failure(),
        }
        result
    }

    /// Spawn [`DeliveryChannel::deliver`] without waiting for it. Failures are
    /// logged and dropped.
    pub fn dispatch(&self, message: OutboundMessage) -> JoinHandle<()> {
        let channel = self.clone();
        tokio::spawn(async move {
            let event_type = message.event_type;
            if let Err(e) = channel.deliver(message).await {
                warn!(error = %e, ?event_type, "packet delivery failed");
            }
        })
    }

    async fn stream_with_ack(
        &self,
        message: &OutboundMessage,
        correlation_id: Uuid,
    ) -> Result<DeliveryAck, DeliveryError> {
        let stream = match &self.stream {
            Some(stream) if stream.is_connected() => stream,
            _ => return Err(DeliveryError::NotConnected),
        };

        let ack = match stream.send(message).await {
            Ok(ack) => ack,
            Err(e) => {
                stream.forget(correlation_id);
                return Err(e);
            }
        };

        tokio::select! {
            received = ack => match received {
                Ok(ack) => Ok(ack),
                Err(_) => {
                    stream.forget(correlation_id);
                    Err(DeliveryError::Disconnected)
                }
            },
            _ = tokio::time::sleep(self.ack_timeout) => {
                stream.forget(correlation_id);
                Err(DeliveryError::AckTimeout(self.ack_timeout))
            }
        }
    }
}

impl std::fmt::Debug for DeliveryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryChannel")
            .field("streaming", &self.stream.is_some())
            .field("ack_timeout", &self.ack_timeout)
            .finish()
    }
}
