use std::time::Duration;
use thiserror::Error;

/// Delivery error types.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// No streaming connection is available
    #[error("streaming channel is not connected")]
    NotConnected,
    /// The connection dropped before the ack arrived
    #[error("streaming channel disconnected before the ack arrived")]
    Disconnected,
    #[error("no ack within {0:?}")]
    AckTimeout(Duration),
    /// Network/HTTP error
    #[error("network error: {0}")]
    Network(String),
    /// Collector returned a non-success response
    #[error("collector error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("delivery config error: {0}")]
    Config(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DeliveryError {
    /// Whether the failure belongs to the streaming route and should be
    /// recovered by the fallback.
    pub fn is_stream_failure(&self) -> bool {
        matches!(
            self,
            DeliveryError::NotConnected | DeliveryError::Disconnected | DeliveryError::AckTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_failures_are_recoverable() {
        assert!(DeliveryError::NotConnected.is_stream_failure());
        assert!(DeliveryError::Disconnected.is_stream_failure());
        assert!(DeliveryError::AckTimeout(Duration::from_secs(3)).is_stream_failure());
        assert!(!DeliveryError::Protocol("bad".to_string()).is_stream_failure());
        assert!(!DeliveryError::Server {
            status: 500,
            message: "boom".to_string()
        }
        .is_stream_failure());
    }
}
