//! HTTP fallback route.
//!
//! Posts the same JSON message the streaming route would have carried to the
//! collector's fallback endpoint. Any 2xx response counts as delivered.

use crate::config::CollectorEndpoint;
use crate::delivery::error::DeliveryError;
use crate::delivery::message::{DeliveryAck, DeliveryRoute, FallbackReply, OutboundMessage};
use crate::delivery::transport::FallbackTransport;
use async_trait::async_trait;
use tracing::debug;

/// Fallback client for the collector's request endpoint.
pub struct HttpFallback {
    client: reqwest::Client,
    url: String,
    health_url: String,
}

impl HttpFallback {
    /// Create a new fallback client.
    pub fn new(endpoint: &CollectorEndpoint) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(endpoint.request_timeout)
            .build()
            .map_err(|e| DeliveryError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: endpoint.fallback_url(),
            health_url: endpoint.health_url(),
        })
    }

    /// Full URL messages are posted to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Test connection to the collector.
    pub async fn test_connection(&self) -> Result<bool, DeliveryError> {
        let response = self
            .client
            .get(&self.health_url)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

#[async_trait]
impl FallbackTransport for HttpFallback {
    async fn post(&self, message: &OutboundMessage) -> Result<DeliveryAck, DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DeliveryError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;
        let reply: FallbackReply = serde_json::from_str(&body).unwrap_or_default();
        debug!(total_packets = ?reply.total_packets, "fallback delivery accepted");

        Ok(DeliveryAck {
            correlation_id: message.correlation_id,
            status: reply.status.unwrap_or_else(|| "success".to_string()),
            route: DeliveryRoute::Fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_urls_from_endpoint() {
        let endpoint = CollectorEndpoint {
            base_url: "http://127.0.0.1:5000".to_string(),
            fallback_path: "/ingest".to_string(),
            ..Default::default()
        };
        let fallback = HttpFallback::new(&endpoint).unwrap();
        assert_eq!(fallback.url(), "http://127.0.0.1:5000/ingest");
    }
}
