//! Packet delivery to the remote collector.
//!
//! Two routes are supported:
//! - a streaming channel that acknowledges each message ([`TcpStreamTransport`])
//! - a one-shot HTTP request used when streaming is down or too slow ([`HttpFallback`])
//!
//! [`DeliveryChannel`] combines them behind a single awaitable `deliver`.

pub mod channel;
pub mod error;
pub mod http;
pub mod message;
pub mod stream;
pub mod transport;

// Re-export commonly used types
pub use channel::DeliveryChannel;
pub use error::DeliveryError;
pub use http::HttpFallback;
pub use message::{
    DeliveryAck, DeliveryRoute, EventType, FallbackReply, InboundAck, OutboundMessage, ACK_EVENT,
};
pub use stream::TcpStreamTransport;
pub use transport::{FallbackTransport, StreamingTransport};
