//! Wire messages exchanged with the collector.

use crate::core::packet::FeaturePacket;
use crate::core::windowing::FocusChange;
use crate::session::SessionContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event name the collector uses to acknowledge a streamed message.
pub const ACK_EVENT: &str = "event_received";

/// Kind of packet being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Typing,
    /// Behavior packet for a tick in which the pointer moved
    MouseMove,
    WindowBlur,
    WindowFocus,
    /// Behavior packet for a tick without pointer movement
    Features,
}

impl EventType {
    /// Event type announcing a focus transition.
    pub fn for_focus(change: FocusChange) -> Self {
        if change.focused {
            EventType::WindowFocus
        } else {
            EventType::WindowBlur
        }
    }
}

/// Message sent over either delivery route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub user_id: String,
    pub exam_id: String,
    pub event_type: EventType,
    pub payload: FeaturePacket,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl OutboundMessage {
    /// Wrap a packet for the session in `context`.
    pub fn new(context: &SessionContext, event_type: EventType, payload: FeaturePacket) -> Self {
        Self {
            user_id: context.user_id.clone(),
            exam_id: context.exam_id.clone(),
            event_type,
            timestamp: payload.timestamp,
            payload,
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Which route confirmed a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryRoute {
    Stream,
    Fallback,
}

/// Confirmation that the collector accepted a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAck {
    pub correlation_id: Option<Uuid>,
    pub status: String,
    pub route: DeliveryRoute,
}

/// Line received on the streaming channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundAck {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl InboundAck {
    pub fn received(correlation_id: Option<Uuid>) -> Self {
        Self {
            event: ACK_EVENT.to_string(),
            correlation_id,
            status: Some("received".to_string()),
        }
    }

    pub fn is_ack(&self) -> bool {
        self.event == ACK_EVENT
    }
}

/// Body the collector returns from the fallback endpoint. Every field is
/// optional so any 2xx body is accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FallbackReply {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub total_packets: Option<u64>,
}
