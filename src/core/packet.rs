//! Feature packets handed to the delivery channel.

use crate::core::features::BehaviorFeatures;
use crate::core::typing::TypingSample;
use crate::core::windowing::FocusChange;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A timestamped feature payload.
///
/// The body is flattened so the wire form is a single flat JSON object with a
/// millisecond `timestamp` next to the feature fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePacket {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: PacketBody,
}

/// What a packet carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PacketBody {
    // Tried in order; each shape lacks the required fields of the ones before it
    Typing(TypingSample),
    Focus(FocusChange),
    Behavior(BehaviorFeatures),
}

impl FeaturePacket {
    pub fn behavior(timestamp: DateTime<Utc>, features: BehaviorFeatures) -> Self {
        Self {
            timestamp,
            body: PacketBody::Behavior(features),
        }
    }

    pub fn typing(timestamp: DateTime<Utc>, sample: TypingSample) -> Self {
        Self {
            timestamp,
            body: PacketBody::Typing(sample),
        }
    }

    pub fn focus(timestamp: DateTime<Utc>, change: FocusChange) -> Self {
        Self {
            timestamp,
            body: PacketBody::Focus(change),
        }
    }

    pub fn is_typing(&self) -> bool {
        matches!(self.body, PacketBody::Typing(_))
    }

    pub fn features(&self) -> Option<&BehaviorFeatures> {
        match &self.body {
            PacketBody::Behavior(features) => Some(features),
            _ => None,
        }
    }

    pub fn focus_change(&self) -> Option<FocusChange> {
        match self.body {
            PacketBody::Focus(change) => Some(change),
            _ => None,
        }
    }
}
