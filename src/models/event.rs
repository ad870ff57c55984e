//! Channel events: raw service events in, normalized application events out.

use serde::{Deserialize, Serialize};

use crate::models::presence::PresenceMember;

pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher:subscription_succeeded";
pub const SUBSCRIPTION_ERROR: &str = "pusher:subscription_error";
pub const MEMBER_ADDED: &str = "pusher:member_added";
pub const MEMBER_REMOVED: &str = "pusher:member_removed";

/// Event as delivered by the pub/sub service for one bound channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RawEvent {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Application-level channel event. The only shape the UI layer ever sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ChannelEvent {
    #[serde(rename = "pusher:subscription_succeeded")]
    SubscriptionSucceeded {
        channel: String,
        me: PresenceMember,
        members: Vec<PresenceMember>,
    },
    #[serde(rename = "pusher:subscription_error")]
    SubscriptionError {
        channel: String,
        data: serde_json::Value,
    },
}

impl ChannelEvent {
    pub fn channel(&self) -> &str {
        match self {
            ChannelEvent::SubscriptionSucceeded { channel, .. }
            | ChannelEvent::SubscriptionError { channel, .. } => channel,
        }
    }

    /// Literal event-kind discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelEvent::SubscriptionSucceeded { .. } => SUBSCRIPTION_SUCCEEDED,
            ChannelEvent::SubscriptionError { .. } => SUBSCRIPTION_ERROR,
        }
    }
}
