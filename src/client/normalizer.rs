//! Maps service events onto [`ChannelEvent`]; everything else is dropped.

use serde_json::json;
use tracing::{debug, info, warn};

use crate::models::event::{ChannelEvent, RawEvent, SUBSCRIPTION_ERROR, SUBSCRIPTION_SUCCEEDED};
use crate::models::presence::{Members, PresenceMember};

/// Normalize one raw event received on `channel`.
///
/// Only subscription success and subscription error are understood. A success
/// payload that is not a membership collection becomes a subscription error so
/// the attempt still has exactly one outcome.
pub fn normalize(channel: &str, raw: &RawEvent) -> Option<ChannelEvent> {
    let event = match raw.event.as_str() {
        SUBSCRIPTION_SUCCEEDED => match serde_json::from_value::<Members>(raw.data.clone()) {
            Ok(members) => succeeded(channel, &members),
            Err(e) => {
                warn!(channel = %channel, error = %e, "malformed subscription payload");
                ChannelEvent::SubscriptionError {
                    channel: channel.to_string(),
                    data: json!({
                        "reason": "malformed subscription payload",
                        "error": e.to_string(),
                    }),
                }
            }
        },
        SUBSCRIPTION_ERROR => ChannelEvent::SubscriptionError {
            channel: channel.to_string(),
            data: raw.data.clone(),
        },
        other => {
            debug!(channel = %channel, event = %other, "event dropped");
            return None;
        }
    };
    log(&event);
    Some(event)
}

fn succeeded(channel: &str, members: &Members) -> ChannelEvent {
    let mut list = Vec::with_capacity(members.count());
    members.each(|member| list.push(PresenceMember::from(member)));
    ChannelEvent::SubscriptionSucceeded {
        channel: channel.to_string(),
        me: PresenceMember::from(&members.me),
        members: list,
    }
}

fn log(event: &ChannelEvent) {
    let tag = match event {
        ChannelEvent::SubscriptionSucceeded { .. } => "subscription succeeded",
        ChannelEvent::SubscriptionError { .. } => "subscription error",
    };
    let body = serde_json::to_string_pretty(event).unwrap_or_default();
    info!(channel = %event.channel(), "{:?} {}", tag, body);
}
