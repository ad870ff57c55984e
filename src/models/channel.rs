//! Channel types and naming conventions.

use serde::{Deserialize, Serialize};

/// Longest channel name the pub/sub service accepts.
pub const MAX_CHANNEL_NAME_LEN: usize = 164;

/// Channel type based on prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// Public channel: no auth required.
    Public,
    /// Private channel: requires auth token.
    Private,
    /// Presence channel: auth + track who is online.
    Presence,
}

impl ChannelType {
    /// Derive channel type from name. Pusher-style: `private-*`, `presence-*`.
    pub fn from_name(name: &str) -> Self {
        if name.starts_with("presence-") {
            ChannelType::Presence
        } else if name.starts_with("private-") {
            ChannelType::Private
        } else {
            ChannelType::Public
        }
    }

    pub fn requires_auth(&self) -> bool {
        matches!(self, ChannelType::Private | ChannelType::Presence)
    }
}

/// Channel names are 1..=164 chars of `[A-Za-z0-9_\-=@,.;]`.
pub fn is_valid_channel_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_CHANNEL_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-=@,.;".contains(c))
}

/// Socket ids are two dot-separated runs of digits, e.g. `123.456`.
pub fn is_valid_socket_id(socket_id: &str) -> bool {
    match socket_id.split_once('.') {
        Some((a, b)) => {
            !a.is_empty()
                && !b.is_empty()
                && a.chars().all(|c| c.is_ascii_digit())
                && b.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}
