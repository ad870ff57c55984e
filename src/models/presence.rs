//! Presence channel: track online users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Member as exposed to the application: `{ "uid": .., "data": { "name": .. } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMember {
    #[serde(rename = "uid")]
    pub user_id: String,
    #[serde(rename = "data")]
    pub info: MemberInfo,
}

/// Declared identity of a member. Unknown fields are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PresenceMember {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            info: MemberInfo {
                name: name.into(),
                extra: serde_json::Map::new(),
            },
        }
    }
}

/// Member as delivered by the pub/sub service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMember {
    pub id: String,
    #[serde(default)]
    pub info: serde_json::Value,
}

impl From<&RawMember> for PresenceMember {
    fn from(raw: &RawMember) -> Self {
        Self {
            user_id: raw.id.clone(),
            info: MemberInfo::from_raw(&raw.id, &raw.info),
        }
    }
}

impl MemberInfo {
    /// Keeps every field the service sent. A non-string `name` is stringified and
    /// a non-object payload is kept under `info`.
    fn from_raw(user_id: &str, info: &Value) -> Self {
        match info {
            Value::Null => Self::default(),
            Value::Object(map) => {
                let mut extra = map.clone();
                let name = match extra.remove("name") {
                    None => String::new(),
                    Some(Value::String(name)) => name,
                    Some(other) => {
                        warn!(user_id, name = %other, "member name is not a string");
                        other.to_string()
                    }
                };
                Self { name, extra }
            }
            other => {
                warn!(user_id, info = %other, "member info is not an object");
                let mut extra = serde_json::Map::new();
                extra.insert("info".to_string(), other.clone());
                Self {
                    name: String::new(),
                    extra,
                }
            }
        }
    }
}

/// Membership collection delivered with a successful presence subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Members {
    pub me: RawMember,
    /// Delivery order.
    pub members: Vec<RawMember>,
}

impl Members {
    /// Visit every member in delivery order.
    pub fn each<F: FnMut(&RawMember)>(&self, f: F) {
        self.members.iter().for_each(f);
    }

    pub fn count(&self) -> usize {
        self.members.len()
    }
}

/// Client-side view of one subscribed presence channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceChannelState {
    pub channel_name: String,
    pub me: PresenceMember,
    /// Insertion order; ties broken by delivery order.
    pub members: Vec<PresenceMember>,
    pub subscribed_at: DateTime<Utc>,
}

impl PresenceChannelState {
    /// Build the state from a success event, making sure `me` is listed.
    pub fn new(channel_name: &str, me: PresenceMember, members: Vec<PresenceMember>) -> Self {
        let mut state = Self {
            channel_name: channel_name.to_string(),
            me: me.clone(),
            members,
            subscribed_at: Utc::now(),
        };
        state.add_member(me);
        state
    }

    /// Append a member unless one with the same user id is already present.
    /// Returns whether the member was added.
    pub fn add_member(&mut self, member: PresenceMember) -> bool {
        if self.contains(&member.user_id) {
            return false;
        }
        self.members.push(member);
        true
    }

    /// Remove a member by user id. The local member is never removed.
    pub fn remove_member(&mut self, user_id: &str) -> Option<PresenceMember> {
        if user_id == self.me.user_id {
            return None;
        }
        let idx = self.members.iter().position(|m| m.user_id == user_id)?;
        Some(self.members.remove(idx))
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }
}
