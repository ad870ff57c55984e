//! Auth endpoint request and response bodies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Form-encoded body posted by the client library to the auth endpoint.
///
/// Missing fields deserialize as empty strings; the gate and the
/// authenticator decide what an empty value means.
#[derive(Clone, Default, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub socket_id: String,
    #[serde(default)]
    pub channel_name: String,
    #[serde(default)]
    pub password: String,
    /// Display name announced to other members.
    #[serde(default)]
    pub name: String,
}

// Never print the password, not even at trace level.
impl fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("socket_id", &self.socket_id)
            .field("channel_name", &self.channel_name)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .finish()
    }
}

/// Signed subscription grant. Opaque to clients; forwarded verbatim to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    /// `<key>:<hex signature>`.
    pub auth: String,
    /// JSON-encoded presence data, present for presence channels only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<String>,
}

/// Identity bound into a presence grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceData {
    pub user_id: String,
    pub user_info: UserInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
}

impl PresenceData {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_info: UserInfo { name: name.into() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_password() {
        let req = AuthRequest {
            socket_id: "1.2".to_string(),
            channel_name: "presence-main".to_string(),
            password: "hunter2".to_string(),
            name: "Yarrow".to_string(),
        };
        let printed = format!("{:?}", req);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
        assert!(printed.contains("Yarrow"));
    }

    #[test]
    fn presence_data_serializes_in_field_order() {
        let data = PresenceData::new("1.2", "Alice");
        assert_eq!(
            serde_json::to_string(&data).unwrap(),
            r#"{"user_id":"1.2","user_info":{"name":"Alice"}}"#
        );
    }

    #[test]
    fn auth_payload_omits_missing_channel_data() {
        let payload = AuthPayload {
            auth: "key:sig".to_string(),
            channel_data: None,
        };
        assert_eq!(serde_json::to_string(&payload).unwrap(), r#"{"auth":"key:sig"}"#);
    }
}
