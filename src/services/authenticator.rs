//! Signs private and presence channel subscriptions (Pusher-compatible HMAC).

use crate::config::SigningCredentials;
use crate::error::{AppError, AppResult};
use crate::models::auth::{AuthPayload, PresenceData};
use crate::models::channel::{is_valid_channel_name, is_valid_socket_id};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, instrument};

type HmacSha256 = Hmac<Sha256>;

/// Produces subscription grants the hosted service verifies on its side.
///
/// Signature: `hex(HMAC-SHA256(secret, socket_id:channel_name[:channel_data]))`,
/// sent as `auth = "<key>:<signature>"`.
#[derive(Clone)]
pub struct ChannelAuthenticator {
    credentials: Option<SigningCredentials>,
}

impl ChannelAuthenticator {
    pub fn new(credentials: Option<SigningCredentials>) -> Self {
        Self { credentials }
    }

    fn credentials(&self) -> AppResult<&SigningCredentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| AppError::Config("signing credentials are not configured".to_string()))
    }

    /// Sign a grant for `socket_id` on `channel`. With presence data the grant
    /// also binds the member identity (`channel_data`).
    #[instrument(skip(self, presence))]
    pub fn authenticate(
        &self,
        socket_id: &str,
        channel: &str,
        presence: Option<&PresenceData>,
    ) -> AppResult<AuthPayload> {
        let credentials = self.credentials()?;
        if !is_valid_socket_id(socket_id) {
            return Err(AppError::Signing(format!("invalid socket id: {:?}", socket_id)));
        }
        if !is_valid_channel_name(channel) {
            return Err(AppError::Signing(format!("invalid channel name: {:?}", channel)));
        }

        let channel_data = presence.map(serde_json::to_string).transpose()?;
        let signature = sign(
            &credentials.secret,
            &string_to_sign(socket_id, channel, channel_data.as_deref()),
        )?;
        debug!(app_id = %credentials.app_id, "channel grant signed");

        Ok(AuthPayload {
            auth: format!("{}:{}", credentials.key, signature),
            channel_data,
        })
    }

    /// Check a grant the way the hosted service does.
    pub fn verify(&self, socket_id: &str, channel: &str, payload: &AuthPayload) -> AppResult<()> {
        let credentials = self.credentials()?;
        let (key, signature) = payload
            .auth
            .split_once(':')
            .ok_or_else(|| AppError::Signing("malformed auth token".to_string()))?;
        if key != credentials.key {
            return Err(AppError::Signing("auth token issued for another app key".to_string()));
        }
        let signature = hex::decode(signature)
            .map_err(|_| AppError::Signing("auth signature is not hex".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(credentials.secret.as_bytes())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init: {}", e)))?;
        mac.update(string_to_sign(socket_id, channel, payload.channel_data.as_deref()).as_bytes());
        mac.verify_slice(&signature).map_err(|_| {
            debug!(channel = %channel, "auth signature mismatch");
            AppError::Signing("invalid auth signature".to_string())
        })
    }
}

fn string_to_sign(socket_id: &str, channel: &str, channel_data: Option<&str>) -> String {
    match channel_data {
        Some(data) => format!("{}:{}:{}", socket_id, channel, data),
        None => format!("{}:{}", socket_id, channel),
    }
}

fn sign(secret: &str, payload: &str) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
