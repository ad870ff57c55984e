//! HTTP handlers: channel auth endpoint and health.

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde_json::json;
use tracing::info;

use crate::error::AppError;
use crate::models::auth::{AuthRequest, PresenceData};
use crate::services::{ChannelAuthenticator, CredentialGate};

/// Shared application state for the auth endpoint.
#[derive(Clone)]
pub struct AppState {
    pub gate: CredentialGate,
    pub authenticator: ChannelAuthenticator,
}

impl AppState {
    pub fn new(gate: CredentialGate, authenticator: ChannelAuthenticator) -> Self {
        Self {
            gate,
            authenticator,
        }
    }
    pub fn gate(&self) -> &CredentialGate {
        &self.gate
    }
    pub fn authenticator(&self) -> &ChannelAuthenticator {
        &self.authenticator
    }
}

const EXPOSED_HEADERS: &str = "content-encoding,date,server,content-length";

/// POST /pusher/auth: check the shared password, then sign a presence grant
/// binding `user_id = socket_id` and `user_info = { name }`.
pub async fn auth_channel(
    State(state): State<AppState>,
    Form(body): Form<AuthRequest>,
) -> Result<Response, AppError> {
    info!(
        socket_id = %body.socket_id,
        channel = %body.channel_name,
        name = %body.name,
        "channel auth requested"
    );
    state.gate().validate(&body.password)?;

    let presence = PresenceData::new(body.socket_id.clone(), body.name.clone());
    let payload = state
        .authenticator()
        .authenticate(&body.socket_id, &body.channel_name, Some(&presence))?;
    info!(socket_id = %body.socket_id, channel = %body.channel_name, "channel auth granted");

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json; charset=UTF-8"),
            ),
            (
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            ),
            (
                HeaderName::from_static("access-control-expose-headers"),
                HeaderValue::from_static(EXPOSED_HEADERS),
            ),
        ],
        serde_json::to_string(&payload)?,
    )
        .into_response())
}

/// GET /health: liveness probe.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "presence-gate" })),
    )
}
