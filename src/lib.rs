//! Presence-channel auth endpoint and client subscription bridge.
//!
//! The server half gates channel access behind a shared password and signs
//! Pusher-compatible presence grants. The client half subscribes to a presence
//! channel and turns the service's callbacks into one ordered stream of
//! [`ChannelEvent`]s.

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;

pub use config::{ClientConfig, Config};
pub use error::AppError;
pub use handlers::http::AppState;
pub use models::event::ChannelEvent;
pub use services::{ChannelAuthenticator, CredentialGate};

use axum::routing::{get, post};
use handlers::http;
use tower_http::trace::TraceLayer;

/// Path of the channel auth endpoint.
pub const AUTH_PATH: &str = "/pusher/auth";

/// Build the API router (auth, health). Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route(AUTH_PATH, post(http::auth_channel))
        .route("/health", get(http::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
