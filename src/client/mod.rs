//! Client side: session identity, presence subscription, and the Pusher transport.

pub mod identity;
pub mod normalizer;
pub mod pusher;
pub mod reconnect;
pub mod session;
pub mod transport;

use std::collections::BTreeMap;

pub use identity::{FileStorage, Identity, IdentityStore, MemoryStorage, SessionStorage};
pub use normalizer::normalize;
pub use pusher::{PusherOptions, PusherTransport};
pub use reconnect::ReconnectPolicy;
pub use session::{SessionState, SubscriptionSession};
pub use transport::PresenceTransport;

/// Extra form fields posted to the auth endpoint alongside `socket_id` and `channel_name`.
pub type AuthParams = BTreeMap<String, String>;

/// Auth params for the shared-password endpoint.
pub fn auth_params(password: &str, name: &str) -> AuthParams {
    AuthParams::from([
        ("password".to_string(), password.to_string()),
        ("name".to_string(), name.to_string()),
    ])
}
