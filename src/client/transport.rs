//! Seam between the subscription session and the hosted pub/sub service.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::client::AuthParams;
use crate::error::AppResult;
use crate::models::event::RawEvent;

/// Client side of a Pusher-compatible service.
#[async_trait]
pub trait PresenceTransport: Send + Sync + 'static {
    /// Start receiving the public events of `channel`. Call before [`subscribe`](Self::subscribe)
    /// so nothing delivered in between is lost. The receiver closes when the connection ends.
    async fn bind(&self, channel: &str) -> AppResult<mpsc::UnboundedReceiver<RawEvent>>;

    /// Request a subscription. Returns once the request is queued; authentication
    /// failures arrive later as `pusher:subscription_error` on the bound receiver.
    async fn subscribe(&self, channel: &str, params: &AuthParams) -> AppResult<()>;
}
