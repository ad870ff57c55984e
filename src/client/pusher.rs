//! WebSocket transport speaking the Pusher channels protocol (version 7).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

use crate::client::reconnect::ReconnectPolicy;
use crate::client::transport::PresenceTransport;
use crate::client::AuthParams;
use crate::config::ClientConfig;
use crate::error::{AppError, AppResult};
use crate::models::auth::{AuthPayload, PresenceData};
use crate::models::channel::ChannelType;
use crate::models::event::{
    RawEvent, MEMBER_ADDED, MEMBER_REMOVED, SUBSCRIPTION_ERROR, SUBSCRIPTION_SUCCEEDED,
};
use crate::models::presence::{Members, RawMember};

const PROTOCOL_VERSION: u8 = 7;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection settings for [`PusherTransport`].
#[derive(Debug, Clone)]
pub struct PusherOptions {
    pub key: String,
    /// `host[:port]` of the WebSocket endpoint.
    pub host: String,
    pub use_tls: bool,
    pub auth_endpoint: String,
    /// Per-request timeout for auth endpoint calls.
    pub auth_timeout: Duration,
    /// Time allowed between socket open and `pusher:connection_established`.
    pub handshake_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl PusherOptions {
    pub fn url(&self) -> String {
        format!(
            "{}://{}/app/{}?protocol={}&client=rust&version={}&flash=false",
            if self.use_tls { "wss" } else { "ws" },
            self.host,
            self.key,
            PROTOCOL_VERSION,
            env!("CARGO_PKG_VERSION"),
        )
    }
}

impl From<&ClientConfig> for PusherOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            key: config.key.clone(),
            host: config.ws_host(),
            use_tls: config.use_tls,
            auth_endpoint: config.auth_endpoint.clone(),
            auth_timeout: config.auth_timeout,
            handshake_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// One protocol message. `data` arrives JSON-encoded as a string and is decoded on parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Frame {
    event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

impl Frame {
    fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            channel: None,
            data,
        }
    }

    fn parse(text: &str) -> AppResult<Self> {
        let mut frame: Frame = serde_json::from_str(text)?;
        frame.data = decode_data(frame.data);
        Ok(frame)
    }
}

fn decode_data(data: Value) -> Value {
    match data {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}

#[derive(Debug, Deserialize)]
struct PresenceSnapshot {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    hash: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct MemberFrame {
    user_id: String,
    #[serde(default)]
    user_info: Value,
}

impl From<MemberFrame> for RawMember {
    fn from(frame: MemberFrame) -> Self {
        RawMember {
            id: frame.user_id,
            info: frame.user_info,
        }
    }
}

/// Membership collection from a presence snapshot, in the service's `ids` order.
/// `me` is the identity we were granted; without one there is no collection.
fn members_from_presence(data: &Value, me: Option<&PresenceData>) -> Option<Members> {
    let snapshot: PresenceSnapshot = serde_json::from_value(data.get("presence")?.clone()).ok()?;
    let members: Vec<RawMember> = snapshot
        .ids
        .iter()
        .map(|id| RawMember {
            id: id.clone(),
            info: snapshot.hash.get(id).cloned().unwrap_or(Value::Null),
        })
        .collect();
    let me = me?;
    let me = members
        .iter()
        .find(|m| m.id == me.user_id)
        .cloned()
        .unwrap_or_else(|| RawMember {
            id: me.user_id.clone(),
            info: serde_json::to_value(&me.user_info).unwrap_or(Value::Null),
        });
    Some(Members { me, members })
}

/// Turn a channel frame into the public event bound callbacks see.
fn translate(frame: Frame, me: Option<&PresenceData>) -> Option<RawEvent> {
    let Frame {
        event,
        channel,
        data,
    } = frame;
    match event.as_str() {
        "pusher_internal:subscription_succeeded" => {
            let channel = channel.unwrap_or_default();
            if ChannelType::from_name(&channel) != ChannelType::Presence {
                return Some(RawEvent::new(SUBSCRIPTION_SUCCEEDED, data));
            }
            match members_from_presence(&data, me) {
                Some(members) => Some(RawEvent::new(
                    SUBSCRIPTION_SUCCEEDED,
                    serde_json::to_value(members).ok()?,
                )),
                None => Some(RawEvent::new(
                    SUBSCRIPTION_ERROR,
                    json!({
                        "type": "PresenceError",
                        "error": "subscription succeeded without usable presence data",
                    }),
                )),
            }
        }
        "pusher_internal:subscription_error" => Some(RawEvent::new(SUBSCRIPTION_ERROR, data)),
        "pusher_internal:member_added" => {
            let member: RawMember = serde_json::from_value::<MemberFrame>(data).ok()?.into();
            Some(RawEvent::new(MEMBER_ADDED, serde_json::to_value(member).ok()?))
        }
        "pusher_internal:member_removed" => {
            let member: RawMember = serde_json::from_value::<MemberFrame>(data).ok()?.into();
            Some(RawEvent::new(MEMBER_REMOVED, serde_json::to_value(member).ok()?))
        }
        internal if internal.starts_with("pusher_internal:") => None,
        other => Some(RawEvent::new(other, data)),
    }
}

fn auth_error(status: u16, error: impl Into<String>) -> RawEvent {
    RawEvent::new(
        SUBSCRIPTION_ERROR,
        json!({ "type": "AuthError", "error": error.into(), "status": status }),
    )
}

#[derive(Debug)]
struct AuthFailure {
    status: u16,
    message: String,
}

/// State shared by the transport handle and its reader task.
struct Inner {
    socket_id: String,
    outbound: mpsc::UnboundedSender<String>,
    closed: AtomicBool,
    bindings: RwLock<HashMap<String, mpsc::UnboundedSender<RawEvent>>>,
    /// Presence identity granted per channel; resolves `me` on subscription.
    granted: RwLock<HashMap<String, PresenceData>>,
    http: reqwest::Client,
    auth_endpoint: String,
}

impl Inner {
    fn new(
        socket_id: String,
        outbound: mpsc::UnboundedSender<String>,
        http: reqwest::Client,
        auth_endpoint: String,
    ) -> Self {
        Self {
            socket_id,
            outbound,
            closed: AtomicBool::new(false),
            bindings: RwLock::new(HashMap::new()),
            granted: RwLock::new(HashMap::new()),
            http,
            auth_endpoint,
        }
    }

    /// `closed` is checked under the bindings lock so a binding can never
    /// outlive the reader's final `clear`.
    async fn bind(&self, channel: &str) -> AppResult<mpsc::UnboundedReceiver<RawEvent>> {
        let mut bindings = self.bindings.write().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::Transport("connection closed".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        bindings.insert(channel.to_string(), tx);
        Ok(rx)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders closes every bound receiver.
        self.bindings.write().await.clear();
    }

    fn send_frame(&self, frame: &Frame) -> AppResult<()> {
        let text = serde_json::to_string(frame)?;
        self.outbound
            .send(text)
            .map_err(|_| AppError::Transport("connection closed".to_string()))
    }

    async fn deliver(&self, channel: &str, event: RawEvent) {
        let mut bindings = self.bindings.write().await;
        let delivered = match bindings.get(channel) {
            Some(tx) => tx.send(event).is_ok(),
            None => {
                debug!(channel, event = %event.event, "no binding; event dropped");
                return;
            }
        };
        if !delivered {
            bindings.remove(channel);
        }
    }

    async fn handle_frame(&self, frame: Frame) {
        match frame.event.as_str() {
            "pusher:ping" => {
                if let Err(e) = self.send_frame(&Frame::new("pusher:pong", json!({}))) {
                    warn!(error = %e, "pong failed");
                }
                return;
            }
            "pusher:error" => {
                warn!(data = %frame.data, "service reported an error");
                return;
            }
            _ => {}
        }
        let Some(channel) = frame.channel.clone() else {
            debug!(event = %frame.event, "connection event ignored");
            return;
        };
        let me = self.granted.read().await.get(&channel).cloned();
        if let Some(event) = translate(frame, me.as_ref()) {
            self.deliver(&channel, event).await;
        }
    }

    async fn authorize(&self, channel: &str, params: &AuthParams) -> Result<AuthPayload, AuthFailure> {
        let mut form: Vec<(&str, &str)> = vec![
            ("socket_id", self.socket_id.as_str()),
            ("channel_name", channel),
        ];
        form.extend(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let res = self
            .http
            .post(&self.auth_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthFailure {
                status: 0,
                message: e.to_string(),
            })?;
        let status = res.status().as_u16();
        if !res.status().is_success() {
            let message = res.text().await.unwrap_or_default();
            return Err(AuthFailure { status, message });
        }
        res.json::<AuthPayload>().await.map_err(|e| AuthFailure {
            status,
            message: format!("JSON returned from auth endpoint was invalid: {}", e),
        })
    }

    async fn authorize_and_subscribe(&self, channel: String, params: AuthParams) {
        let payload = match self.authorize(&channel, &params).await {
            Ok(payload) => payload,
            Err(failure) => {
                warn!(channel = %channel, status = failure.status, "channel auth failed");
                self.deliver(&channel, auth_error(failure.status, failure.message))
                    .await;
                return;
            }
        };

        if let Some(data) = payload.channel_data.as_deref() {
            match serde_json::from_str::<PresenceData>(data) {
                Ok(granted) => {
                    self.granted.write().await.insert(channel.clone(), granted);
                }
                Err(e) => warn!(channel = %channel, error = %e, "unreadable channel_data in grant"),
            }
        }

        let mut data = serde_json::Map::new();
        data.insert("channel".to_string(), json!(channel));
        data.insert("auth".to_string(), json!(payload.auth));
        if let Some(channel_data) = payload.channel_data {
            data.insert("channel_data".to_string(), json!(channel_data));
        }
        if let Err(e) = self.send_frame(&Frame::new("pusher:subscribe", Value::Object(data))) {
            self.deliver(&channel, auth_error(0, e.to_string())).await;
            return;
        }
        debug!(channel = %channel, "subscribe sent");
    }
}

/// Live connection to a Pusher-compatible service.
pub struct PusherTransport {
    inner: Arc<Inner>,
    tasks: Vec<JoinHandle<()>>,
}

impl PusherTransport {
    /// Open the socket (retrying per `options.reconnect`) and wait for the socket id.
    #[instrument(skip(options), fields(host = %options.host))]
    pub async fn connect(options: PusherOptions) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(options.auth_timeout)
            .build()?;
        let url = options.url();
        let url = url.as_str();
        let handshake_timeout = options.handshake_timeout;
        let (ws, socket_id) = options
            .reconnect
            .retry("pusher connect", move || open(url, handshake_timeout))
            .await?;
        info!(socket_id = %socket_id, "pusher connection established");

        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let inner = Arc::new(Inner::new(socket_id, tx, http, options.auth_endpoint));

        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if sink.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
        });

        let reader_inner = inner.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match Frame::parse(text.as_str()) {
                        Ok(frame) => reader_inner.handle_frame(frame).await,
                        Err(e) => warn!(error = %e, "unparseable frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "pusher connection error");
                        break;
                    }
                }
            }
            reader_inner.close().await;
            info!(socket_id = %reader_inner.socket_id, "pusher connection closed");
        });

        Ok(Self {
            inner,
            tasks: vec![writer, reader],
        })
    }

    pub fn socket_id(&self) -> &str {
        &self.inner.socket_id
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(AppError::Transport("connection closed".to_string()));
        }
        Ok(())
    }
}

impl Drop for PusherTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn open(url: &str, handshake_timeout: Duration) -> AppResult<(WsStream, String)> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await?;
    let socket_id = tokio::time::timeout(handshake_timeout, await_established(&mut ws))
        .await
        .map_err(|_| {
            AppError::Transport("timed out waiting for connection_established".to_string())
        })??;
    Ok((ws, socket_id))
}

async fn await_established(ws: &mut WsStream) -> AppResult<String> {
    while let Some(msg) = ws.next().await {
        let Message::Text(text) = msg? else {
            continue;
        };
        let frame = Frame::parse(text.as_str())?;
        match frame.event.as_str() {
            "pusher:connection_established" => {
                return frame
                    .data
                    .get("socket_id")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .ok_or_else(|| {
                        AppError::Transport("connection_established without socket_id".to_string())
                    });
            }
            "pusher:error" => {
                return Err(AppError::Transport(format!(
                    "service refused connection: {}",
                    frame.data
                )))
            }
            other => debug!(event = %other, "frame before connection_established"),
        }
    }
    Err(AppError::Transport(
        "connection closed before it was established".to_string(),
    ))
}

#[async_trait]
impl PresenceTransport for PusherTransport {
    async fn bind(&self, channel: &str) -> AppResult<mpsc::UnboundedReceiver<RawEvent>> {
        self.inner.bind(channel).await
    }

    async fn subscribe(&self, channel: &str, params: &AuthParams) -> AppResult<()> {
        self.ensure_open()?;
        if !ChannelType::from_name(channel).requires_auth() {
            return self
                .inner
                .send_frame(&Frame::new("pusher:subscribe", json!({ "channel": channel })));
        }
        let inner = self.inner.clone();
        let channel = channel.to_string();
        let params = params.clone();
        tokio::spawn(async move { inner.authorize_and_subscribe(channel, params).await });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence_frame(data: Value) -> Frame {
        Frame {
            event: "pusher_internal:subscription_succeeded".to_string(),
            channel: Some("presence-main".to_string()),
            data,
        }
    }

    fn inner() -> Inner {
        let (tx, _rx) = mpsc::unbounded_channel();
        Inner::new(
            "1.1".to_string(),
            tx,
            reqwest::Client::new(),
            "http://127.0.0.1:9/pusher/auth".to_string(),
        )
    }

    #[tokio::test]
    async fn close_ends_existing_bindings_and_refuses_new_ones() {
        let inner = inner();
        let mut events = inner.bind("presence-main").await.unwrap();
        inner.close().await;
        assert!(events.recv().await.is_none());
        assert!(matches!(
            inner.bind("presence-other").await,
            Err(AppError::Transport(_))
        ));
        assert!(inner.bindings.read().await.is_empty());
    }

    #[tokio::test]
    async fn bind_after_close_flag_set_is_refused_even_before_clear() {
        let inner = inner();
        // Reader has flagged the close but not yet cleared the bindings.
        inner.closed.store(true, Ordering::SeqCst);
        assert!(inner.bind("presence-main").await.is_err());
        assert!(inner.bindings.read().await.is_empty());
    }

    #[test]
    fn parse_decodes_string_encoded_data() {
        let frame = Frame::parse(
            r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"123.456\",\"activity_timeout\":120}"}"#,
        )
        .unwrap();
        assert_eq!(frame.data["socket_id"], "123.456");
        assert!(frame.channel.is_none());
    }

    #[test]
    fn parse_keeps_plain_string_data() {
        let frame = Frame::parse(r#"{"event":"client-note","channel":"c","data":"hello"}"#).unwrap();
        assert_eq!(frame.data, json!("hello"));
    }

    #[test]
    fn url_includes_protocol_and_key() {
        let options = PusherOptions {
            key: "abc".to_string(),
            host: "ws-us2.pusher.com".to_string(),
            use_tls: true,
            auth_endpoint: "http://localhost/pusher/auth".to_string(),
            auth_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(1),
            reconnect: ReconnectPolicy::none(),
        };
        let url = options.url();
        assert!(url.starts_with("wss://ws-us2.pusher.com/app/abc?protocol=7&client=rust"));
        let plain = PusherOptions {
            use_tls: false,
            ..options
        };
        assert!(plain.url().starts_with("ws://"));
    }

    #[test]
    fn presence_snapshot_becomes_members_in_ids_order() {
        let me = PresenceData::new("2.2", "Bob");
        let frame = presence_frame(json!({
            "presence": {
                "ids": ["1.1", "2.2"],
                "hash": { "2.2": { "name": "Bob" }, "1.1": { "name": "Alice" } },
                "count": 2
            }
        }));
        let event = translate(frame, Some(&me)).unwrap();
        assert_eq!(event.event, SUBSCRIPTION_SUCCEEDED);
        assert_eq!(
            event.data,
            json!({
                "me": { "id": "2.2", "info": { "name": "Bob" } },
                "members": [
                    { "id": "1.1", "info": { "name": "Alice" } },
                    { "id": "2.2", "info": { "name": "Bob" } }
                ]
            })
        );
    }

    #[test]
    fn me_falls_back_to_granted_identity() {
        let me = PresenceData::new("3.3", "Carol");
        let frame = presence_frame(json!({ "presence": { "ids": [], "hash": {}, "count": 0 } }));
        let event = translate(frame, Some(&me)).unwrap();
        assert_eq!(event.data["me"], json!({ "id": "3.3", "info": { "name": "Carol" } }));
    }

    #[test]
    fn presence_success_without_grant_is_an_error() {
        let frame = presence_frame(json!({ "presence": { "ids": [], "hash": {} } }));
        let event = translate(frame, None).unwrap();
        assert_eq!(event.event, SUBSCRIPTION_ERROR);
        assert_eq!(event.data["type"], "PresenceError");
    }

    #[test]
    fn member_events_are_renamed() {
        let added = translate(
            Frame {
                event: "pusher_internal:member_added".to_string(),
                channel: Some("presence-main".to_string()),
                data: json!({ "user_id": "4.4", "user_info": { "name": "Dan" } }),
            },
            None,
        )
        .unwrap();
        assert_eq!(added.event, MEMBER_ADDED);
        assert_eq!(added.data, json!({ "id": "4.4", "info": { "name": "Dan" } }));

        let removed = translate(
            Frame {
                event: "pusher_internal:member_removed".to_string(),
                channel: Some("presence-main".to_string()),
                data: json!({ "user_id": "4.4" }),
            },
            None,
        )
        .unwrap();
        assert_eq!(removed.event, MEMBER_REMOVED);
        assert_eq!(removed.data["id"], "4.4");
    }

    #[test]
    fn internal_events_are_hidden_and_others_pass_through() {
        let hidden = Frame {
            event: "pusher_internal:something_new".to_string(),
            channel: Some("presence-main".to_string()),
            data: json!({}),
        };
        assert!(translate(hidden, None).is_none());

        let custom = Frame {
            event: "client-typing".to_string(),
            channel: Some("presence-main".to_string()),
            data: json!({ "who": "1.1" }),
        };
        let event = translate(custom, None).unwrap();
        assert_eq!(event, RawEvent::new("client-typing", json!({ "who": "1.1" })));
    }

    #[test]
    fn auth_error_shape() {
        let event = auth_error(401, "Password didn't match");
        assert_eq!(event.event, SUBSCRIPTION_ERROR);
        assert_eq!(
            event.data,
            json!({ "type": "AuthError", "error": "Password didn't match", "status": 401 })
        );
    }
}
