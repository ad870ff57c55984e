//! One presence-channel subscription and its outbound event stream.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::client::normalizer::normalize;
use crate::client::transport::PresenceTransport;
use crate::client::AuthParams;
use crate::error::{AppError, AppResult};
use crate::models::channel::ChannelType;
use crate::models::event::{ChannelEvent, RawEvent, MEMBER_ADDED, MEMBER_REMOVED};
use crate::models::presence::{PresenceChannelState, PresenceMember, RawMember};

/// Default time a subscription may stay in `Connecting`.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Subscribed,
    /// Terminal for this connection attempt.
    Errored,
}

#[derive(Debug, Default)]
struct Shared {
    state: SessionState,
    presence: Option<PresenceChannelState>,
}

/// Subscribes to one presence channel and forwards the normalized outcome
/// (`SubscriptionSucceeded` or `SubscriptionError`) to `outbound`.
///
/// One session per channel name; subscribing the same channel twice is up to the caller to prevent.
pub struct SubscriptionSession<T> {
    channel: String,
    transport: Arc<T>,
    outbound: mpsc::Sender<ChannelEvent>,
    shared: Arc<RwLock<Shared>>,
    auth_timeout: Duration,
    driver: Option<JoinHandle<()>>,
}

impl<T: PresenceTransport> SubscriptionSession<T> {
    pub fn new(
        channel: impl Into<String>,
        transport: Arc<T>,
        outbound: mpsc::Sender<ChannelEvent>,
    ) -> Self {
        Self {
            channel: channel.into(),
            transport,
            outbound,
            shared: Arc::new(RwLock::new(Shared::default())),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            driver: None,
        }
    }

    pub fn with_auth_timeout(mut self, auth_timeout: Duration) -> Self {
        self.auth_timeout = auth_timeout;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn state(&self) -> SessionState {
        self.shared.read().await.state
    }

    /// Current membership, once subscribed.
    pub async fn presence(&self) -> Option<PresenceChannelState> {
        self.shared.read().await.presence.clone()
    }

    /// Bind the channel, then request the subscription. Returns without waiting
    /// for the outcome; the outcome arrives on the outbound stream.
    #[instrument(skip(self, params), fields(channel = %self.channel))]
    pub async fn connect(&mut self, params: AuthParams) -> AppResult<()> {
        if ChannelType::from_name(&self.channel) != ChannelType::Presence {
            return Err(AppError::Session(format!(
                "{} is not a presence channel",
                self.channel
            )));
        }
        {
            let mut shared = self.shared.write().await;
            if shared.state != SessionState::Idle {
                return Err(AppError::Session(format!(
                    "connect called while {:?}",
                    shared.state
                )));
            }
            shared.state = SessionState::Connecting;
        }

        let events = match self.transport.bind(&self.channel).await {
            Ok(events) => events,
            Err(e) => {
                self.shared.write().await.state = SessionState::Idle;
                return Err(e);
            }
        };
        let driver = Driver {
            channel: self.channel.clone(),
            outbound: self.outbound.clone(),
            shared: self.shared.clone(),
        };
        self.driver = Some(tokio::spawn(driver.clone().run(events, self.auth_timeout)));
        info!("subscription requested");

        if let Err(e) = self.transport.subscribe(&self.channel, &params).await {
            warn!(error = %e, "subscribe request failed");
            if let Some(handle) = self.driver.take() {
                handle.abort();
            }
            driver
                .fail_attempt(json!({ "reason": "subscribe failed", "error": e.to_string() }))
                .await;
        }
        Ok(())
    }
}

impl<T> Drop for SubscriptionSession<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.take() {
            handle.abort();
        }
    }
}

/// Callback side of a session: owns clones of the session's handles, nothing global.
#[derive(Clone)]
struct Driver {
    channel: String,
    outbound: mpsc::Sender<ChannelEvent>,
    shared: Arc<RwLock<Shared>>,
}

impl Driver {
    async fn run(self, mut events: mpsc::UnboundedReceiver<RawEvent>, auth_timeout: Duration) {
        let deadline = Instant::now() + auth_timeout;
        loop {
            let connecting = self.shared.read().await.state == SessionState::Connecting;
            let next = if connecting {
                match tokio::time::timeout_at(deadline, events.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(channel = %self.channel, ?auth_timeout, "subscription timed out");
                        self.fail_attempt(json!({ "reason": "timeout" })).await;
                        break;
                    }
                }
            } else {
                events.recv().await
            };
            let Some(raw) = next else {
                self.fail_attempt(json!({ "reason": "disconnected" })).await;
                break;
            };
            if !self.handle(raw).await {
                break;
            }
        }
        debug!(channel = %self.channel, "session driver stopped");
    }

    /// Returns whether to keep listening.
    async fn handle(&self, raw: RawEvent) -> bool {
        match raw.event.as_str() {
            MEMBER_ADDED => {
                self.member_added(&raw.data).await;
                return true;
            }
            MEMBER_REMOVED => {
                self.member_removed(&raw.data).await;
                return true;
            }
            _ => {}
        }

        let Some(event) = normalize(&self.channel, &raw) else {
            return true;
        };
        let accepted = {
            let mut shared = self.shared.write().await;
            match (&event, shared.state) {
                (
                    ChannelEvent::SubscriptionSucceeded { me, members, .. },
                    SessionState::Connecting,
                ) => {
                    shared.presence = Some(PresenceChannelState::new(
                        &self.channel,
                        me.clone(),
                        members.clone(),
                    ));
                    shared.state = SessionState::Subscribed;
                    true
                }
                (
                    ChannelEvent::SubscriptionError { .. },
                    SessionState::Connecting | SessionState::Subscribed,
                ) => {
                    shared.presence = None;
                    shared.state = SessionState::Errored;
                    true
                }
                (_, state) => {
                    debug!(channel = %self.channel, ?state, event = event.kind(), "outcome ignored");
                    false
                }
            }
        };
        if accepted && !self.emit(event).await {
            return false;
        }
        self.shared.read().await.state != SessionState::Errored
    }

    /// Error out the attempt if it has no outcome yet.
    async fn fail_attempt(&self, data: serde_json::Value) {
        {
            let mut shared = self.shared.write().await;
            if shared.state != SessionState::Connecting {
                return;
            }
            shared.state = SessionState::Errored;
        }
        self.emit(ChannelEvent::SubscriptionError {
            channel: self.channel.clone(),
            data,
        })
        .await;
    }

    async fn emit(&self, event: ChannelEvent) -> bool {
        if self.outbound.send(event).await.is_err() {
            warn!(channel = %self.channel, "event stream closed");
            return false;
        }
        true
    }

    async fn member_added(&self, data: &serde_json::Value) {
        let Ok(raw) = serde_json::from_value::<RawMember>(data.clone()) else {
            warn!(channel = %self.channel, "malformed member_added payload");
            return;
        };
        let mut shared = self.shared.write().await;
        if let Some(presence) = shared.presence.as_mut() {
            if presence.add_member(PresenceMember::from(&raw)) {
                debug!(channel = %self.channel, user_id = %raw.id, "member added");
            }
        }
    }

    async fn member_removed(&self, data: &serde_json::Value) {
        let Ok(raw) = serde_json::from_value::<RawMember>(data.clone()) else {
            warn!(channel = %self.channel, "malformed member_removed payload");
            return;
        };
        let mut shared = self.shared.write().await;
        if let Some(presence) = shared.presence.as_mut() {
            if presence.remove_member(&raw.id).is_some() {
                debug!(channel = %self.channel, user_id = %raw.id, "member removed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{SUBSCRIPTION_ERROR, SUBSCRIPTION_SUCCEEDED};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Delivers `on_subscribe` synchronously from inside `subscribe`.
    #[derive(Default)]
    struct MockTransport {
        sender: Mutex<Option<mpsc::UnboundedSender<RawEvent>>>,
        calls: Mutex<Vec<String>>,
        on_subscribe: Vec<RawEvent>,
        fail_subscribe: bool,
    }

    impl MockTransport {
        fn delivering(events: Vec<RawEvent>) -> Arc<Self> {
            Arc::new(Self {
                on_subscribe: events,
                ..Self::default()
            })
        }

        fn push(&self, event: RawEvent) {
            if let Some(tx) = self.sender.lock().unwrap().as_ref() {
                let _ = tx.send(event);
            }
        }

        fn close(&self) {
            self.sender.lock().unwrap().take();
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PresenceTransport for MockTransport {
        async fn bind(&self, channel: &str) -> AppResult<mpsc::UnboundedReceiver<RawEvent>> {
            self.calls.lock().unwrap().push(format!("bind {}", channel));
            let (tx, rx) = mpsc::unbounded_channel();
            *self.sender.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        async fn subscribe(&self, channel: &str, params: &AuthParams) -> AppResult<()> {
            self.calls.lock().unwrap().push(format!(
                "subscribe {} as {}",
                channel,
                params.get("name").cloned().unwrap_or_default()
            ));
            if self.fail_subscribe {
                return Err(AppError::Transport("connection closed".to_string()));
            }
            for event in &self.on_subscribe {
                self.push(event.clone());
            }
            Ok(())
        }
    }

    fn params() -> AuthParams {
        crate::client::auth_params("secret", "Alice")
    }

    fn succeeded() -> RawEvent {
        RawEvent::new(
            SUBSCRIPTION_SUCCEEDED,
            json!({
                "me": { "id": "a", "info": { "name": "Alice" } },
                "members": [
                    { "id": "a", "info": { "name": "Alice" } },
                    { "id": "b", "info": { "name": "Bob" } }
                ]
            }),
        )
    }

    async fn no_more_events(rx: &mut mpsc::Receiver<ChannelEvent>) {
        let next = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(next.is_err(), "unexpected event {:?}", next);
    }

    async fn eventually<F: Fn(&PresenceChannelState) -> bool>(
        session: &SubscriptionSession<MockTransport>,
        check: F,
    ) {
        for _ in 0..50 {
            if session.presence().await.as_ref().map(&check).unwrap_or(false) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("presence never reached expected state: {:?}", session.presence().await);
    }

    #[tokio::test]
    async fn success_emits_one_event_in_delivery_order() {
        let transport = MockTransport::delivering(vec![succeeded()]);
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = SubscriptionSession::new("presence-main", transport.clone(), tx);
        assert_eq!(session.state().await, SessionState::Idle);

        session.connect(params()).await.unwrap();

        match rx.recv().await.unwrap() {
            ChannelEvent::SubscriptionSucceeded { channel, me, members } => {
                assert_eq!(channel, "presence-main");
                assert_eq!(me, PresenceMember::new("a", "Alice"));
                let ids: Vec<_> = members.iter().map(|m| m.user_id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(session.state().await, SessionState::Subscribed);
        assert_eq!(
            transport.calls(),
            vec!["bind presence-main", "subscribe presence-main as Alice"]
        );
        no_more_events(&mut rx).await;
    }

    #[tokio::test]
    async fn error_emits_exactly_one_error_and_no_success() {
        let transport = MockTransport::delivering(vec![
            RawEvent::new(SUBSCRIPTION_ERROR, json!({ "message": "forbidden" })),
            succeeded(),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = SubscriptionSession::new("presence-main", transport, tx);
        session.connect(params()).await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelEvent::SubscriptionError {
                channel: "presence-main".to_string(),
                data: json!({ "message": "forbidden" }),
            }
        );
        no_more_events(&mut rx).await;
        assert_eq!(session.state().await, SessionState::Errored);
        assert!(session.presence().await.is_none());
    }

    #[tokio::test]
    async fn subscribed_session_errors_on_later_subscription_error() {
        let transport = MockTransport::delivering(vec![succeeded()]);
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = SubscriptionSession::new("presence-main", transport.clone(), tx);
        session.connect(params()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().kind(), SUBSCRIPTION_SUCCEEDED);
        assert_eq!(session.state().await, SessionState::Subscribed);

        transport.push(succeeded());
        transport.push(RawEvent::new(
            MEMBER_ADDED,
            json!({ "id": "c", "info": { "name": "Carol" } }),
        ));
        transport.push(RawEvent::new(SUBSCRIPTION_ERROR, json!({ "message": "kicked" })));

        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelEvent::SubscriptionError {
                channel: "presence-main".to_string(),
                data: json!({ "message": "kicked" }),
            }
        );
        assert_eq!(session.state().await, SessionState::Errored);
        assert!(session.presence().await.is_none());

        transport.push(RawEvent::new(SUBSCRIPTION_ERROR, json!({ "message": "again" })));
        transport.push(succeeded());
        no_more_events(&mut rx).await;
    }

    #[tokio::test]
    async fn unknown_events_are_not_forwarded() {
        let transport = MockTransport::delivering(vec![
            RawEvent::new("client-typing", json!({ "who": "b" })),
            succeeded(),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = SubscriptionSession::new("presence-main", transport, tx);
        session.connect(params()).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind(), SUBSCRIPTION_SUCCEEDED);
        no_more_events(&mut rx).await;
    }

    #[tokio::test]
    async fn hung_subscription_times_out() {
        let transport = MockTransport::delivering(vec![]);
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = SubscriptionSession::new("presence-main", transport.clone(), tx)
            .with_auth_timeout(Duration::from_millis(20));
        session.connect(params()).await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            ChannelEvent::SubscriptionError {
                channel: "presence-main".to_string(),
                data: json!({ "reason": "timeout" }),
            }
        );
        assert_eq!(session.state().await, SessionState::Errored);

        // A late success does not resurrect the attempt.
        transport.push(succeeded());
        no_more_events(&mut rx).await;
    }

    #[tokio::test]
    async fn closed_transport_while_connecting_is_an_error() {
        let transport = MockTransport::delivering(vec![]);
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = SubscriptionSession::new("presence-main", transport.clone(), tx);
        session.connect(params()).await.unwrap();
        transport.close();

        match rx.recv().await.unwrap() {
            ChannelEvent::SubscriptionError { data, .. } => assert_eq!(data["reason"], "disconnected"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_subscribe_request_is_an_error_event() {
        let transport = Arc::new(MockTransport {
            fail_subscribe: true,
            ..MockTransport::default()
        });
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = SubscriptionSession::new("presence-main", transport, tx);
        session.connect(params()).await.unwrap();

        match rx.recv().await.unwrap() {
            ChannelEvent::SubscriptionError { data, .. } => {
                assert_eq!(data["reason"], "subscribe failed")
            }
            other => panic!("unexpected {:?}", other),
        }
        no_more_events(&mut rx).await;
    }

    #[tokio::test]
    async fn membership_tracks_joins_and_leaves() {
        let transport = MockTransport::delivering(vec![succeeded()]);
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = SubscriptionSession::new("presence-main", transport.clone(), tx);
        session.connect(params()).await.unwrap();
        rx.recv().await.unwrap();

        transport.push(RawEvent::new(
            MEMBER_ADDED,
            json!({ "id": "c", "info": { "name": "Carol" } }),
        ));
        transport.push(RawEvent::new(MEMBER_REMOVED, json!({ "id": "b" })));

        eventually(&session, |p| {
            let ids: Vec<_> = p.members.iter().map(|m| m.user_id.as_str()).collect();
            ids == vec!["a", "c"]
        })
        .await;
        let presence = session.presence().await.unwrap();
        assert_eq!(presence.me.user_id, "a");
        no_more_events(&mut rx).await;
    }

    #[tokio::test]
    async fn connect_twice_is_rejected() {
        let transport = MockTransport::delivering(vec![]);
        let (tx, _rx) = mpsc::channel(8);
        let mut session = SubscriptionSession::new("presence-main", transport, tx);
        session.connect(params()).await.unwrap();
        let err = session.connect(params()).await.unwrap_err();
        assert!(matches!(err, AppError::Session(_)));
    }

    #[tokio::test]
    async fn non_presence_channel_is_rejected() {
        let transport = MockTransport::delivering(vec![]);
        let (tx, _rx) = mpsc::channel(8);
        let mut session = SubscriptionSession::new("private-main", transport.clone(), tx);
        assert!(session.connect(params()).await.is_err());
        assert!(transport.calls().is_empty());
        assert_eq!(session.state().await, SessionState::Idle);
    }
}
