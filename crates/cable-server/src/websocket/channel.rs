//! Per-connection subscription unit.
//!
//! A channel owns its param bag, its subscribed flag, one cancellable
//! scope, and the protocol handler variant chosen at construction. The
//! connection's read loop is the single driver of `subscribe`/`unsubscribe`;
//! `send` may additionally be called by the hub's broadcast path, so the
//! state it touches is atomic or lock-guarded.
//!
//! Teardown discipline: explicit unsubscribe, a delivery failure, and a
//! failed re-validation all converge on the same path — handler cleanup,
//! scope cancellation, hub deregistration, socket close — and every step is
//! idempotent, because an explicit unsubscribe and a hub eviction may race.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cable_core::{CableError, ChannelId, LogPayload};
use metrics::counter;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::auth::{Authenticator, REQUIRED_SCOPES};
use crate::metrics::CHANNEL_REVALIDATION_FAILURES_TOTAL;
use crate::websocket::channels::ChannelHandler;
use crate::websocket::connection::Connection;
use crate::websocket::hub::Hub;
use crate::websocket::protocol::{ChannelIdentifier, merge_params};

/// One subscription channel multiplexed over one connection.
pub struct Channel {
    /// Registry key.
    pub id: ChannelId,
    identifier: ChannelIdentifier,
    conn: Arc<Connection>,
    hub: Arc<Hub>,
    handler: Mutex<ChannelHandler>,
    params: Map<String, Value>,
    subscribed: AtomicBool,
    torn_down: AtomicBool,
    scope: CancellationToken,
    /// Routing key cache; kept outside the handler mutex so the hub's
    /// broadcast filter never contends with protocol dispatch.
    stream: parking_lot::RwLock<Option<String>>,
    authenticator: Arc<dyn Authenticator>,
    revalidation_interval: Duration,
}

impl Channel {
    /// Construct a channel for an authenticated connection.
    ///
    /// The param bag is taken from the connection's handshake parameters.
    #[must_use]
    pub fn new(
        handler: ChannelHandler,
        conn: Arc<Connection>,
        hub: Arc<Hub>,
        authenticator: Arc<dyn Authenticator>,
        revalidation_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ChannelId::new(),
            identifier: handler.identifier(),
            params: conn.meta().params.clone(),
            conn,
            hub,
            handler: Mutex::new(handler),
            subscribed: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            scope: CancellationToken::new(),
            stream: parking_lot::RwLock::new(None),
            authenticator,
            revalidation_interval,
        })
    }

    /// The identifier this channel was constructed for.
    #[must_use]
    pub fn identifier(&self) -> ChannelIdentifier {
        self.identifier
    }

    /// The owning connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Whether a subscribe has succeeded and no teardown event has fired.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Whether teardown has run.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Routing key of the resolved subscription target, when the protocol
    /// has one.
    #[must_use]
    pub fn stream_identifier(&self) -> Option<String> {
        self.stream.read().clone()
    }

    /// Log payload carrying this connection's correlation context.
    #[must_use]
    pub fn log_payload(&self) -> LogPayload {
        self.conn.log_payload()
    }

    /// Handle one subscribe request.
    ///
    /// The subscribed flag transitions only on handler success, so no
    /// broadcast can reach a channel that never finished subscribing; the
    /// handler's own reply goes through [`Channel::reply`], which does not
    /// consult the flag. The first success arms the periodic re-validation
    /// task; later subscribes (GraphQL channels accept one per distinct
    /// query) only reach the handler. A failed subscribe leaves the channel
    /// usable for a retry.
    pub async fn subscribe(self: &Arc<Self>, data: &Value) -> Result<(), CableError> {
        if self.is_torn_down() {
            return Err(CableError::NotSubscribed);
        }

        {
            let mut handler = self.handler.lock().await;
            handler.subscribe(self, data).await?;
            *self.stream.write() = handler.stream_identifier();
        }

        if !self.subscribed.swap(true, Ordering::AcqRel) {
            self.spawn_revalidation();
        }
        Ok(())
    }

    /// Tear the subscription down: handler cleanup, scope cancellation, hub
    /// deregistration (which closes the socket). No-op while Unsubscribed.
    pub async fn unsubscribe(&self) {
        self.run_handler_unsubscribe().await;
        self.hub.unregister(&self.id).await;
    }

    /// Queue one payload for the peer, with the channel's param bag merged
    /// in. Fails with `NotSubscribed` outside the subscribed window and
    /// with `DeliveryFailed` when the outbound queue rejects the frame.
    pub fn send(&self, payload: &Value) -> Result<(), CableError> {
        if !self.is_subscribed() {
            return Err(CableError::NotSubscribed);
        }
        self.reply(payload)
    }

    /// Queue one payload without consulting the subscribed flag. Handlers
    /// answer the subscribe that is still in flight through this path.
    pub(crate) fn reply(&self, payload: &Value) -> Result<(), CableError> {
        let merged = merge_params(&self.params, payload);
        let frame = serde_json::to_string(&merged)?;
        self.conn.send(Arc::new(frame))
    }

    /// Hub-side teardown; runs exactly once.
    ///
    /// Called by [`Hub::unregister`] after the channel has left the
    /// registry, so no broadcast can reach the channel once this starts.
    pub(crate) async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.run_handler_unsubscribe().await;
        self.conn.close();
        debug!(channel_id = %self.id, "channel torn down");
    }

    /// Shared half of unsubscribe/teardown: drop the subscribed flag, give
    /// the handler its cleanup pass, cancel the scope. Idempotent.
    async fn run_handler_unsubscribe(&self) {
        if !self.subscribed.swap(false, Ordering::AcqRel) {
            return;
        }
        let log = self.log_payload();
        {
            let mut handler = self.handler.lock().await;
            handler.unsubscribe(&log).await;
            *self.stream.write() = None;
        }
        self.scope.cancel();
    }

    /// Arm the periodic authorization re-validation task.
    ///
    /// The task stops on the next tick after the scope is cancelled, or
    /// immediately by its own exit after a failed validation.
    fn spawn_revalidation(self: &Arc<Self>) {
        let channel = Arc::clone(self);
        let scope = self.scope.clone();
        let period = self.revalidation_interval;
        drop(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                tokio::select! {
                    () = scope.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = channel.revalidate().await {
                            counter!(CHANNEL_REVALIDATION_FAILURES_TOTAL).increment(1);
                            channel
                                .log_payload()
                                .error("periodic token validation failed", &err);
                            channel.unsubscribe().await;
                            break;
                        }
                    }
                }
            }
        }));
    }

    /// Re-check that the connection's authorization still carries the
    /// required scopes.
    async fn revalidate(&self) -> Result<(), cable_core::errors::BoxError> {
        let Some(user) = self.conn.user() else {
            return Err("connection lost its authenticated user".into());
        };
        self.authenticator
            .validate_scopes(&user, REQUIRED_SCOPES)
            .await
    }

    /// Force the subscribed state for tests that exercise send/broadcast
    /// without running a protocol subscribe.
    #[cfg(test)]
    pub(crate) fn mark_subscribed(&self) {
        self.subscribed.store(true, Ordering::Release);
    }

    /// Set the routing key cache directly for hub targeting tests.
    #[cfg(test)]
    pub(crate) fn set_stream_for_tests(&self, stream: Option<String>) {
        *self.stream.write() = stream;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        FakeAuthenticator, FakeExecutor, FakeFinder, channel_with_parts, make_channel,
    };
    use crate::websocket::channels::HandlerDeps;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn notes_deps(finder: FakeFinder) -> HandlerDeps {
        HandlerDeps {
            executor: Arc::new(FakeExecutor::new()),
            finder: Arc::new(finder),
        }
    }

    #[tokio::test]
    async fn send_before_subscribe_fails() {
        let hub = Arc::new(Hub::new());
        let (channel, _rx) = channel_with_parts(
            &hub,
            ChannelIdentifier::Notes,
            notes_deps(FakeFinder::new()),
            FakeAuthenticator::new(),
        );

        assert_matches!(
            channel.send(&json!({"x": 1})),
            Err(CableError::NotSubscribed)
        );
    }

    #[tokio::test]
    async fn subscribe_then_send_merges_params() {
        let hub = Arc::new(Hub::new());
        let (channel, mut rx) = channel_with_parts(
            &hub,
            ChannelIdentifier::Notes,
            notes_deps(FakeFinder::new().with_object("issue", 42)),
            FakeAuthenticator::new(),
        );
        hub.register(Arc::clone(&channel)).await;

        channel
            .subscribe(&json!({"noteable_type": "issue", "noteable_id": "42"}))
            .await
            .unwrap();
        assert!(channel.is_subscribed());
        assert_eq!(channel.stream_identifier().as_deref(), Some("issue:42"));

        channel.send(&json!({"note": "hello"})).unwrap();
        let frame = rx.try_recv().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["note"], "hello");
        // handshake param bag rides along nested (set by channel_with_parts)
        assert_eq!(value["params"]["room"], "lobby");
    }

    #[tokio::test]
    async fn failed_subscribe_leaves_channel_usable() {
        let hub = Arc::new(Hub::new());
        let (channel, _rx) = channel_with_parts(
            &hub,
            ChannelIdentifier::Notes,
            notes_deps(FakeFinder::new().with_object("issue", 42)),
            FakeAuthenticator::new(),
        );
        hub.register(Arc::clone(&channel)).await;

        let err = channel
            .subscribe(&json!({"noteable_type": "issue"}))
            .await
            .unwrap_err();
        assert_matches!(err, CableError::MissingParameter("noteable_id"));
        assert!(!channel.is_subscribed());

        channel
            .subscribe(&json!({"noteable_type": "issue", "noteable_id": "42"}))
            .await
            .unwrap();
        assert!(channel.is_subscribed());
    }

    #[tokio::test]
    async fn first_subscribe_reply_is_delivered_before_flag_is_up() {
        // The handler's own reply travels outside the subscribed gate; the
        // flag itself transitions only on success.
        let hub = Arc::new(Hub::new());
        let deps = HandlerDeps {
            executor: Arc::new(FakeExecutor::new().with_subscription("sub-1")),
            finder: Arc::new(FakeFinder::new()),
        };
        let (channel, mut rx) = channel_with_parts(
            &hub,
            ChannelIdentifier::Graphql,
            deps,
            FakeAuthenticator::new(),
        );
        assert!(!channel.is_subscribed());

        channel
            .subscribe(&json!({"query": "subscription { a }"}))
            .await
            .unwrap();
        assert!(channel.is_subscribed());

        let frame = rx.try_recv().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["more"], true);
    }

    #[tokio::test]
    async fn failed_subscribe_never_raises_the_flag() {
        let hub = Arc::new(Hub::new());
        let deps = HandlerDeps {
            executor: Arc::new(FakeExecutor::new().failing()),
            finder: Arc::new(FakeFinder::new()),
        };
        let (channel, _rx) = channel_with_parts(
            &hub,
            ChannelIdentifier::Graphql,
            deps,
            FakeAuthenticator::new(),
        );

        let err = channel
            .subscribe(&json!({"query": "subscription { a }"}))
            .await
            .unwrap_err();
        assert_matches!(err, CableError::ExecutionFailed(_));
        assert!(!channel.is_subscribed());
        assert_matches!(
            channel.send(&json!({"x": 1})),
            Err(CableError::NotSubscribed)
        );
    }

    #[tokio::test]
    async fn unsubscribe_is_terminal_and_idempotent() {
        let hub = Arc::new(Hub::new());
        let executor = Arc::new(FakeExecutor::new().with_subscription("sub-1"));
        let deps = HandlerDeps {
            executor: executor.clone(),
            finder: Arc::new(FakeFinder::new()),
        };
        let (channel, _rx) = channel_with_parts(
            &hub,
            ChannelIdentifier::Graphql,
            deps,
            FakeAuthenticator::new(),
        );
        hub.register(Arc::clone(&channel)).await;

        channel
            .subscribe(&json!({"query": "subscription { a }"}))
            .await
            .unwrap();
        assert_eq!(hub.count(), 1);

        channel.unsubscribe().await;
        assert!(!channel.is_subscribed());
        assert!(channel.is_torn_down());
        assert!(channel.connection().is_closed());
        assert_eq!(hub.count(), 0);
        assert_eq!(executor.deleted().len(), 1);

        // double unsubscribe is a no-op
        channel.unsubscribe().await;
        assert_eq!(executor.deleted().len(), 1);

        assert_matches!(
            channel.send(&json!({"x": 1})),
            Err(CableError::NotSubscribed)
        );
    }

    #[tokio::test]
    async fn subscribe_after_teardown_is_rejected() {
        let hub = Arc::new(Hub::new());
        let (channel, _rx) = make_channel(&hub);
        let id = channel.id.clone();
        hub.register(Arc::clone(&channel)).await;
        hub.unregister(&id).await;

        assert_matches!(
            channel.subscribe(&json!({"query": "{ x }"})).await,
            Err(CableError::NotSubscribed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn revalidation_failure_unsubscribes_within_one_interval() {
        let hub = Arc::new(Hub::new());
        let auth = FakeAuthenticator::new().failing_scope_checks();
        let (channel, _rx) = channel_with_parts(
            &hub,
            ChannelIdentifier::Notes,
            notes_deps(FakeFinder::new().with_object("issue", 42)),
            auth,
        );
        hub.register(Arc::clone(&channel)).await;

        channel
            .subscribe(&json!({"noteable_type": "issue", "noteable_id": "42"}))
            .await
            .unwrap();
        assert!(channel.is_subscribed());

        // One interval later the task has validated, failed, and torn down.
        tokio::time::sleep(Duration::from_secs(601)).await;

        assert!(!channel.is_subscribed());
        assert!(channel.is_torn_down());
        assert_eq!(hub.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn revalidation_keeps_healthy_channel_subscribed() {
        let hub = Arc::new(Hub::new());
        let auth = FakeAuthenticator::new();
        let validations = auth.scope_checks();
        let (channel, _rx) = channel_with_parts(
            &hub,
            ChannelIdentifier::Notes,
            notes_deps(FakeFinder::new().with_object("issue", 42)),
            auth,
        );
        hub.register(Arc::clone(&channel)).await;

        channel
            .subscribe(&json!({"noteable_type": "issue", "noteable_id": "42"}))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(3 * 600 + 1)).await;
        assert!(channel.is_subscribed());
        assert_eq!(validations.load(std::sync::atomic::Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn revalidation_stops_after_unsubscribe() {
        let hub = Arc::new(Hub::new());
        let auth = FakeAuthenticator::new();
        let validations = auth.scope_checks();
        let (channel, _rx) = channel_with_parts(
            &hub,
            ChannelIdentifier::Notes,
            notes_deps(FakeFinder::new().with_object("issue", 42)),
            auth,
        );
        hub.register(Arc::clone(&channel)).await;

        channel
            .subscribe(&json!({"noteable_type": "issue", "noteable_id": "42"}))
            .await
            .unwrap();
        channel.unsubscribe().await;

        tokio::time::sleep(Duration::from_secs(5 * 600)).await;
        assert_eq!(validations.load(std::sync::atomic::Ordering::Relaxed), 0);
    }
}
