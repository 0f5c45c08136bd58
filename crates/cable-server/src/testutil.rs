//! Hand-rolled fake collaborators and channel builders shared across unit
//! tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cable_core::SubscriptionId;
use cable_core::errors::BoxError;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::auth::{AuthenticatedUser, Authenticator};
use crate::websocket::channel::Channel;
use crate::websocket::channels::graphql::{
    ExecutionOutcome, GraphqlRequest, SubscriptionExecutor,
};
use crate::websocket::channels::noteable::{Noteable, NoteableFinder, NoteableParams};
use crate::websocket::channels::{ChannelHandler, HandlerDeps};
use crate::websocket::connection::{Connection, RequestMeta};
use crate::websocket::hub::Hub;
use crate::websocket::protocol::ChannelIdentifier;

const TEST_REVALIDATION_INTERVAL: Duration = Duration::from_secs(600);

// ─────────────────────────────────────────────────────────────────────────────
// FakeAuthenticator
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory authenticator with togglable failure modes.
pub(crate) struct FakeAuthenticator {
    tokens: HashMap<String, AuthenticatedUser>,
    sessions: HashMap<String, AuthenticatedUser>,
    fail_tokens: bool,
    fail_scopes: bool,
    scope_checks: Arc<AtomicUsize>,
}

impl FakeAuthenticator {
    pub(crate) fn new() -> Self {
        Self {
            tokens: HashMap::new(),
            sessions: HashMap::new(),
            fail_tokens: false,
            fail_scopes: false,
            scope_checks: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_token(mut self, token: &str, id: i64, username: &str) -> Self {
        let _ = self.tokens.insert(
            token.to_owned(),
            AuthenticatedUser {
                id,
                username: username.to_owned(),
            },
        );
        self
    }

    pub(crate) fn with_session(mut self, session: &str, id: i64, username: &str) -> Self {
        let _ = self.sessions.insert(
            session.to_owned(),
            AuthenticatedUser {
                id,
                username: username.to_owned(),
            },
        );
        self
    }

    /// Every token lookup errors (backend down).
    pub(crate) fn failing_tokens(mut self) -> Self {
        self.fail_tokens = true;
        self
    }

    /// Every scope re-validation fails.
    pub(crate) fn failing_scope_checks(mut self) -> Self {
        self.fail_scopes = true;
        self
    }

    /// Counter of scope validations performed.
    pub(crate) fn scope_checks(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.scope_checks)
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn user_from_token(
        &self,
        token: &str,
    ) -> Result<Option<AuthenticatedUser>, BoxError> {
        if self.fail_tokens {
            return Err("token backend unavailable".into());
        }
        Ok(self.tokens.get(token).cloned())
    }

    async fn user_from_session(
        &self,
        session: &str,
    ) -> Result<Option<AuthenticatedUser>, BoxError> {
        Ok(self.sessions.get(session).cloned())
    }

    async fn validate_scopes(
        &self,
        _user: &AuthenticatedUser,
        _scopes: &[&str],
    ) -> Result<(), BoxError> {
        let _ = self.scope_checks.fetch_add(1, Ordering::Relaxed);
        if self.fail_scopes {
            return Err("token scope revoked".into());
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FakeExecutor
// ─────────────────────────────────────────────────────────────────────────────

/// Recording schema executor with togglable failure modes.
pub(crate) struct FakeExecutor {
    subscription_id: Option<String>,
    fail_execute: bool,
    fail_delete: bool,
    requests: parking_lot::Mutex<Vec<GraphqlRequest>>,
    deleted: parking_lot::Mutex<Vec<SubscriptionId>>,
}

impl FakeExecutor {
    pub(crate) fn new() -> Self {
        Self {
            subscription_id: None,
            fail_execute: false,
            fail_delete: false,
            requests: parking_lot::Mutex::new(Vec::new()),
            deleted: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Every execution opens a live subscription with this id.
    pub(crate) fn with_subscription(mut self, id: &str) -> Self {
        self.subscription_id = Some(id.to_owned());
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail_execute = true;
        self
    }

    pub(crate) fn failing_deletes(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub(crate) fn requests(&self) -> Vec<GraphqlRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn deleted(&self) -> Vec<SubscriptionId> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl SubscriptionExecutor for FakeExecutor {
    async fn execute(&self, request: &GraphqlRequest) -> Result<ExecutionOutcome, BoxError> {
        self.requests.lock().push(request.clone());
        if self.fail_execute {
            return Err("schema execution blew up".into());
        }
        Ok(ExecutionOutcome {
            result: json!({"data": null}),
            more: self.subscription_id.is_some(),
            subscription_id: self.subscription_id.clone().map(SubscriptionId::from),
        })
    }

    async fn delete_subscription(&self, id: &SubscriptionId) -> Result<(), BoxError> {
        self.deleted.lock().push(id.clone());
        if self.fail_delete {
            return Err("subscription store unavailable".into());
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FakeFinder
// ─────────────────────────────────────────────────────────────────────────────

/// Recording noteable finder resolving at most one object.
pub(crate) struct FakeFinder {
    object: Option<Noteable>,
    fail: bool,
    requests: parking_lot::Mutex<Vec<NoteableParams>>,
}

impl FakeFinder {
    pub(crate) fn new() -> Self {
        Self {
            object: None,
            fail: false,
            requests: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_object(mut self, kind: &str, id: i64) -> Self {
        self.object = Some(Noteable {
            kind: kind.to_owned(),
            id,
        });
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub(crate) fn requests(&self) -> Vec<NoteableParams> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl NoteableFinder for FakeFinder {
    async fn find(&self, params: &NoteableParams) -> Result<Option<Noteable>, BoxError> {
        self.requests.lock().push(params.clone());
        if self.fail {
            return Err("lookup backend unavailable".into());
        }
        Ok(self.object.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel builders
// ─────────────────────────────────────────────────────────────────────────────

fn test_meta() -> RequestMeta {
    let mut meta = RequestMeta::default();
    let _ = meta
        .params
        .insert("room".to_owned(), Value::String("lobby".to_owned()));
    meta
}

/// Build an unsubscribed channel from explicit parts.
pub(crate) fn channel_with_parts(
    hub: &Arc<Hub>,
    identifier: ChannelIdentifier,
    deps: HandlerDeps,
    authenticator: FakeAuthenticator,
) -> (Arc<Channel>, mpsc::Receiver<Arc<String>>) {
    channel_with_capacity_parts(hub, identifier, deps, authenticator, 32)
}

fn channel_with_capacity_parts(
    hub: &Arc<Hub>,
    identifier: ChannelIdentifier,
    deps: HandlerDeps,
    authenticator: FakeAuthenticator,
    capacity: usize,
) -> (Arc<Channel>, mpsc::Receiver<Arc<String>>) {
    let (tx, rx) = mpsc::channel(capacity);
    let conn = Arc::new(Connection::new(test_meta(), tx));
    conn.set_user_for_tests(AuthenticatedUser {
        id: 7,
        username: "dev".to_owned(),
    });
    let handler = ChannelHandler::for_identifier(identifier, &deps);
    let channel = Channel::new(
        handler,
        conn,
        Arc::clone(hub),
        Arc::new(authenticator),
        TEST_REVALIDATION_INTERVAL,
    );
    (channel, rx)
}

fn default_deps() -> HandlerDeps {
    HandlerDeps {
        executor: Arc::new(FakeExecutor::new()),
        finder: Arc::new(FakeFinder::new()),
    }
}

/// A notes channel already marked subscribed, for hub and send tests.
pub(crate) fn make_channel(hub: &Arc<Hub>) -> (Arc<Channel>, mpsc::Receiver<Arc<String>>) {
    make_channel_with_capacity(hub, 32)
}

/// Like [`make_channel`] with an explicit outbound queue capacity.
pub(crate) fn make_channel_with_capacity(
    hub: &Arc<Hub>,
    capacity: usize,
) -> (Arc<Channel>, mpsc::Receiver<Arc<String>>) {
    let (channel, rx) = channel_with_capacity_parts(
        hub,
        ChannelIdentifier::Notes,
        default_deps(),
        FakeAuthenticator::new(),
        capacity,
    );
    channel.mark_subscribed();
    (channel, rx)
}

/// A subscribed channel on a private hub, for handler tests that only need
/// somewhere to send replies.
pub(crate) fn subscribed_channel() -> (Arc<Channel>, mpsc::Receiver<Arc<String>>) {
    let hub = Arc::new(Hub::new());
    make_channel(&hub)
}
