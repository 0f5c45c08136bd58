//! One inbound duplex connection: request metadata, authentication, and
//! the outbound message queue.
//!
//! A [`Connection`] does not own the socket. The upgrade handler splits the
//! socket into a writer task draining the outbound queue and a read loop
//! driving protocol dispatch; the `Connection` is the handle both sides
//! (and the hub) share. `send` is non-blocking: a full or closed queue is a
//! delivery failure, which the hub turns into an eviction.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderMap;
use cable_core::{CableError, ConnectionId, CorrelationId, LogPayload};
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthenticatedUser, Authenticator, parse_bearer};

/// Session cookie consulted when no bearer token resolves a user.
pub const SESSION_COOKIE: &str = "_app_session";

/// Correlation id header honored when the caller supplies one.
pub const CORRELATION_HEADER: &str = "x-request-id";

/// Metadata captured from the upgrade request before the socket exists.
#[derive(Clone, Debug, Default)]
pub struct RequestMeta {
    /// Remote peer address, when the listener provides one.
    pub remote_addr: Option<String>,
    /// `User-Agent` header.
    pub user_agent: Option<String>,
    /// `Origin` header, checked against the allow-list before upgrade.
    pub origin: Option<String>,
    /// Raw `Authorization` header.
    pub authorization: Option<String>,
    /// Value of the session cookie, when present.
    pub session_cookie: Option<String>,
    /// Per-request identifier propagated into every log record.
    pub correlation_id: CorrelationId,
    /// Handshake query parameters; becomes the channel's param bag.
    pub params: Map<String, Value>,
}

impl RequestMeta {
    /// Capture metadata from the upgrade request parts.
    #[must_use]
    pub fn from_request(
        headers: &HeaderMap,
        remote_addr: Option<SocketAddr>,
        query: Option<&str>,
    ) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(ToOwned::to_owned)
        };

        let correlation_id = header(CORRELATION_HEADER)
            .map_or_else(CorrelationId::new, CorrelationId::from);

        Self {
            remote_addr: remote_addr.map(|a| a.to_string()),
            user_agent: header("user-agent"),
            origin: header("origin"),
            authorization: header("authorization"),
            session_cookie: headers
                .get("cookie")
                .and_then(|v| v.to_str().ok())
                .and_then(|cookies| cookie_value(cookies, SESSION_COOKIE)),
            correlation_id,
            params: query.map(parse_query).unwrap_or_default(),
        }
    }

    /// Base log payload for this request.
    #[must_use]
    pub fn log_payload(&self) -> LogPayload {
        let mut payload = LogPayload::new(self.correlation_id.clone());
        if let Some(ip) = &self.remote_addr {
            payload = payload.with_remote_ip(ip.clone());
        }
        if let Some(ua) = &self.user_agent {
            payload = payload.with_user_agent(ua.clone());
        }
        payload
    }
}

/// Pull one cookie value out of a `Cookie` header.
fn cookie_value(cookies: &str, name: &str) -> Option<String> {
    cookies.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then(|| v.to_owned())
    })
}

/// Parse handshake query parameters into a JSON param bag.
fn parse_query(query: &str) -> Map<String, Value> {
    let decode = |s: &str| percent_decode_str(s).decode_utf8_lossy().into_owned();
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode(k), Value::String(decode(v))),
            None => (decode(pair), Value::String(String::new())),
        })
        .collect()
}

/// Shared handle for one accepted connection.
pub struct Connection {
    /// Unique id for registry keys and logs.
    pub id: ConnectionId,
    meta: RequestMeta,
    user: parking_lot::RwLock<Option<AuthenticatedUser>>,
    outbound: mpsc::Sender<Arc<String>>,
    closer: CancellationToken,
    close_reason: parking_lot::RwLock<Option<&'static str>>,
}

impl Connection {
    /// Wrap an accepted socket's outbound queue.
    #[must_use]
    pub fn new(meta: RequestMeta, outbound: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id: ConnectionId::new(),
            meta,
            user: parking_lot::RwLock::new(None),
            outbound,
            closer: CancellationToken::new(),
            close_reason: parking_lot::RwLock::new(None),
        }
    }

    /// Authenticate the remote caller.
    ///
    /// Methods are tried in a fixed order: bearer token from the
    /// Authorization header, then session cookie. A method that resolves
    /// nothing — including a malformed header, an unknown token, or a
    /// lookup error — falls through to the next; `Unauthorized` only when
    /// both are exhausted.
    pub async fn connect(
        &self,
        authenticator: &dyn Authenticator,
    ) -> Result<AuthenticatedUser, CableError> {
        if let Some(token) = self.meta.authorization.as_deref().and_then(parse_bearer) {
            match authenticator.user_from_token(token).await {
                Ok(Some(user)) => {
                    *self.user.write() = Some(user.clone());
                    return Ok(user);
                }
                Ok(None) => {}
                Err(err) => self
                    .meta
                    .log_payload()
                    .debug(&format!("bearer token lookup failed: {err}")),
            }
        }

        if let Some(session) = self.meta.session_cookie.as_deref() {
            match authenticator.user_from_session(session).await {
                Ok(Some(user)) => {
                    *self.user.write() = Some(user.clone());
                    return Ok(user);
                }
                Ok(None) => {}
                Err(err) => self
                    .meta
                    .log_payload()
                    .debug(&format!("session lookup failed: {err}")),
            }
        }

        Err(CableError::Unauthorized)
    }

    /// The negotiated user, once `connect` has succeeded.
    #[must_use]
    pub fn user(&self) -> Option<AuthenticatedUser> {
        self.user.read().clone()
    }

    /// Queue one framed message for the writer task.
    pub fn send(&self, frame: Arc<String>) -> Result<(), CableError> {
        if self.closer.is_cancelled() {
            return Err(CableError::DeliveryFailed);
        }
        self.outbound
            .try_send(frame)
            .map_err(|_| CableError::DeliveryFailed)
    }

    /// Force-close the connection. Idempotent; the writer task observes the
    /// token, sends a close frame, and exits.
    pub fn close(&self) {
        self.closer.cancel();
    }

    /// Force-close with an explicit reason for the close frame. The first
    /// reason set wins; `close` afterwards is still a no-op.
    pub fn close_with_reason(&self, reason: &'static str) {
        {
            let mut slot = self.close_reason.write();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.closer.cancel();
    }

    /// Reason the writer task puts in the close frame.
    #[must_use]
    pub fn close_reason(&self) -> &'static str {
        self.close_reason.read().unwrap_or("closed")
    }

    /// Whether `close` has been invoked.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled()
    }

    /// Token the writer task selects on alongside the outbound queue.
    #[must_use]
    pub fn close_signal(&self) -> CancellationToken {
        self.closer.clone()
    }

    /// Captured upgrade-request metadata.
    #[must_use]
    pub fn meta(&self) -> &RequestMeta {
        &self.meta
    }

    /// Install an authenticated user directly, bypassing `connect`.
    #[cfg(test)]
    pub(crate) fn set_user_for_tests(&self, user: AuthenticatedUser) {
        *self.user.write() = Some(user);
    }

    /// Log payload including the authenticated user, when known.
    #[must_use]
    pub fn log_payload(&self) -> LogPayload {
        let payload = self.meta.log_payload();
        match self.user() {
            Some(user) => payload.with_user(user.id, user.username),
            None => payload,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
