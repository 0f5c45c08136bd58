//! Per-connection protocol dispatch.
//!
//! The read loop feeds every inbound text frame through one [`Dispatcher`].
//! The first subscribe envelope fixes the channel variant for the rest of
//! the connection's life; later envelopes naming a different identifier are
//! rejected without disturbing the live subscription. Malformed frames are
//! answered with a rejection reply and the socket stays open.

use std::sync::Arc;
use std::time::Duration;

use cable_core::CableError;
use cable_core::errors::WireError;
use tracing::debug;

use crate::auth::Authenticator;
use crate::websocket::channel::Channel;
use crate::websocket::channels::{ChannelHandler, HandlerDeps};
use crate::websocket::connection::Connection;
use crate::websocket::hub::Hub;
use crate::websocket::protocol::{Command, Envelope, Reply};

/// Routes inbound frames for one authenticated connection.
pub struct Dispatcher {
    conn: Arc<Connection>,
    hub: Arc<Hub>,
    deps: HandlerDeps,
    authenticator: Arc<dyn Authenticator>,
    revalidation_interval: Duration,
    channel: Option<Arc<Channel>>,
}

impl Dispatcher {
    /// New dispatcher with no channel yet.
    #[must_use]
    pub fn new(
        conn: Arc<Connection>,
        hub: Arc<Hub>,
        deps: HandlerDeps,
        authenticator: Arc<dyn Authenticator>,
        revalidation_interval: Duration,
    ) -> Self {
        Self {
            conn,
            hub,
            deps,
            authenticator,
            revalidation_interval,
            channel: None,
        }
    }

    /// The channel this connection established, once it has one.
    #[must_use]
    pub fn channel(&self) -> Option<&Arc<Channel>> {
        self.channel.as_ref()
    }

    /// Handle one inbound text frame.
    pub async fn dispatch(&mut self, raw: &str) {
        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.reject(&CableError::InvalidRequest(err.to_string()));
                return;
            }
        };

        match envelope.command {
            Command::Subscribe => self.subscribe(&envelope).await,
            Command::Unsubscribe => self.unsubscribe(&envelope).await,
        }
    }

    /// Tear down the connection's channel on socket close.
    pub async fn shutdown(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.unsubscribe().await;
        }
    }

    async fn subscribe(&mut self, envelope: &Envelope) {
        let channel = match &self.channel {
            Some(existing) if existing.identifier() == envelope.identifier => {
                Arc::clone(existing)
            }
            Some(existing) => {
                debug!(
                    channel_id = %existing.id,
                    "subscribe for a different channel identifier rejected"
                );
                self.reject(&CableError::InvalidRequest(
                    "connection already bound to a different channel".to_owned(),
                ));
                return;
            }
            None => {
                let handler = ChannelHandler::for_identifier(envelope.identifier, &self.deps);
                let channel = Channel::new(
                    handler,
                    Arc::clone(&self.conn),
                    Arc::clone(&self.hub),
                    Arc::clone(&self.authenticator),
                    self.revalidation_interval,
                );
                self.channel = Some(Arc::clone(&channel));
                channel
            }
        };

        // Registration waits for the handler to succeed: a channel that has
        // never subscribed must not be reachable by broadcasts, whose
        // delivery failures evict. Repeat registration is an insert no-op.
        match channel.subscribe(&envelope.data).await {
            Ok(()) => {
                self.hub.register(Arc::clone(&channel)).await;
                self.send_reply(&Reply::Confirmed {
                    identifier: envelope.identifier,
                });
            }
            Err(err) => {
                channel
                    .log_payload()
                    .with_param("code", err.wire_code())
                    .error("subscribe rejected", &err);
                self.reject(&err);
            }
        }
    }

    async fn unsubscribe(&mut self, envelope: &Envelope) {
        match self.channel.take() {
            Some(channel) if channel.identifier() == envelope.identifier => {
                channel.unsubscribe().await;
            }
            Some(channel) => {
                // wrong identifier; keep the live channel
                self.channel = Some(channel);
                self.reject(&CableError::NotSubscribed);
            }
            None => self.reject(&CableError::NotSubscribed),
        }
    }

    fn send_reply(&self, reply: &Reply) {
        // Replies bypass the subscribed gate; dead-peer errors surface on
        // the next broadcast instead.
        let _ = self.conn.send(Arc::new(reply.to_json()));
    }

    fn reject(&self, err: &CableError) {
        self.send_reply(&Reply::Rejected {
            error: WireError::from(err),
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
