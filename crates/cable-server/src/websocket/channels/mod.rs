//! Closed set of subscription handler variants.
//!
//! Protocol-specific behavior lives behind one capability surface —
//! subscribe, unsubscribe, optional stream identifier — modeled as an enum
//! rather than trait objects so the set of protocols is closed at compile
//! time. The variant is chosen once, from the identifier of the envelope
//! that constructs the channel.

pub mod graphql;
pub mod noteable;

use std::sync::Arc;

use cable_core::{CableError, LogPayload};
use serde_json::Value;

use crate::websocket::channel::Channel;
use crate::websocket::protocol::ChannelIdentifier;

use graphql::{GraphqlHandler, SubscriptionExecutor};
use noteable::{NoteableFinder, NoteableHandler};

/// Collaborators a handler variant may need, injected by the host.
#[derive(Clone)]
pub struct HandlerDeps {
    /// Schema-execution capability for GraphQL subscriptions.
    pub executor: Arc<dyn SubscriptionExecutor>,
    /// Domain-object lookup for notification subscriptions.
    pub finder: Arc<dyn NoteableFinder>,
}

/// One protocol handler bound to one channel.
pub enum ChannelHandler {
    /// GraphQL query subscriptions.
    Graphql(GraphqlHandler),
    /// Object-notification streams.
    Notes(NoteableHandler),
}

impl ChannelHandler {
    /// Construct the variant selected by a channel identifier.
    #[must_use]
    pub fn for_identifier(identifier: ChannelIdentifier, deps: &HandlerDeps) -> Self {
        match identifier {
            ChannelIdentifier::Graphql => {
                Self::Graphql(GraphqlHandler::new(Arc::clone(&deps.executor)))
            }
            ChannelIdentifier::Notes => {
                Self::Notes(NoteableHandler::new(Arc::clone(&deps.finder)))
            }
        }
    }

    /// The identifier this handler answers to.
    #[must_use]
    pub fn identifier(&self) -> ChannelIdentifier {
        match self {
            Self::Graphql(_) => ChannelIdentifier::Graphql,
            Self::Notes(_) => ChannelIdentifier::Notes,
        }
    }

    /// Handle a subscribe request.
    pub async fn subscribe(
        &mut self,
        channel: &Channel,
        data: &Value,
    ) -> Result<(), CableError> {
        match self {
            Self::Graphql(h) => h.subscribe(channel, data).await,
            Self::Notes(h) => h.subscribe(channel, data).await,
        }
    }

    /// Handle an unsubscribe request. Best-effort; never fails.
    pub async fn unsubscribe(&mut self, log: &LogPayload) {
        match self {
            Self::Graphql(h) => h.unsubscribe(log).await,
            Self::Notes(h) => h.unsubscribe(log).await,
        }
    }

    /// Routing key for targeted broadcasts, when this protocol has one.
    #[must_use]
    pub fn stream_identifier(&self) -> Option<String> {
        match self {
            Self::Graphql(_) => None,
            Self::Notes(h) => h.stream_identifier(),
        }
    }
}
