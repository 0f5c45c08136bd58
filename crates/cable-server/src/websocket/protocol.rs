//! Wire protocol: inbound command envelopes and outbound replies.
//!
//! Inbound (client → server):
//!
//! ```json
//! {"command": "subscribe", "identifier": {"channel": "NotesChannel"},
//!  "data": {"noteable_type": "issue", "noteable_id": "42"}}
//! ```
//!
//! The identifier is a closed tagged enum; an unknown channel name fails
//! envelope parsing rather than reaching any dispatch logic.
//!
//! Outbound (server → client): protocol replies are a tagged enum; data
//! payloads emitted by handlers are plain JSON objects with the channel's
//! param bag merged in (see [`merge_params`]).

use cable_core::errors::WireError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Client → server command envelope.
#[derive(Clone, Debug, Deserialize)]
pub struct Envelope {
    /// What the client wants to do.
    pub command: Command,
    /// Which channel variant the command addresses.
    pub identifier: ChannelIdentifier,
    /// Handler-specific parameters.
    #[serde(default)]
    pub data: Value,
}

/// Commands a client may issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Establish (or extend, for GraphQL) a subscription.
    Subscribe,
    /// Tear the subscription down.
    Unsubscribe,
}

/// Closed set of channel selectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel")]
pub enum ChannelIdentifier {
    /// GraphQL query subscriptions.
    #[serde(rename = "GraphqlChannel")]
    Graphql,
    /// Object-notification ("noteable") streams.
    #[serde(rename = "NotesChannel")]
    Notes,
}

/// Server → client protocol replies.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    /// Sent once after successful authentication.
    Welcome,
    /// A subscribe command was accepted.
    Confirmed {
        /// The identifier the client subscribed with.
        identifier: ChannelIdentifier,
    },
    /// A command was rejected; the socket stays open.
    Rejected {
        /// Structured failure detail.
        error: WireError,
    },
}

impl Reply {
    /// Serialize for the wire. Replies are static shapes; serialization
    /// cannot fail for any constructible value.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Merge a channel's param bag into an outbound payload.
///
/// The bag travels nested under a `params` key with the payload's keys
/// beside it; handler payload keys win on conflict, so a payload carrying
/// its own `params` shadows the bag. A non-object payload is wrapped under
/// a `message` key.
#[must_use]
pub fn merge_params(params: &Map<String, Value>, payload: &Value) -> Value {
    let mut merged = Map::new();
    let _ = merged.insert("params".to_owned(), Value::Object(params.clone()));
    match payload {
        Value::Object(fields) => {
            for (k, v) in fields {
                let _ = merged.insert(k.clone(), v.clone());
            }
        }
        other => {
            let _ = merged.insert("message".to_owned(), other.clone());
        }
    }
    Value::Object(merged)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
