//! Object-notification ("noteable") subscription handler.
//!
//! A client subscribes to notifications about one domain object (issue,
//! merge request, snippet, ...). The identity parameters arrive as strings
//! and are parsed loudly; the injected finder resolves the object, and the
//! derived stream identifier `<type>:<id>` lets the hub target broadcasts
//! at only the channels watching that object.

use std::sync::Arc;

use async_trait::async_trait;
use cable_core::errors::BoxError;
use cable_core::{CableError, LogPayload};
use serde_json::Value;

use crate::websocket::channel::Channel;

/// Typed identity parameters for one noteable lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoteableParams {
    /// Domain type, e.g. `"issue"`.
    pub noteable_type: String,
    /// Object id within its type.
    pub noteable_id: i64,
    /// Project scope, when the object lives in a project.
    pub project_id: Option<i64>,
    /// Group scope, when the object lives in a group.
    pub group_id: Option<i64>,
}

impl NoteableParams {
    /// Parse the subscribe payload, failing loudly on missing or malformed
    /// fields.
    pub fn parse(data: &Value) -> Result<Self, CableError> {
        Ok(Self {
            noteable_type: required_string(data, "noteable_type")?.to_owned(),
            noteable_id: required_int(data, "noteable_id")?,
            project_id: optional_int(data, "project_id")?,
            group_id: optional_int(data, "group_id")?,
        })
    }
}

fn required_string<'a>(data: &'a Value, name: &'static str) -> Result<&'a str, CableError> {
    data.get(name)
        .and_then(Value::as_str)
        .ok_or(CableError::MissingParameter(name))
}

fn required_int(data: &Value, name: &'static str) -> Result<i64, CableError> {
    let raw = required_string(data, name)?;
    raw.parse().map_err(|_| CableError::InvalidParameter {
        name,
        value: raw.to_owned(),
    })
}

fn optional_int(data: &Value, name: &'static str) -> Result<Option<i64>, CableError> {
    match data.get(name).and_then(Value::as_str) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| CableError::InvalidParameter {
                name,
                value: raw.to_owned(),
            }),
    }
}

/// A resolved domain object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Noteable {
    /// Domain type, lower-case.
    pub kind: String,
    /// Object id.
    pub id: i64,
}

impl Noteable {
    /// Routing key for targeted broadcasts.
    #[must_use]
    pub fn stream_identifier(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }
}

/// Domain-object lookup capability injected by the host application.
///
/// `Ok(None)` is an explicit miss; `Err` is a backend failure.
#[async_trait]
pub trait NoteableFinder: Send + Sync {
    /// Resolve the object identified by the typed parameters.
    async fn find(&self, params: &NoteableParams) -> Result<Option<Noteable>, BoxError>;
}

/// Object-notification variant of the channel handler.
pub struct NoteableHandler {
    finder: Arc<dyn NoteableFinder>,
    noteable: Option<Noteable>,
}

impl NoteableHandler {
    /// New handler bound to the given finder.
    #[must_use]
    pub fn new(finder: Arc<dyn NoteableFinder>) -> Self {
        Self {
            finder,
            noteable: None,
        }
    }

    /// The resolved object, once subscribed.
    #[must_use]
    pub fn noteable(&self) -> Option<&Noteable> {
        self.noteable.as_ref()
    }

    /// Routing key, present only while an object is resolved.
    #[must_use]
    pub fn stream_identifier(&self) -> Option<String> {
        self.noteable.as_ref().map(Noteable::stream_identifier)
    }

    /// Parse, resolve through the finder, and store the object.
    pub async fn subscribe(&mut self, channel: &Channel, data: &Value) -> Result<(), CableError> {
        let params = NoteableParams::parse(data)?;

        let noteable = self
            .finder
            .find(&params)
            .await
            .map_err(CableError::LookupFailed)?
            .ok_or(CableError::NotFound("noteable"))?;

        channel
            .log_payload()
            .with_param("noteable_type", params.noteable_type.clone())
            .with_param("noteable_id", params.noteable_id)
            .with_param("project_id", params.project_id)
            .with_param("group_id", params.group_id)
            .info("subscribed to notes channel");

        self.noteable = Some(noteable);
        Ok(())
    }

    /// Log teardown when an object was resolved; silent no-op otherwise.
    pub async fn unsubscribe(&mut self, log: &LogPayload) {
        if let Some(noteable) = self.noteable.take() {
            log.clone()
                .with_param("noteable_type", noteable.kind.clone())
                .with_param("noteable_id", noteable.id)
                .info("unsubscribed from notes channel");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
