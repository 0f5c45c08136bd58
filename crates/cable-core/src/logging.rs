//! Structured logging with `tracing`.
//!
//! Two pieces:
//!
//! - [`init_subscriber`] installs the global `tracing` subscriber. It is
//!   called explicitly once at process startup; there is no lazily
//!   initialized logger singleton and no hidden global state beyond the
//!   subscriber `tracing` itself owns.
//! - [`LogPayload`] is the correlation payload attached to every record the
//!   subsystem emits: correlation id, optional user identity, remote IP,
//!   user agent, and a free-form JSON parameter map. A payload is built
//!   once per connection and cheaply cloned/extended per call site.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::ids::CorrelationId;

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at application startup. Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Minimum log level when `RUST_LOG` is unset, e.g. `"info"`.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init is a no-op if a subscriber is already set
    let _ = subscriber.try_init();
}

/// Correlation payload for one log record.
///
/// Immutable once emitted; extension methods consume and return `self` so a
/// base payload can be specialized per call site without mutation.
#[derive(Clone, Debug, Default, Serialize)]
pub struct LogPayload {
    /// Per-request identifier for traceability.
    pub correlation_id: CorrelationId,
    /// Authenticated user id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    /// Authenticated username, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Remote peer address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,
    /// Client user agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Free-form parameters for the specific event.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl LogPayload {
    /// Payload carrying only a correlation id.
    #[must_use]
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            ..Self::default()
        }
    }

    /// Attach the authenticated user identity.
    #[must_use]
    pub fn with_user(mut self, id: i64, username: impl Into<String>) -> Self {
        self.user_id = Some(id);
        self.username = Some(username.into());
        self
    }

    /// Attach the remote peer address.
    #[must_use]
    pub fn with_remote_ip(mut self, ip: impl Into<String>) -> Self {
        self.remote_ip = Some(ip.into());
        self
    }

    /// Attach the client user agent.
    #[must_use]
    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Add one free-form parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let _ = self.params.insert(key.into(), value.into());
        self
    }

    /// Render the payload as a single JSON field value.
    fn render(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }

    /// Emit at info level.
    pub fn info(&self, message: &str) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            payload = %self.render(),
            "{message}"
        );
    }

    /// Emit at debug level.
    pub fn debug(&self, message: &str) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            payload = %self.render(),
            "{message}"
        );
    }

    /// Emit at error level with the failure chained in.
    pub fn error(&self, message: &str, error: &dyn std::fmt::Display) {
        tracing::error!(
            correlation_id = %self.correlation_id,
            payload = %self.render(),
            error = %error,
            "{message}"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
