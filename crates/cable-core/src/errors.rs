//! Error taxonomy for the cable subsystem.
//!
//! One [`CableError`] enum covers the whole subsystem, built on
//! [`thiserror`]. Variants fall into three bands:
//!
//! - connection-fatal: [`CableError::Unauthorized`]
//! - protocol-level, reported to the caller while the socket stays open:
//!   `NotSubscribed`, `InvalidRequest`, `MissingParameter`,
//!   `InvalidParameter`, `NotFound`
//! - collaborator/delivery failures: `LookupFailed`, `ExecutionFailed`
//!   (logged with detail, surfaced generically) and `DeliveryFailed`
//!   (triggers hub-side eviction of the one affected channel)
//!
//! Every variant carries a machine-readable wire code so failure replies
//! never depend on string matching.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed source error from an external collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error type for the cable subsystem.
#[derive(Debug, Error)]
pub enum CableError {
    /// Neither bearer token nor session cookie resolved a user.
    #[error("unauthorized")]
    Unauthorized,

    /// A send was attempted on a channel that is not subscribed.
    #[error("channel is not subscribed")]
    NotSubscribed,

    /// The subscribe payload could not be parsed into a typed request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A required subscribe parameter was absent.
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    /// A subscribe parameter was present but malformed.
    #[error("invalid parameter {name}: {value:?}")]
    InvalidParameter {
        /// Parameter name as it appears on the wire.
        name: &'static str,
        /// The rejected raw value.
        value: String,
    },

    /// The finder resolved nothing for the given identity parameters.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The finder itself failed.
    #[error("lookup failed")]
    LookupFailed(#[source] BoxError),

    /// The schema-execution backend failed.
    #[error("execution failed")]
    ExecutionFailed(#[source] BoxError),

    /// The outbound socket queue rejected the message (dead or gone peer).
    #[error("delivery failed")]
    DeliveryFailed,

    /// Outbound payload could not be serialized.
    #[error("serialization failed")]
    Serialization(#[from] serde_json::Error),
}

impl CableError {
    /// Machine-readable code used in failure replies and logs.
    #[must_use]
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotSubscribed => "NOT_SUBSCRIBED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::MissingParameter(_) => "MISSING_PARAMETER",
            Self::InvalidParameter { .. } => "INVALID_PARAMETER",
            Self::NotFound(_) => "NOT_FOUND",
            Self::LookupFailed(_) => "LOOKUP_FAILED",
            Self::ExecutionFailed(_) => "EXECUTION_FAILED",
            Self::DeliveryFailed => "DELIVERY_FAILED",
            Self::Serialization(_) => "SERIALIZATION_FAILED",
        }
    }

    /// True when the error ends the connection attempt outright.
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Message safe to send to the remote caller.
    ///
    /// Collaborator failures are surfaced generically; the detail stays in
    /// the server-side log.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::LookupFailed(_) | Self::ExecutionFailed(_) | Self::Serialization(_) => {
                "internal error".to_owned()
            }
            other => other.to_string(),
        }
    }
}

/// Wire shape of a failure reply body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Machine-readable code, one of [`CableError::wire_code`].
    pub code: String,
    /// Human-readable message, sanitized via [`CableError::public_message`].
    pub message: String,
}

impl From<&CableError> for WireError {
    fn from(err: &CableError) -> Self {
        Self {
            code: err.wire_code().to_owned(),
            message: err.public_message(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
