//! Server configuration for the cable subsystem.
//!
//! Loading (env, files, CLI) is the host application's concern; this crate
//! only defines the shape and the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default periodic re-validation interval for subscribed channels.
pub const DEFAULT_REVALIDATION_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Tunables for the WebSocket subsystem.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Capacity of each connection's outbound message queue. A full queue
    /// fails the send, which evicts the channel from the hub.
    pub outbound_queue_capacity: usize,

    /// Maximum accepted inbound frame size in bytes.
    pub max_frame_bytes: usize,

    /// Browser origins allowed to upgrade. Cross-origin requests not on
    /// this list are rejected before authentication; requests without an
    /// Origin header (non-browser clients) are admitted.
    pub allowed_origins: Vec<String>,

    /// Interval between authorization re-validations of a subscribed
    /// channel.
    #[serde(with = "seconds")]
    pub revalidation_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 64,
            max_frame_bytes: 1024 * 1024,
            allowed_origins: Vec::new(),
            revalidation_interval: DEFAULT_REVALIDATION_INTERVAL,
        }
    }
}

impl ServerConfig {
    /// Whether the given Origin header value may upgrade.
    ///
    /// `None` means the client sent no Origin header (CLI or native
    /// clients) and is admitted to authentication.
    #[must_use]
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(o) => self.allowed_origins.iter().any(|allowed| allowed == o),
        }
    }
}

mod seconds {
    //! Serialize `Duration` as whole seconds in config files.

    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
