//! WebSocket connection management, subscription channels, and broadcasting.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | Request metadata, authentication, outbound queue, forced close |
//! | `protocol` | Inbound command envelope, outbound reply framing |
//! | `handler` | Envelope parsing, channel construction, command dispatch |
//! | `channel` | Per-connection subscription unit and its re-validation task |
//! | `channels` | Closed set of protocol handler variants (GraphQL, noteable) |
//! | `hub` | Central registry and fan-out broadcaster |
//!
//! ## Data Flow
//!
//! upgrade → `connection` (auth) → read loop → `handler` (dispatch) →
//! `channel` → handler variant. Broadcasts enter at `hub` and fan out to
//! every registered channel's connection.

pub mod channel;
pub mod channels;
pub mod connection;
pub mod handler;
pub mod hub;
pub mod protocol;
