//! Connection authentication collaborators.
//!
//! The subsystem never talks to a user store directly; the host application
//! injects an [`Authenticator`]. Two lookup methods are tried in a fixed
//! order by the connection: bearer token first, session cookie second.
//! A lookup that resolves nothing (or fails) falls through to the next
//! method; the connection is rejected only when both are exhausted.

use async_trait::async_trait;
use cable_core::errors::BoxError;
use serde::{Deserialize, Serialize};

/// Token scopes a subscribed channel must keep holding.
pub const REQUIRED_SCOPES: &[&str] = &["api", "read_api"];

/// Identity negotiated for one connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// Stable user id.
    pub id: i64,
    /// Login name, used in log payloads.
    pub username: String,
}

/// User-store lookup capability injected by the host application.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a user from a bearer token. `Ok(None)` means the token is
    /// unknown, invalid, or expired — the caller falls through to the next
    /// method.
    async fn user_from_token(&self, token: &str)
    -> Result<Option<AuthenticatedUser>, BoxError>;

    /// Resolve a user from a session cookie value.
    async fn user_from_session(
        &self,
        session: &str,
    ) -> Result<Option<AuthenticatedUser>, BoxError>;

    /// Re-check that the user's authorization still carries the given
    /// scopes. Called periodically while a channel is subscribed.
    async fn validate_scopes(
        &self,
        user: &AuthenticatedUser,
        scopes: &[&str],
    ) -> Result<(), BoxError>;
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
///
/// Anything that is not a well-formed bearer header is treated as "no
/// token", not an error.
#[must_use]
pub fn parse_bearer(header: &str) -> Option<&str> {
    let mut parts = header.splitn(2, ' ');
    match (parts.next(), parts.next()) {
        (Some(scheme), Some(token))
            if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() =>
        {
            Some(token)
        }
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
