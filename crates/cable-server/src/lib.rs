//! # cable-server
//!
//! Real-time authenticated pub/sub over WebSocket.
//!
//! One HTTP route upgrades to a duplex socket. The connection is
//! authenticated (bearer token, then session cookie) before any channel
//! exists; on success a [`websocket::channel::Channel`] is constructed from
//! the first subscribe envelope and registered with the central
//! [`websocket::hub::Hub`], which fans broadcasts out to every live channel
//! and evicts any channel that fails delivery.
//!
//! External collaborators are injected as traits: [`auth::Authenticator`],
//! [`websocket::channels::noteable::NoteableFinder`], and
//! [`websocket::channels::graphql::SubscriptionExecutor`].

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod metrics;
pub mod server;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::ServerConfig;
pub use server::{AppState, router};
pub use websocket::hub::Hub;
