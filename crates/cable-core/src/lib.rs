//! # cable-core
//!
//! Foundation types for the cable real-time pub/sub subsystem.
//!
//! This crate provides the shared vocabulary the server crate depends on:
//!
//! - **Branded IDs**: [`ids::ConnectionId`], [`ids::ChannelId`],
//!   [`ids::CorrelationId`], [`ids::SubscriptionId`] as newtypes
//! - **Errors**: [`errors::CableError`] taxonomy via `thiserror`, with
//!   machine-readable wire codes
//! - **Logging**: [`logging::init_subscriber`] and [`logging::LogPayload`]
//!   for correlated structured log records
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `cable-server`.

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;

pub use errors::CableError;
pub use ids::{ChannelId, ConnectionId, CorrelationId, SubscriptionId};
pub use logging::LogPayload;
