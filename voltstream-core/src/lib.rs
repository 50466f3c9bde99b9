//! # voltstream-core
//!
//! Client-side real-time event delivery over a single logical channel.
//!
//! This crate provides the connection manager that owns the channel lifecycle,
//! recovers from transient failures with exponential backoff, and fans inbound
//! envelopes out to per-topic subscriber sets while isolating subscriber
//! failures. The transport is abstracted behind the [`Channel`] trait so a real
//! WebSocket endpoint and a simulated one are interchangeable, selected once at
//! construction.

mod channel;
mod credentials;
mod error;
mod listeners;
mod manager;
mod registry;
mod socket;
mod timers;
mod types;

pub use channel::*;
pub use credentials::*;
pub use error::*;
pub use listeners::*;
pub use manager::*;
pub use registry::*;
pub use socket::*;
pub use timers::*;
pub use types::*;
