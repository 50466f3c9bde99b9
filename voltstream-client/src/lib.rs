//! # voltstream-client
//!
//! Consumer-facing topic handles over the voltstream connection manager.
//!
//! A [`TopicHandle`] binds a consumer's lifetime to exactly one topic
//! subscription plus a connection-state observer: attaching registers both,
//! detaching (or dropping) removes both, and the connection state is exposed
//! as a `watch` value that only wakes consumers when it actually changes.

mod handle;

pub use handle::*;
