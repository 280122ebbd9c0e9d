//! # guildsync-gateway
//!
//! Client-side synchronization engine for a persistent, event-driven gateway.
//!
//! Inbound bytes flow through four stages, in wire order:
//!
//! 1. [`codec`]: stateful streaming decompression (one codec per connection)
//! 2. [`frame`]: buffering and decoding into [`frame::Envelope`]s
//! 3. [`dispatcher`]: sequence tracking and routing to cache handlers or
//!    pending correlations
//! 4. [`cache`]: the mutable guild/user object graph with partial-patch semantics
//!
//! [`session::GatewaySession`] owns the read loop, the heartbeat timer and the
//! identify/resume state machine. [`correlation`] tracks multi-chunk requests,
//! [`rest`] applies results from an external REST executor through the same
//! patch primitive, and [`notify`] defines the change notifications.

#![deny(unsafe_code)]

pub mod cache;
pub mod codec;
pub mod correlation;
pub mod dispatcher;
pub mod frame;
pub mod metrics;
pub mod notify;
pub mod rest;
pub mod session;
pub mod transport;

pub use cache::EntityCache;
pub use correlation::{CorrelationRegistry, FeedOutcome};
pub use dispatcher::EventDispatcher;
pub use notify::ClientEvent;
pub use session::{GatewaySession, SessionState};
