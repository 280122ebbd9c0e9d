//! # guildsync-core
//!
//! Foundation types shared by every guildsync crate:
//!
//! - **Snowflake IDs**: `GuildId`, `UserId`, `ChannelId`, `RoleId`, `EmojiId`
//!   as branded newtypes over a 64-bit snowflake
//! - **Errors**: `GatewayError` taxonomy via `thiserror`, with connection-fatal
//!   and resync classification
//! - **Protocol constants**: gateway opcodes and close codes
//! - **Backoff**: reconnect delay calculation
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod retry;

pub use errors::{DecodeError, GatewayError, GatewayResult, MalformedEnvelope};
pub use ids::{ChannelId, EmojiId, GuildId, RoleId, Snowflake, UserId};
