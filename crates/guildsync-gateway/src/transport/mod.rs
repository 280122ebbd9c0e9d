//! Frame transport between the session and the remote gateway.
//!
//! A [`Connector`] opens one connection per attempt and hands back a
//! [`TransportLink`]: a pair of channels fed by background reader/writer
//! tasks. The session never touches the socket directly.

pub mod memory;
pub mod tungstenite;

use async_trait::async_trait;
use bytes::Bytes;
use guildsync_core::GatewayResult;
use tokio::sync::mpsc;

pub use memory::{MemoryConnector, MemoryListener, RemoteEnd};
pub use tungstenite::TungsteniteConnector;

/// Capacity of the per-connection frame channels.
pub const CHANNEL_CAPACITY: usize = 256;

/// A frame received from the remote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportFrame {
    /// Binary frame (compressed stream or payload).
    Binary(Bytes),
    /// Text frame (uncompressed JSON).
    Text(String),
    /// The remote closed the connection.
    Close {
        /// Close code, if one was sent.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

/// A frame sent to the remote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Serialized JSON payload.
    Text(String),
    /// Close the connection.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// One open connection.
#[derive(Debug)]
pub struct TransportLink {
    /// Frames from the remote. Yields `None` once the connection is gone.
    pub inbound: mpsc::Receiver<TransportFrame>,
    /// Frames to the remote.
    pub outbound: mpsc::Sender<OutboundFrame>,
}

/// Opens connections to a gateway URL.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`.
    async fn connect(&self, url: &str) -> GatewayResult<TransportLink>;
}
