//! In-process transport: the remote end is driven by the caller.
//!
//! Used to script a gateway in tests and tooling without a socket.

use async_trait::async_trait;
use bytes::Bytes;
use guildsync_core::{GatewayError, GatewayResult};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{CHANNEL_CAPACITY, Connector, OutboundFrame, TransportFrame, TransportLink};

/// Connector whose connections are accepted by a paired [`MemoryListener`].
#[derive(Clone, Debug)]
pub struct MemoryConnector {
    accept: mpsc::UnboundedSender<RemoteEnd>,
}

/// Receives the remote end of every connection opened by the connector.
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<RemoteEnd>,
}

impl MemoryConnector {
    /// Create a connector and its listener.
    pub fn new() -> (Self, MemoryListener) {
        let (accept, incoming) = mpsc::unbounded_channel();
        (Self { accept }, MemoryListener { incoming })
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> GatewayResult<TransportLink> {
        let (inbound_tx, inbound) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbound, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.accept
            .send(RemoteEnd {
                url: url.to_owned(),
                tx: inbound_tx,
                rx: outbound_rx,
            })
            .map_err(|_| GatewayError::Transport("memory listener dropped".into()))?;
        Ok(TransportLink { inbound, outbound })
    }
}

impl MemoryListener {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<RemoteEnd> {
        self.incoming.recv().await
    }
}

/// The gateway side of one in-memory connection.
#[derive(Debug)]
pub struct RemoteEnd {
    url: String,
    tx: mpsc::Sender<TransportFrame>,
    rx: mpsc::Receiver<OutboundFrame>,
}

impl RemoteEnd {
    /// URL the client connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a JSON text frame. Returns `false` once the client is gone.
    pub async fn send_json(&self, value: &Value) -> bool {
        self.tx.send(TransportFrame::Text(value.to_string())).await.is_ok()
    }

    /// Send a binary frame.
    pub async fn send_binary(&self, bytes: impl Into<Bytes>) -> bool {
        self.tx.send(TransportFrame::Binary(bytes.into())).await.is_ok()
    }

    /// Close the connection from the remote side.
    pub async fn close(&self, code: u16, reason: &str) -> bool {
        self.tx
            .send(TransportFrame::Close {
                code: Some(code),
                reason: reason.to_owned(),
            })
            .await
            .is_ok()
    }

    /// Next frame sent by the client.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.rx.recv().await
    }

    /// Next text frame sent by the client, parsed. Close frames end the stream.
    pub async fn recv_json(&mut self) -> Option<Value> {
        match self.rx.recv().await? {
            OutboundFrame::Text(text) => serde_json::from_str(&text).ok(),
            OutboundFrame::Close { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn frames_cross_both_ways() {
        let (connector, mut listener) = MemoryConnector::new();
        let mut link = connector.connect("ws://memory/?v=10").await.unwrap();
        let mut remote = listener.accept().await.unwrap();
        assert_eq!(remote.url(), "ws://memory/?v=10");

        assert!(remote.send_json(&json!({"op": 10})).await);
        assert_eq!(link.inbound.recv().await.unwrap(), TransportFrame::Text(r#"{"op":10}"#.into()));

        link.outbound.send(OutboundFrame::Text(r#"{"op":1,"d":null}"#.into())).await.unwrap();
        assert_eq!(remote.recv_json().await.unwrap()["op"], 1);
    }

    #[tokio::test]
    async fn dropped_listener_fails_connect() {
        let (connector, listener) = MemoryConnector::new();
        drop(listener);
        assert!(connector.connect("ws://memory").await.is_err());
    }

    #[tokio::test]
    async fn dropped_link_ends_remote_stream() {
        let (connector, mut listener) = MemoryConnector::new();
        let link = connector.connect("ws://memory").await.unwrap();
        let mut remote = listener.accept().await.unwrap();
        drop(link);
        assert!(remote.recv().await.is_none());
        assert!(!remote.send_json(&json!({})).await);
    }
}
