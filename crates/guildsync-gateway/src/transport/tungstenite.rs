//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use guildsync_core::{GatewayError, GatewayResult};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, warn};

use super::{CHANNEL_CAPACITY, Connector, OutboundFrame, TransportFrame, TransportLink};

/// Connects with a real WebSocket client.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> GatewayResult<TransportLink> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| GatewayError::Transport(format!("WebSocket connect: {e}")))?;
        debug!(url, "websocket connected");

        let (mut sink, mut stream) = ws.split();
        let (inbound_tx, inbound) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbound, mut outbound_rx) = mpsc::channel::<OutboundFrame>(CHANNEL_CAPACITY);

        let _reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let frame = match message {
                    Ok(Message::Binary(bytes)) => TransportFrame::Binary(bytes),
                    Ok(Message::Text(text)) => TransportFrame::Text(text.as_str().to_owned()),
                    Ok(Message::Close(frame)) => TransportFrame::Close {
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame.map(|f| f.reason.as_str().to_owned()).unwrap_or_default(),
                    },
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "websocket read failed");
                        break;
                    }
                };
                let closing = matches!(frame, TransportFrame::Close { .. });
                if inbound_tx.send(frame).await.is_err() || closing {
                    break;
                }
            }
        });

        let _writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let (message, closing) = match frame {
                    OutboundFrame::Text(text) => (Message::Text(text.into()), false),
                    OutboundFrame::Close { code, reason } => (
                        Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        })),
                        true,
                    ),
                };
                if let Err(e) = sink.send(message).await {
                    warn!(error = %e, "websocket write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        Ok(TransportLink { inbound, outbound })
    }
}
