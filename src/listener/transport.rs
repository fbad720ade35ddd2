//! WebSocket transport for the venue streaming endpoint
//!
//! Owns exactly one connection. Constructed per dial, dropped before any
//! reconnection attempt.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::error::{BalanceFeedError, Result};
use crate::protocol::ClientRequest;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport-level events surfaced to the listener task
#[derive(Debug)]
pub enum TransportEvent {
    /// Text frame (binary frames are tolerated as lossy UTF-8)
    Text(String),
    /// Connection ended; carries close frame metadata when present
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
    /// Transport failure; the connection is no longer usable
    Error(String),
}

/// Exclusively owned WebSocket connection to the venue
pub struct WsTransport {
    stream: WsStream,
}

impl WsTransport {
    /// Open a connection to the venue
    pub async fn connect(url: &str) -> Result<Self> {
        info!(url = %url, "Connecting to venue stream");

        let (stream, response) = connect_async(url).await.map_err(|e| {
            BalanceFeedError::WebSocketConnection(format!("Failed to connect: {}", e))
        })?;

        info!(status = ?response.status(), "Venue stream connected");
        Ok(Self { stream })
    }

    /// Serialize a request and put it on the wire
    pub async fn send_json(&mut self, request: &ClientRequest) -> Result<()> {
        let payload = serde_json::to_string(request)?;
        debug!(payload = %payload, "Sending request");
        self.stream
            .send(Message::Text(payload))
            .await
            .map_err(|e| BalanceFeedError::WebSocketMessage(e.to_string()))
    }

    /// Receive the next transport event; pings are answered inline
    pub async fn next(&mut self) -> TransportEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    debug!(len = text.len(), "Received text message");
                    return TransportEvent::Text(text);
                }
                Some(Ok(Message::Binary(data))) => {
                    return TransportEvent::Text(String::from_utf8_lossy(&data).to_string());
                }
                Some(Ok(Message::Ping(data))) => {
                    debug!("Received ping, sending pong");
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return TransportEvent::Error(e.to_string());
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    debug!("Received pong");
                }
                Some(Ok(Message::Close(frame))) => {
                    warn!(frame = ?frame, "Received close frame");
                    return TransportEvent::Closed {
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty()),
                    };
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    return TransportEvent::Error(e.to_string());
                }
                None => {
                    warn!("WebSocket stream ended");
                    return TransportEvent::Closed {
                        code: None,
                        reason: None,
                    };
                }
            }
        }
    }

    /// Keepalive probe
    pub async fn ping(&mut self) -> Result<()> {
        self.stream
            .send(Message::Ping(vec![]))
            .await
            .map_err(|e| BalanceFeedError::WebSocketMessage(e.to_string()))
    }

    /// Send a close frame and flush; errors on an already dead link are ignored
    pub async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
