//! [`Transport`] over an axum WebSocket.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use tracing::debug;

use crate::errors::TransportError;
use crate::session::{CloseReason, Inbound, Transport};

/// Adapts an upgraded axum [`WebSocket`] to the session transport boundary.
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    /// Wrap an upgraded socket.
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn receive(&mut self) -> Result<Inbound, TransportError> {
        loop {
            let msg = match self.socket.recv().await {
                None => return Err(TransportError::Disconnected),
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
                Some(Ok(msg)) => msg,
            };
            match msg {
                Message::Text(text) => return Ok(Inbound::Text(text.to_string())),
                // Some clients send text payloads as binary frames
                Message::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => return Ok(Inbound::Text(text.to_owned())),
                    Err(_) => debug!(len = data.len(), "skipping non-UTF8 binary frame"),
                },
                // axum answers pings itself; either direction proves liveness
                Message::Ping(_) | Message::Pong(_) => return Ok(Inbound::Pong),
                Message::Close(frame) => {
                    debug!(?frame, "client sent close frame");
                    return Err(TransportError::Disconnected);
                }
            }
        }
    }

    async fn send(&mut self, text: Arc<str>) -> Result<(), TransportError> {
        self.socket
            .send(Message::Text(text.as_ref().into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.socket
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self, reason: CloseReason) {
        let frame = CloseFrame {
            code: reason.code(),
            reason: reason.message().into(),
        };
        if let Err(e) = self.socket.send(Message::Close(Some(frame))).await {
            debug!(error = %e, "close frame not delivered");
        }
    }
}
