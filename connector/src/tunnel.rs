//! Tunnel socket plumbing
//!
//! The write half of a router socket is wrapped as a [`TunnelSink`]; the read
//! half is consumed through [`next_inbound`].

use crate::session::InboundFrame;
use async_trait::async_trait;
use bytes::Bytes;
use crank_shared::{CloseStatus, Error, Result};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Outbound half of a tunnel connection. Every send resolves only once the
/// frame has been flushed to the socket.
#[async_trait]
pub trait TunnelSink: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;

    async fn send_binary(&mut self, data: Bytes) -> Result<()>;

    async fn close(&mut self, status: CloseStatus) -> Result<()>;
}

/// [`TunnelSink`] over any WebSocket message sink.
pub struct WsTunnel<S> {
    sink: S,
}

impl<S> WsTunnel<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<S> TunnelSink for WsTunnel<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::Tunnel(e.to_string()))
    }

    async fn send_binary(&mut self, data: Bytes) -> Result<()> {
        self.sink
            .send(Message::Binary(data))
            .await
            .map_err(|e| Error::Tunnel(e.to_string()))
    }

    async fn close(&mut self, status: CloseStatus) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(status.code),
            reason: status.reason.into(),
        };
        self.sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| Error::Tunnel(e.to_string()))
    }
}

/// What the router did next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(InboundFrame),
    /// Close frame, read error or end of stream.
    Closed(Option<CloseStatus>),
}

/// Read the next protocol-relevant message. Pings and pongs are answered by
/// tungstenite itself and skipped here.
pub async fn next_inbound<R, E>(inbound: &mut R) -> Inbound
where
    R: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        match inbound.next().await {
            Some(Ok(Message::Text(text))) => {
                return Inbound::Frame(InboundFrame::Text(text.as_str().to_owned()))
            }
            Some(Ok(Message::Binary(data))) => return Inbound::Frame(InboundFrame::Binary(data)),
            Some(Ok(Message::Close(frame))) => {
                return Inbound::Closed(
                    frame.map(|f| CloseStatus::new(u16::from(f.code), f.reason.as_str())),
                )
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!("Tunnel read failed: {}", e);
                return Inbound::Closed(None);
            }
            None => return Inbound::Closed(None),
        }
    }
}
