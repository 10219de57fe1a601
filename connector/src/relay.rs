//! Response relay
//!
//! Serializes origin events onto the tunnel in the order they occur:
//! status line, headers, header terminator, body chunks. Each send is
//! awaited before the next event is taken from the origin.

use crate::origin::OriginEvent;
use crate::session::SessionId;
use crate::tunnel::TunnelSink;
use crank_shared::protocol::{header_line, status_line, CloseStatus, END_OF_HEADERS};
use crank_shared::{Error, Result};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    AwaitingStatus,
    AwaitingHeaders,
    StreamingBody,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStep {
    Continue,
    Finished(CloseStatus),
}

pub struct ResponseRelay {
    session: SessionId,
    state: RelayState,
    body_bytes: u64,
    chunks: u64,
}

impl ResponseRelay {
    pub fn new(session: SessionId) -> Self {
        Self {
            session,
            state: RelayState::AwaitingStatus,
            body_bytes: 0,
            chunks: 0,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn body_bytes(&self) -> u64 {
        self.body_bytes
    }

    /// Relay one origin event. Any error is terminal and leaves the relay
    /// `Closed`; the caller turns it into the tunnel's close status.
    pub async fn on_event<T>(&mut self, event: OriginEvent, tunnel: &mut T) -> Result<RelayStep>
    where
        T: TunnelSink + ?Sized,
    {
        let result = self.relay(event, tunnel).await;
        if result.is_err() {
            self.state = RelayState::Closed;
        }
        result
    }

    async fn relay<T>(&mut self, event: OriginEvent, tunnel: &mut T) -> Result<RelayStep>
    where
        T: TunnelSink + ?Sized,
    {
        match (self.state, event) {
            (_, OriginEvent::Failed(reason)) => Err(Error::Origin(reason)),
            (RelayState::AwaitingStatus, OriginEvent::Status { code, reason }) => {
                info!(session = %self.session, code, "Sending status to router");
                tunnel.send_text(status_line(code, &reason)).await?;
                self.state = RelayState::AwaitingHeaders;
                Ok(RelayStep::Continue)
            }
            (RelayState::AwaitingHeaders, OriginEvent::Headers(headers)) => {
                for (name, value) in &headers {
                    debug!(session = %self.session, "Sending response header to router {}={}", name, value);
                    tunnel.send_text(header_line(name, value)).await?;
                }
                tunnel.send_text(END_OF_HEADERS.to_string()).await?;
                self.state = RelayState::StreamingBody;
                Ok(RelayStep::Continue)
            }
            (RelayState::StreamingBody, OriginEvent::Body(chunk)) => {
                if chunk.is_empty() {
                    return Ok(RelayStep::Continue);
                }
                let len = chunk.len();
                tunnel.send_binary(chunk).await?;
                self.chunks += 1;
                self.body_bytes += len as u64;
                debug!(session = %self.session, len, "Sent body chunk to router");
                Ok(RelayStep::Continue)
            }
            (RelayState::StreamingBody, OriginEvent::Complete) => {
                info!(
                    session = %self.session,
                    bytes = self.body_bytes,
                    chunks = self.chunks,
                    "Response fully relayed"
                );
                self.state = RelayState::Closed;
                Ok(RelayStep::Finished(CloseStatus::complete()))
            }
            (state, event) => Err(Error::UnexpectedEvent(format!(
                "{} while {:?}",
                event.kind(),
                state
            ))),
        }
    }
}
