//! Per-connection request state machine
//!
//! A crank socket carries exactly one exchange. The session turns the
//! router's text frames into a [`PendingRequest`] and tracks the exchange
//! until the socket is closed, guarding against a second close.

use bytes::Bytes;
use crank_shared::protocol::{CloseStatus, HeaderFrame, RequestLine};
use crank_shared::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use url::Url;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier used to correlate log lines of one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        Self(SESSION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The single request a socket carries to the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub method: String,
    pub url: Url,
    /// Insertion order and duplicates preserved, names as received.
    pub headers: Vec<(String, String)>,
}

/// Frame delivered by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    NoRequest,
    BuildingHeaders(PendingRequest),
    AwaitingOrigin,
    StreamingResponse,
    Closed,
}

/// What the driver must do after feeding a frame to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    CallOrigin(PendingRequest),
    Close(CloseStatus),
}

pub struct ConnectorSession {
    id: SessionId,
    base: Url,
    state: SessionState,
}

impl ConnectorSession {
    pub fn new(base: Url) -> Self {
        Self {
            id: SessionId::next(),
            base,
            state: SessionState::NoRequest,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn on_connect(&self) {
        info!(session = %self.id, target = %self.base, "Connected to router");
    }

    pub fn on_frame(&mut self, frame: InboundFrame) -> Step {
        let text = match frame {
            InboundFrame::Text(text) => text,
            InboundFrame::Binary(data) => {
                debug!(session = %self.id, len = data.len(), "Ignoring binary frame from router");
                return Step::Continue;
            }
        };
        debug!(session = %self.id, frame = %text, "Got frame");

        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::NoRequest => match self.start_request(&text) {
                Ok(pending) => {
                    info!(session = %self.id, method = %pending.method, url = %pending.url, "Going to origin");
                    self.state = SessionState::BuildingHeaders(pending);
                    Step::Continue
                }
                Err(e) => {
                    warn!(session = %self.id, "Rejecting request: {}", e);
                    self.state = SessionState::NoRequest;
                    Step::Close(CloseStatus::from(&e))
                }
            },
            SessionState::BuildingHeaders(mut pending) => match HeaderFrame::parse(&text) {
                HeaderFrame::Header { name, value } => {
                    debug!(session = %self.id, "Target request header {}={}", name, value);
                    pending.headers.push((name, value));
                    self.state = SessionState::BuildingHeaders(pending);
                    Step::Continue
                }
                HeaderFrame::EndOfHeaders => {
                    info!(session = %self.id, headers = pending.headers.len(), "Request headers received");
                    self.state = SessionState::AwaitingOrigin;
                    Step::CallOrigin(pending)
                }
            },
            other => {
                debug!(session = %self.id, "Ignoring text frame after request headers");
                self.state = other;
                Step::Continue
            }
        }
    }

    /// The origin produced its status line.
    pub fn response_started(&mut self) {
        if self.state == SessionState::AwaitingOrigin {
            self.state = SessionState::StreamingResponse;
        }
    }

    /// The router closed the socket. Returns true when an origin call was in
    /// flight and must be abandoned.
    pub fn on_close(&mut self, status: Option<&CloseStatus>) -> bool {
        match status {
            Some(s) => info!(session = %self.id, code = s.code, reason = %s.reason, "Connection closed by router"),
            None => info!(session = %self.id, "Connection dropped by router"),
        }
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        matches!(previous, SessionState::AwaitingOrigin | SessionState::StreamingResponse)
    }

    /// Moves to `Closed`. Only the first call yields the status to send.
    pub fn close(&mut self, status: CloseStatus) -> Option<CloseStatus> {
        if self.state == SessionState::Closed {
            return None;
        }
        self.state = SessionState::Closed;
        Some(status)
    }

    fn start_request(&self, frame: &str) -> crank_shared::Result<PendingRequest> {
        let line = RequestLine::parse(frame)?;
        let url = self.base.join(&line.path).map_err(|e| Error::InvalidTarget {
            path: line.path.clone(),
            reason: e.to_string(),
        })?;
        Ok(PendingRequest {
            method: line.method,
            url,
            headers: Vec::new(),
        })
    }
}
