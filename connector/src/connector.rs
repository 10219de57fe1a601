//! Per-connection driver
//!
//! Runs the single exchange a router socket carries: request frames in,
//! origin call, response frames out, one close.

use crate::origin::{HttpOrigin, OriginEvent};
use crate::relay::{RelayStep, ResponseRelay};
use crate::session::{ConnectorSession, Step};
use crate::tunnel::{next_inbound, Inbound, TunnelSink};
use crank_shared::CloseStatus;
use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ending {
    /// We closed the tunnel with this status.
    Closed(CloseStatus),
    /// The router closed or dropped the socket first.
    RouterGone,
}

pub struct Connector<O> {
    origin: Arc<O>,
    target: Url,
}

impl<O> Clone for Connector<O> {
    fn clone(&self) -> Self {
        Self {
            origin: self.origin.clone(),
            target: self.target.clone(),
        }
    }
}

enum Next {
    Origin(Option<OriginEvent>),
    Router(Inbound),
}

impl<O: HttpOrigin> Connector<O> {
    pub fn new(origin: Arc<O>, target: Url) -> Self {
        Self { origin, target }
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Serve one exchange over an open socket.
    pub async fn serve<T, R, E>(&self, tunnel: &mut T, inbound: &mut R) -> Ending
    where
        T: TunnelSink + ?Sized,
        R: Stream<Item = Result<Message, E>> + Unpin + Send,
        E: Display,
    {
        let mut session = ConnectorSession::new(self.target.clone());
        session.on_connect();

        let request = loop {
            match next_inbound(inbound).await {
                Inbound::Frame(frame) => match session.on_frame(frame) {
                    Step::Continue => {}
                    Step::CallOrigin(request) => break request,
                    Step::Close(status) => return finish(&mut session, tunnel, status).await,
                },
                Inbound::Closed(status) => {
                    session.on_close(status.as_ref());
                    return Ending::RouterGone;
                }
            }
        };

        let mut events = self.origin.call(request);
        let mut relay = ResponseRelay::new(session.id());

        let status = loop {
            let next = tokio::select! {
                event = events.next() => Next::Origin(event),
                inbound = next_inbound(inbound) => Next::Router(inbound),
            };

            match next {
                Next::Origin(event) => {
                    let event = event.unwrap_or_else(|| {
                        OriginEvent::Failed("Origin response ended without completing".to_string())
                    });
                    if let OriginEvent::Status { .. } = event {
                        session.response_started();
                    }
                    match relay.on_event(event, tunnel).await {
                        Ok(RelayStep::Continue) => {}
                        Ok(RelayStep::Finished(status)) => break status,
                        Err(e) => {
                            warn!(session = %session.id(), "Exchange failed: {}", e);
                            break CloseStatus::from(&e);
                        }
                    }
                }
                Next::Router(Inbound::Frame(frame)) => {
                    session.on_frame(frame);
                }
                Next::Router(Inbound::Closed(status)) => {
                    if session.on_close(status.as_ref()) {
                        info!(session = %session.id(), "Abandoning origin call");
                    }
                    return Ending::RouterGone;
                }
            }
        };

        drop(events);
        finish(&mut session, tunnel, status).await
    }
}

async fn finish<T>(session: &mut ConnectorSession, tunnel: &mut T, status: CloseStatus) -> Ending
where
    T: TunnelSink + ?Sized,
{
    let Some(status) = session.close(status.clone()) else {
        debug!(session = %session.id(), code = status.code, "Tunnel already closed, not closing again");
        return Ending::Closed(status);
    };
    if status.is_normal() {
        info!(session = %session.id(), "Closing tunnel because response fully processed");
    } else {
        warn!(session = %session.id(), code = status.code, reason = %status.reason, "Closing tunnel after failure");
    }
    if let Err(e) = tunnel.close(status.clone()).await {
        debug!(session = %session.id(), "Tunnel already closed: {}", e);
    }
    Ending::Closed(status)
}
