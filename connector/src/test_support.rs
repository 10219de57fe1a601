//! Recording tunnel and scripted origin for unit tests.

use crate::origin::{HttpOrigin, OriginEvent, OriginEvents};
use crate::session::PendingRequest;
use async_trait::async_trait;
use bytes::Bytes;
use crank_shared::{CloseStatus, Error, Result};
use futures_util::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Binary(Vec<u8>),
    Close(CloseStatus),
}

/// Records every outbound frame. Clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingTunnel {
    sent: Arc<Mutex<Vec<Sent>>>,
    sends: Arc<AtomicUsize>,
    binary_gate: Option<Arc<Semaphore>>,
    fail_after: Option<usize>,
}

impl RecordingTunnel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each binary send waits for one permit on `gate`.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            binary_gate: Some(gate),
            ..Self::default()
        }
    }

    /// Text and binary sends fail once `n` of them have succeeded.
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn closes(&self) -> Vec<CloseStatus> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Close(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    fn record(&self, frame: Sent) -> Result<()> {
        let count = self.sends.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|n| count >= n) {
            return Err(Error::Tunnel("broken pipe".into()));
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }
}

#[async_trait]
impl crate::tunnel::TunnelSink for RecordingTunnel {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.record(Sent::Text(text))
    }

    async fn send_binary(&mut self, data: Bytes) -> Result<()> {
        if let Some(gate) = &self.binary_gate {
            gate.acquire()
                .await
                .map_err(|e| Error::Tunnel(e.to_string()))?
                .forget();
        }
        self.record(Sent::Binary(data.to_vec()))
    }

    async fn close(&mut self, status: CloseStatus) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::Close(status));
        Ok(())
    }
}

/// Replays a fixed list of events and records the requests it was given.
pub struct ScriptedOrigin {
    events: Vec<OriginEvent>,
    hang: bool,
    calls: Mutex<Vec<PendingRequest>>,
    pulls: Arc<AtomicUsize>,
    dropped: Arc<AtomicBool>,
}

impl ScriptedOrigin {
    pub fn new(events: Vec<OriginEvent>) -> Self {
        Self {
            events,
            hang: false,
            calls: Mutex::new(Vec::new()),
            pulls: Arc::new(AtomicUsize::new(0)),
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Yields `events` and then never finishes.
    pub fn hanging(events: Vec<OriginEvent>) -> Self {
        Self {
            hang: true,
            ..Self::new(events)
        }
    }

    pub fn calls(&self) -> Vec<PendingRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of events handed out so far.
    pub fn pulls(&self) -> Arc<AtomicUsize> {
        self.pulls.clone()
    }

    /// Set once the event stream of a call has been dropped.
    pub fn dropped(&self) -> Arc<AtomicBool> {
        self.dropped.clone()
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl HttpOrigin for ScriptedOrigin {
    fn call(&self, request: PendingRequest) -> OriginEvents {
        self.calls.lock().unwrap().push(request);
        let pulls = self.pulls.clone();
        let flag = DropFlag(self.dropped.clone());
        let events = stream::iter(self.events.clone()).inspect(move |_| {
            pulls.fetch_add(1, Ordering::SeqCst);
        });
        let tail = if self.hang {
            stream::pending().boxed()
        } else {
            stream::empty().boxed()
        };
        events
            .chain(tail)
            .map(move |event| {
                let _keep = &flag;
                event
            })
            .boxed()
    }
}

/// Router frames followed by a socket that stays open.
pub fn router_frames(frames: &[&str]) -> impl Stream<Item = std::result::Result<Message, Infallible>> + Unpin {
    let messages: Vec<_> = frames
        .iter()
        .map(|f| Ok::<_, Infallible>(Message::Text(f.to_string().into())))
        .collect();
    stream::iter(messages).chain(stream::pending())
}

/// Router frames followed by a close frame from the router.
pub fn router_frames_then_close(frames: &[&str]) -> impl Stream<Item = std::result::Result<Message, Infallible>> + Unpin {
    let mut messages: Vec<_> = frames
        .iter()
        .map(|f| Ok::<_, Infallible>(Message::Text(f.to_string().into())))
        .collect();
    messages.push(Ok(Message::Close(None)));
    stream::iter(messages).chain(stream::pending())
}
