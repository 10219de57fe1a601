//! Router socket pool
//!
//! Keeps `sockets_per_router` idle sockets open to every router. A socket
//! carries one exchange and is then replaced by a freshly dialled one.

use crate::config::ConnectorConfig;
use crate::connector::{Connector, Ending};
use crate::origin::HttpOrigin;
use crate::tunnel::WsTunnel;
use anyhow::{Context, Result};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

/// Upper bound on waiting for the router to acknowledge our close frame.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Manages the sockets of every configured router
pub struct ConnectorManager<O> {
    config: ConnectorConfig,
    connector: Connector<O>,
    handles: Vec<JoinHandle<()>>,
}

impl<O: HttpOrigin> ConnectorManager<O> {
    pub fn new(config: ConnectorConfig, connector: Connector<O>) -> Self {
        Self {
            config,
            connector,
            handles: Vec::new(),
        }
    }

    /// Start every socket slot defined in the configuration
    pub fn start_all(&mut self) {
        info!(
            routers = self.config.routers.len(),
            sockets_per_router = self.config.sockets_per_router,
            target = %self.connector.target(),
            "Starting connector sockets"
        );

        let reconnect = Duration::from_secs(self.config.reconnect_secs);
        for router in &self.config.routers {
            for slot in 0..self.config.sockets_per_router {
                let router = router.clone();
                let connector = self.connector.clone();
                let handle = tokio::spawn(async move {
                    run_slot(router, slot, connector, reconnect).await;
                });
                self.handles.push(handle);
            }
        }
    }

    pub fn active_slots(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for Ctrl+C, then stop every socket
    pub async fn wait_for_shutdown(self) {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down all sockets...");
        for handle in self.handles {
            handle.abort();
        }
    }
}

async fn run_slot<O: HttpOrigin>(router: String, slot: usize, connector: Connector<O>, reconnect: Duration) {
    loop {
        match connect_and_serve(&router, &connector).await {
            Ok(Ending::Closed(status)) => {
                debug!(router = %router, slot, code = status.code, "Exchange finished, replacing socket");
            }
            Ok(Ending::RouterGone) => {
                warn!(router = %router, slot, "Router dropped socket. Reconnecting in {:?}...", reconnect);
                tokio::time::sleep(reconnect).await;
            }
            Err(e) => {
                error!(router = %router, slot, "Socket error: {:#}. Reconnecting in {:?}...", e, reconnect);
                tokio::time::sleep(reconnect).await;
            }
        }
    }
}

/// Dial `router` and serve the single exchange it sends.
pub async fn connect_and_serve<O: HttpOrigin>(router: &str, connector: &Connector<O>) -> Result<Ending> {
    let (ws_stream, _) = connect_async(router)
        .await
        .with_context(|| format!("Failed to connect to router {}", router))?;
    let (write, mut read) = ws_stream.split();
    let mut tunnel = WsTunnel::new(write);

    let ending = connector.serve(&mut tunnel, &mut read).await;

    if let Ending::Closed(_) = ending {
        // Reading completes the close handshake started by our close frame.
        let drained = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
            while let Some(Ok(_)) = read.next().await {}
        })
        .await;
        if drained.is_err() {
            debug!(router = %router, "Router did not acknowledge close in time");
        }
    }

    Ok(ending)
}
