//! Top-level bridge coordinator
//!
//! Owns one `ProxyManager` per participating hub, wires every manager to
//! every other, and exposes aggregate start/stop/liveness. Liveness is a
//! watch channel carrying the connected-hub count; waiters re-check their
//! predicate after every change, so no wakeup can be missed.

use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Settings;
use crate::export::UrlExporter;
use crate::hub::HubProfile;
use crate::models::{BridgeError, BridgeResult};
use crate::proxy::ProxyManager;

/// Coordinator bridging N hubs
pub struct Bridge {
    managers: Vec<Arc<ProxyManager>>,
    live_tx: watch::Sender<usize>,
    live_rx: watch::Receiver<usize>,
}

impl Bridge {
    /// Build and wire one manager per hub profile
    pub fn new(profiles: Vec<Arc<dyn HubProfile>>, settings: Settings) -> BridgeResult<Self> {
        let settings = Arc::new(settings);
        let managers: Vec<Arc<ProxyManager>> = profiles
            .into_iter()
            .map(|profile| Arc::new(ProxyManager::new(profile, Arc::clone(&settings))))
            .collect();

        for manager in &managers {
            manager.init(&managers)?;
        }

        let (live_tx, live_rx) = watch::channel(0usize);
        let live_count = Arc::new(AtomicUsize::new(0));
        for manager in &managers {
            let count = Arc::clone(&live_count);
            let tx = live_tx.clone();
            manager.on_connection_change(move |up| {
                let n = if up {
                    count.fetch_add(1, Ordering::SeqCst) + 1
                } else {
                    count.fetch_sub(1, Ordering::SeqCst) - 1
                };
                let _ = tx.send(n);
            });
        }

        Ok(Self {
            managers,
            live_tx,
            live_rx,
        })
    }

    /// The managers, in wiring order
    pub fn managers(&self) -> &[Arc<ProxyManager>] {
        &self.managers
    }

    /// The manager at the given wiring position
    pub fn manager(&self, hub_index: usize) -> Option<&Arc<ProxyManager>> {
        self.managers.get(hub_index)
    }

    /// Attach a URL exporter to one hub, so traffic leaving it has loopback
    /// hosts rewritten to `host`
    pub fn export_urls(&self, hub_index: usize, host: &str) -> BridgeResult<()> {
        let manager = self
            .managers
            .get(hub_index)
            .ok_or_else(|| BridgeError::config(format!("no hub at index {}", hub_index)))?;
        manager.set_exporter(Some(UrlExporter::new(host)));
        Ok(())
    }

    /// Activate every manager's monitoring connection
    ///
    /// Returns whether all hubs connected; hubs that fail to connect are
    /// logged and left out of the bridge.
    pub async fn start(&self) -> BridgeResult<bool> {
        let results = join_all(self.managers.iter().map(|manager| manager.start())).await;

        let mut connected = 0;
        for (manager, result) in self.managers.iter().zip(results) {
            match result {
                Ok(()) => connected += 1,
                Err(e) => warn!("Failed to connect hub {}: {}", manager.label(), e),
            }
        }
        info!(
            "Bridge started: {}/{} hubs connected",
            connected,
            self.managers.len()
        );
        Ok(connected == self.managers.len())
    }

    /// Deactivate every manager, cascading proxy teardown
    pub async fn stop(&self) {
        for manager in &self.managers {
            manager.stop().await;
        }
        info!("Bridge stopped");
    }

    /// Number of currently connected hubs
    pub fn connected_count(&self) -> usize {
        *self.live_tx.borrow()
    }

    /// Subscribe to connected-hub-count changes
    pub fn liveness(&self) -> watch::Receiver<usize> {
        self.live_rx.clone()
    }

    /// Wait until the connected-hub count satisfies the predicate
    pub async fn wait_until(&self, mut pred: impl FnMut(usize) -> bool) {
        let mut rx = self.live_rx.clone();
        loop {
            let count = *rx.borrow_and_update();
            if pred(count) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait while bridging is still useful
    ///
    /// Returns once at most one hub remains connected; a long-lived bridge
    /// process exits at that point.
    pub async fn wait_while_bridged(&self) {
        self.wait_until(|count| count <= 1).await;
    }
}
