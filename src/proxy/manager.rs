//! Cross-hub proxy orchestration
//!
//! One `ProxyManager` serves one local hub connection: it watches the local
//! client registry and keeps a live proxy of every genuine local client on
//! every other bridged hub, tunneling inbound proxy traffic back to the true
//! client. Managers reach a consistent view with no central coordinator;
//! the only cross-manager ordering guarantee is that a new proxy connection
//! is recorded in its manager's map before the map lock is released, so a
//! concurrent is-this-a-proxy lookup never sees a registered-but-unrecorded
//! proxy.

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::handler::ProxyHandler;
use crate::config::Settings;
use crate::export::UrlExporter;
use crate::hub::{mtypes, CallbackReceiver, HubConnection, HubProfile};
use crate::models::{
    BridgeError, BridgeResult, ClientInfo, ErrorInfo, Message, Metadata, Response, Subscriptions,
};
use crate::registry::{ClientEvent, ClientRegistry};

/// Metadata attribute recording which hub a proxy's true client lives on
pub const PROXY_SOURCE_ATTR: &str = "bridge.proxy.source";

/// Per-local-client proxy connections, one slot per manager in wiring order;
/// the slot for the owning manager's own hub stays empty
type ProxySlots = Vec<Option<Arc<dyn HubConnection>>>;

struct Wiring {
    managers: Vec<Arc<ProxyManager>>,
    self_index: usize,
}

/// Manager of one local hub connection's cross-hub proxies
pub struct ProxyManager {
    profile: Arc<dyn HubProfile>,
    settings: Arc<Settings>,
    registry: Arc<ClientRegistry>,
    connection: AsyncMutex<Option<Arc<dyn HubConnection>>>,
    wiring: OnceCell<Wiring>,
    proxies: AsyncMutex<HashMap<String, ProxySlots>>,
    exporter: RwLock<Option<Arc<UrlExporter>>>,
    connected: AtomicBool,
    conn_listeners: Mutex<Vec<Box<dyn Fn(bool) + Send + Sync>>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ProxyManager {
    /// Create a manager for one hub profile
    pub fn new(profile: Arc<dyn HubProfile>, settings: Arc<Settings>) -> Self {
        let registry = Arc::new(ClientRegistry::new(settings.registry.pending_expiry()));
        Self {
            profile,
            settings,
            registry,
            connection: AsyncMutex::new(None),
            wiring: OnceCell::new(),
            proxies: AsyncMutex::new(HashMap::new()),
            exporter: RwLock::new(None),
            connected: AtomicBool::new(false),
            conn_listeners: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Wire this manager to the full manager list
    ///
    /// Exactly one entry of the list must be this manager itself; anything
    /// else is a wiring error in the caller and fails construction.
    pub fn init(&self, managers: &[Arc<ProxyManager>]) -> BridgeResult<()> {
        let mut self_index = None;
        for (i, manager) in managers.iter().enumerate() {
            if std::ptr::eq(manager.as_ref(), self) {
                if self_index.is_some() {
                    return Err(BridgeError::config(
                        "manager appears more than once in the manager list",
                    ));
                }
                self_index = Some(i);
            }
        }
        let self_index = self_index
            .ok_or_else(|| BridgeError::config("manager does not appear in the manager list"))?;

        let wiring = Wiring {
            managers: managers.to_vec(),
            self_index,
        };
        self.wiring
            .set(wiring)
            .map_err(|_| BridgeError::config("manager is already wired"))
    }

    fn wiring(&self) -> BridgeResult<&Wiring> {
        self.wiring
            .get()
            .ok_or_else(|| BridgeError::config("manager used before init"))
    }

    /// This manager's position in the wiring order
    pub fn self_index(&self) -> BridgeResult<usize> {
        Ok(self.wiring()?.self_index)
    }

    /// The manager at the given wiring position
    pub fn sibling(&self, index: usize) -> BridgeResult<Arc<ProxyManager>> {
        let wiring = self.wiring()?;
        wiring
            .managers
            .get(index)
            .cloned()
            .ok_or_else(|| BridgeError::config(format!("no manager at index {}", index)))
    }

    /// The hub label, for logs
    pub fn label(&self) -> &str {
        self.profile.label()
    }

    /// The local client registry
    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    /// Attach or clear the URL exporter for traffic originating on this hub
    pub fn set_exporter(&self, exporter: Option<UrlExporter>) {
        *self.exporter.write() = exporter.map(Arc::new);
    }

    /// The exporter for traffic originating on this hub, if any
    pub fn exporter(&self) -> Option<Arc<UrlExporter>> {
        self.exporter.read().clone()
    }

    /// Register an observer of monitoring-connection liveness
    pub fn on_connection_change(&self, listener: impl Fn(bool) + Send + Sync + 'static) {
        self.conn_listeners.lock().push(Box::new(listener));
    }

    /// Whether the monitoring connection is currently up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_connected(&self, up: bool) {
        if self.connected.swap(up, Ordering::SeqCst) != up {
            for listener in self.conn_listeners.lock().iter() {
                listener(up);
            }
        }
    }

    /// Connect the monitoring connection and begin proxying
    pub async fn start(self: &Arc<Self>) -> BridgeResult<()> {
        if let Err(e) = self.try_start().await {
            self.stop().await;
            return Err(e);
        }
        Ok(())
    }

    async fn try_start(self: &Arc<Self>) -> BridgeResult<()> {
        self.wiring()?;

        let connection = self.profile.register().await?;
        info!(
            "Bridge monitor registered on hub {} as {}",
            self.label(),
            connection.client_id()
        );
        *self.connection.lock().await = Some(Arc::clone(&connection));

        // Consume registry changes before anything can fill the table, so
        // no Added event is missed.
        let events = self.registry.subscribe();
        let pump = tokio::spawn(pump_events(Arc::downgrade(self), events));
        let sweeper = Arc::clone(&self.registry).start_expiry_sweep();
        self.tasks.lock().extend([pump, sweeper]);

        connection.set_receiver(Arc::new(MonitorReceiver {
            manager: Arc::downgrade(self),
        }));

        let metadata = Metadata::named(&self.settings.bridge.client_name)
            .with_description(&self.settings.bridge.client_description)
            .with_attr("bridge.version", crate::VERSION);
        connection.declare_metadata(&metadata).await?;

        let subscriptions = Subscriptions::new()
            .with_mtype(mtypes::EVENT_REGISTER)
            .with_mtype(mtypes::EVENT_UNREGISTER)
            .with_mtype(mtypes::EVENT_METADATA)
            .with_mtype(mtypes::EVENT_SUBSCRIPTIONS)
            .with_mtype(mtypes::EVENT_SHUTDOWN)
            .with_mtype(mtypes::DISCONNECT);
        connection.declare_subscriptions(&subscriptions).await?;

        self.registry.initialize(Some(connection.as_ref())).await?;

        self.set_connected(true);
        Ok(())
    }

    /// Deactivate: tear down proxies everywhere and retire the monitoring
    /// connection
    pub async fn stop(&self) {
        self.shutdown(true).await;
    }

    /// React to loss of the local hub connection
    ///
    /// Reconnection is not resumed from here; a lost hub stays lost until
    /// the caller builds a new bridge.
    pub(crate) async fn connection_lost(&self) {
        warn!("Lost connection to hub {}", self.label());
        self.shutdown(false).await;
    }

    async fn shutdown(&self, hub_reachable: bool) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        // This manager's own proxies live on the remote hubs, which may
        // well still be up; unregister them there.
        let entries = std::mem::take(&mut *self.proxies.lock().await);
        for (client_id, slots) in entries {
            for connection in slots.into_iter().flatten() {
                if let Err(e) = connection.unregister().await {
                    warn!("Failed to unregister proxy of {}: {}", client_id, e);
                }
            }
        }

        // Sibling proxies registered on this hub would keep targeting an
        // unreachable (or stopping) hub; drop them, unregistering while the
        // hub can still hear it.
        if let Some(wiring) = self.wiring.get() {
            for (i, manager) in wiring.managers.iter().enumerate() {
                if i != wiring.self_index {
                    manager
                        .discard_proxies_on(wiring.self_index, hub_reachable)
                        .await;
                }
            }
        }

        if let Some(connection) = self.connection.lock().await.take() {
            if hub_reachable {
                if let Err(e) = connection.unregister().await {
                    warn!("Failed to unregister bridge monitor on {}: {}", self.label(), e);
                }
            }
        }

        // Clearing a registry with no connection cannot fail.
        let _ = self.registry.initialize(None).await;

        self.set_connected(false);
    }

    /// Whether a local client deserves proxies on the remote hubs
    ///
    /// Excluded: this manager's own monitoring identity, the hub's own
    /// administrative client (unless configured otherwise), and any client
    /// that is itself a proxy created by one of the bridged managers.
    pub async fn is_proxied_client(&self, client_id: &str) -> BridgeResult<bool> {
        let wiring = self.wiring()?;

        if let Some(connection) = self.connection.lock().await.as_ref() {
            if connection.client_id() == client_id {
                return Ok(false);
            }
            if !self.settings.bridge.proxy_admin_client
                && connection.hub_client_id() == client_id
            {
                return Ok(false);
            }
        }

        for manager in &wiring.managers {
            if manager.is_proxy(wiring.self_index, client_id).await {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether `client_id` on hub `hub_index` is a proxy created by this
    /// manager
    pub async fn is_proxy(&self, hub_index: usize, client_id: &str) -> bool {
        let proxies = self.proxies.lock().await;
        proxies.values().any(|slots| {
            slots
                .get(hub_index)
                .and_then(Option::as_ref)
                .is_some_and(|conn| conn.client_id() == client_id)
        })
    }

    /// The proxy connection this manager holds for `local_client_id` on hub
    /// `hub_index`, if present
    pub async fn proxy_connection(
        &self,
        hub_index: usize,
        local_client_id: &str,
    ) -> Option<Arc<dyn HubConnection>> {
        let proxies = self.proxies.lock().await;
        proxies
            .get(local_client_id)
            .and_then(|slots| slots.get(hub_index))
            .and_then(Option::clone)
    }

    /// Number of local clients currently proxied
    pub async fn proxied_client_count(&self) -> usize {
        self.proxies.lock().await.len()
    }

    async fn local_client_added(self: &Arc<Self>, info: ClientInfo) {
        match self.is_proxied_client(&info.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Not proxying client {} on hub {}", info.id, self.label());
                return;
            }
            Err(e) => {
                warn!("Cannot judge client {}: {}", info.id, e);
                return;
            }
        }
        let wiring = match self.wiring() {
            Ok(w) => w,
            Err(_) => return,
        };

        let metadata = self.proxy_metadata(&info);
        let subscriptions = self.proxy_subscriptions(&info);

        // Hold the map lock across registration: the new slots must be
        // recorded before any is_proxy lookup can observe the registered
        // proxies.
        let mut proxies = self.proxies.lock().await;
        if proxies.contains_key(&info.id) {
            debug!("Client {} is already proxied", info.id);
            return;
        }

        let registrations = wiring
            .managers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != wiring.self_index)
            .map(|(i, remote)| {
                self.register_proxy(remote, i, &info, metadata.as_ref(), subscriptions.as_ref())
            });
        let registered: Vec<(usize, Option<Arc<dyn HubConnection>>)> =
            join_all(registrations).await;

        let mut slots: ProxySlots = vec![None; wiring.managers.len()];
        let mut live = 0;
        for (index, connection) in registered {
            if connection.is_some() {
                live += 1;
            }
            slots[index] = connection;
        }
        proxies.insert(info.id.clone(), slots);
        drop(proxies);

        info!(
            "Proxied client {} from hub {} onto {} remote hub(s)",
            info.display_name(),
            self.label(),
            live
        );
    }

    async fn register_proxy(
        self: &Arc<Self>,
        remote: &Arc<ProxyManager>,
        remote_index: usize,
        info: &ClientInfo,
        metadata: Option<&Metadata>,
        subscriptions: Option<&Subscriptions>,
    ) -> (usize, Option<Arc<dyn HubConnection>>) {
        let connection = match remote.profile.register().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(
                    "Failed to register proxy for {} on hub {}: {}",
                    info.id,
                    remote.label(),
                    e
                );
                return (remote_index, None);
            }
        };

        let handler = Arc::new(ProxyHandler::new(
            Arc::clone(self),
            remote_index,
            info.id.clone(),
        ));
        handler.attach(&connection);
        connection.set_receiver(handler);

        if let Some(metadata) = metadata {
            if let Err(e) = connection.declare_metadata(metadata).await {
                warn!(
                    "Failed to declare proxy metadata for {} on {}: {}",
                    info.id,
                    remote.label(),
                    e
                );
            }
        }
        if let Some(subscriptions) = subscriptions {
            if let Err(e) = connection.declare_subscriptions(subscriptions).await {
                warn!(
                    "Failed to declare proxy subscriptions for {} on {}: {}",
                    info.id,
                    remote.label(),
                    e
                );
            }
        }

        (remote_index, Some(connection))
    }

    async fn local_client_updated(&self, info: ClientInfo) {
        let metadata = self.proxy_metadata(&info);
        let subscriptions = self.proxy_subscriptions(&info);

        let slots: Vec<Arc<dyn HubConnection>> = {
            let proxies = self.proxies.lock().await;
            match proxies.get(&info.id) {
                Some(slots) => slots.iter().flatten().cloned().collect(),
                // Not a proxied client; nothing to propagate.
                None => return,
            }
        };

        for connection in slots {
            if let Some(ref metadata) = metadata {
                if let Err(e) = connection.declare_metadata(metadata).await {
                    warn!("Failed to update proxy metadata for {}: {}", info.id, e);
                }
            }
            if let Some(ref subscriptions) = subscriptions {
                if let Err(e) = connection.declare_subscriptions(subscriptions).await {
                    warn!("Failed to update proxy subscriptions for {}: {}", info.id, e);
                }
            }
        }
    }

    async fn local_client_removed(&self, client_id: &str) {
        let slots = self.proxies.lock().await.remove(client_id);
        let Some(slots) = slots else {
            // Absent slots were already gone; nothing to do.
            return;
        };

        for connection in slots.into_iter().flatten() {
            if let Err(e) = connection.unregister().await {
                warn!("Failed to unregister proxy of {}: {}", client_id, e);
            }
        }
        debug!("Dropped proxies of departed client {}", client_id);
    }

    /// Drop one proxy slot without unregistering (the hub already
    /// disconnected it)
    pub(crate) async fn remove_proxy_slot(&self, local_client_id: &str, hub_index: usize) {
        let mut proxies = self.proxies.lock().await;
        let removed = proxies
            .get_mut(local_client_id)
            .and_then(|slots| slots.get_mut(hub_index))
            .and_then(Option::take);
        if removed.is_some() {
            debug!(
                "Dropped proxy of {} on hub index {}",
                local_client_id, hub_index
            );
        }
    }

    /// Drop every proxy connection this manager registered on hub
    /// `hub_index`, unregistering when the hub is still reachable
    async fn discard_proxies_on(&self, hub_index: usize, unregister: bool) {
        let mut dropped = Vec::new();
        {
            let mut proxies = self.proxies.lock().await;
            for (client_id, slots) in proxies.iter_mut() {
                if let Some(connection) = slots.get_mut(hub_index).and_then(Option::take) {
                    dropped.push((client_id.clone(), connection));
                }
            }
        }

        for (client_id, connection) in dropped {
            if unregister {
                if let Err(e) = connection.unregister().await {
                    warn!("Failed to unregister proxy of {}: {}", client_id, e);
                }
            }
        }
    }

    /// Export-adjusted metadata a proxy declares on a remote hub
    fn proxy_metadata(&self, info: &ClientInfo) -> Option<Metadata> {
        let mut metadata = info.metadata.clone()?;
        if let Some(exporter) = self.exporter() {
            exporter.export_metadata(&mut metadata);
        }
        metadata
            .attrs
            .insert(PROXY_SOURCE_ATTR.to_string(), self.label().into());
        Some(metadata)
    }

    /// Export-adjusted subscriptions a proxy declares on a remote hub
    ///
    /// Administrative subscriptions are stripped: the receiving hub
    /// generates its own administrative traffic.
    fn proxy_subscriptions(&self, info: &ClientInfo) -> Option<Subscriptions> {
        let mut subscriptions = info.subscriptions.clone()?;
        subscriptions.retain_mtypes(|mtype| !mtypes::is_admin_pattern(mtype));
        if let Some(exporter) = self.exporter() {
            exporter.export_subscriptions(&mut subscriptions);
        }
        Some(subscriptions)
    }
}

/// Serial consumer of registry change events for one manager
async fn pump_events(
    manager: Weak<ProxyManager>,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        match event {
            ClientEvent::Added(info) => manager.local_client_added(info).await,
            ClientEvent::Updated(info) => manager.local_client_updated(info).await,
            ClientEvent::Removed(id) => manager.local_client_removed(&id).await,
        }
    }
}

/// Receiver for the monitoring connection: feeds administrative events to
/// the registry and reacts to hub shutdown
struct MonitorReceiver {
    manager: Weak<ProxyManager>,
}

#[async_trait]
impl CallbackReceiver for MonitorReceiver {
    async fn receive_notification(&self, sender_id: &str, message: &Message) -> BridgeResult<()> {
        let Some(manager) = self.manager.upgrade() else {
            return Ok(());
        };

        match message.mtype.as_str() {
            mtypes::EVENT_SHUTDOWN | mtypes::DISCONNECT => {
                let from_hub = manager
                    .connection
                    .lock()
                    .await
                    .as_ref()
                    .is_some_and(|conn| conn.hub_client_id() == sender_id);
                if from_hub {
                    manager.connection_lost().await;
                } else {
                    warn!(
                        "Ignoring {} from non-hub sender {}",
                        message.mtype, sender_id
                    );
                }
                Ok(())
            }
            _ => manager.registry.handle_event(sender_id, message),
        }
    }

    async fn receive_call(
        &self,
        sender_id: &str,
        msg_id: &str,
        message: &Message,
    ) -> BridgeResult<()> {
        let Some(manager) = self.manager.upgrade() else {
            return Ok(());
        };

        // The monitor is not a service endpoint, but a call must still get
        // an answer.
        debug!(
            "Refusing call {} from {} on monitoring connection",
            message.mtype, sender_id
        );
        let connection = manager.connection.lock().await.clone();
        if let Some(connection) = connection {
            let response = Response::error(ErrorInfo::new(format!(
                "bridge monitor does not handle calls ({})",
                message.mtype
            )));
            connection.reply(msg_id, &response).await?;
        }
        Ok(())
    }

    async fn receive_response(
        &self,
        responder_id: &str,
        tag: &str,
        _response: &Response,
    ) -> BridgeResult<()> {
        warn!(
            "Unexpected response from {} on monitoring connection (tag {})",
            responder_id, tag
        );
        Ok(())
    }
}
