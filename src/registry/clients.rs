//! Order-tolerant mirror of one hub's client list
//!
//! The registry digests the hub's administrative event stream into an
//! authoritative table of registered clients. Delivery order is not
//! guaranteed, so operations for unknown client IDs are parked in a
//! [`PendingPool`] and replayed when the registration catches up. This
//! bounded-staleness policy is the only consistency mechanism; no locking
//! protocol between hubs exists.

use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::pending::PendingPool;
use crate::hub::{mtypes, HubConnection};
use crate::models::{
    BridgeResult, ClientInfo, Message, Metadata, Subscriptions, Value, ValueMap,
};

/// A change to the observed client table
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A client appeared in the table
    Added(ClientInfo),
    /// A client's metadata or subscriptions changed
    Updated(ClientInfo),
    /// A client left the table
    Removed(String),
}

#[derive(Default)]
struct RegistryState {
    clients: HashMap<String, ClientInfo>,
    hub_id: Option<String>,
    self_id: Option<String>,
}

/// Per-hub-connection client registry
pub struct ClientRegistry {
    inner: Mutex<RegistryState>,
    pending: PendingPool,
    listeners: Mutex<Vec<mpsc::UnboundedSender<ClientEvent>>>,
}

impl ClientRegistry {
    /// Create a registry whose parked operations expire after
    /// `pending_expiry`
    pub fn new(pending_expiry: Duration) -> Self {
        Self {
            inner: Mutex::new(RegistryState::default()),
            pending: PendingPool::new(pending_expiry),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to table changes
    ///
    /// Events are delivered in table-mutation order on an unbounded channel.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().push(tx);
        rx
    }

    fn emit(&self, event: ClientEvent) {
        self.listeners
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Replace the whole table by enumerating the hub's current clients
    ///
    /// Passing `None` clears the table. Metadata and subscriptions are
    /// fetched synchronously per client; parked operations matching a
    /// now-known client are replayed.
    pub async fn initialize(&self, connection: Option<&dyn HubConnection>) -> BridgeResult<()> {
        let removed: Vec<String> = {
            let mut state = self.inner.lock();
            state.hub_id = None;
            state.self_id = None;
            state.clients.drain().map(|(id, _)| id).collect()
        };
        for id in removed {
            self.emit(ClientEvent::Removed(id));
        }

        let connection = match connection {
            Some(c) => c,
            None => return Ok(()),
        };

        {
            let mut state = self.inner.lock();
            state.hub_id = Some(connection.hub_client_id().to_string());
            state.self_id = Some(connection.client_id().to_string());
        }

        let mut ids = connection.get_registered_clients().await?;
        let self_id = connection.client_id().to_string();
        if !ids.iter().any(|id| *id == self_id) {
            ids.push(self_id);
        }

        // Fetch everything before touching the table again; the table lock
        // is never held across a remote round trip.
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let metadata = match connection.get_metadata(&id).await {
                Ok(meta) => Some(meta),
                Err(e) => {
                    warn!("Failed to fetch metadata for client {}: {}", id, e);
                    None
                }
            };
            let subscriptions = match connection.get_subscriptions(&id).await {
                Ok(subs) => Some(subs),
                Err(e) => {
                    warn!("Failed to fetch subscriptions for client {}: {}", id, e);
                    None
                }
            };
            let mut row = ClientInfo::new(id);
            row.metadata = metadata;
            row.subscriptions = subscriptions;
            rows.push(row);
        }

        for row in rows {
            let id = row.id.clone();
            let event = {
                let mut state = self.inner.lock();
                match state.clients.entry(id.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(row.clone());
                        Some(ClientEvent::Added(row))
                    }
                    // An event beat the enumeration to it; fill in anything
                    // the event stream has not supplied yet.
                    Entry::Occupied(mut slot) => {
                        let existing = slot.get_mut();
                        let mut changed = false;
                        if existing.metadata.is_none() && row.metadata.is_some() {
                            existing.metadata = row.metadata;
                            changed = true;
                        }
                        if existing.subscriptions.is_none() && row.subscriptions.is_some() {
                            existing.subscriptions = row.subscriptions;
                            changed = true;
                        }
                        changed.then(|| ClientEvent::Updated(existing.clone()))
                    }
                }
            };
            if let Some(event) = event {
                self.emit(event);
            }
            self.replay_pending(&id);
        }

        debug!("Registry initialized with {} clients", self.len());
        Ok(())
    }

    /// Digest one administrative event from the hub
    ///
    /// Returns an error only for events that are malformed in themselves
    /// (missing required parameters); such an error does not affect other
    /// events.
    pub fn handle_event(&self, sender_id: &str, message: &Message) -> BridgeResult<()> {
        // Spoofed administrative traffic is a hub policy problem, not ours;
        // accept it but leave a trace.
        if let Some(hub_id) = self.inner.lock().hub_id.clone() {
            if sender_id != hub_id {
                warn!(
                    "Administrative event {} from non-hub sender {}",
                    message.mtype, sender_id
                );
            }
        }

        match message.mtype.as_str() {
            mtypes::EVENT_REGISTER => {
                let id = message.require_str(mtypes::PARAM_ID)?;
                self.register_client(id);
                Ok(())
            }
            mtypes::EVENT_UNREGISTER => {
                let id = message.require_str(mtypes::PARAM_ID)?;
                self.unregister_client(id);
                Ok(())
            }
            mtypes::EVENT_METADATA | mtypes::EVENT_SUBSCRIPTIONS => {
                let id = message.require_str(mtypes::PARAM_ID)?;
                if self.contains(id) {
                    self.apply_update(id, message)
                } else {
                    debug!(
                        "Parking {} for unknown client {} pending registration",
                        message.mtype, id
                    );
                    self.pending.push(id, sender_id, message.clone());
                    Ok(())
                }
            }
            other => {
                debug!("Ignoring administrative event {}", other);
                Ok(())
            }
        }
    }

    fn register_client(&self, id: &str) {
        let event = {
            let mut state = self.inner.lock();
            match state.clients.entry(id.to_string()) {
                Entry::Vacant(slot) => {
                    let row = ClientInfo::new(id);
                    slot.insert(row.clone());
                    Some(ClientEvent::Added(row))
                }
                Entry::Occupied(_) => {
                    debug!("Client {} already registered", id);
                    None
                }
            }
        };
        if let Some(event) = event {
            self.emit(event);
        }
        self.replay_pending(id);
    }

    fn unregister_client(&self, id: &str) {
        let removed = self.inner.lock().clients.remove(id).is_some();
        if removed {
            self.emit(ClientEvent::Removed(id.to_string()));
        } else {
            debug!("Unregister for unknown client {}", id);
        }

        // The hope of a reordered registration is abandoned once the client
        // is gone for good.
        let dropped = self.pending.discard_for(id);
        if dropped > 0 {
            warn!(
                "Abandoned {} pending operations for unregistered client {}",
                dropped, id
            );
        }
    }

    fn replay_pending(&self, id: &str) {
        for op in self.pending.take_for(id) {
            debug!("Replaying parked {} for client {}", op.message.mtype, id);
            if let Err(e) = self.apply_update(id, &op.message) {
                warn!("Failed to replay parked operation for {}: {}", id, e);
            }
        }
    }

    fn apply_update(&self, id: &str, message: &Message) -> BridgeResult<()> {
        let event = {
            let mut state = self.inner.lock();
            let row = match state.clients.get_mut(id) {
                Some(row) => row,
                // Unregistered between the contains() check and now; the
                // unregister path already discarded its pending ops.
                None => return Ok(()),
            };
            match message.mtype.as_str() {
                mtypes::EVENT_METADATA => {
                    row.metadata = Some(parse_metadata(message)?);
                }
                mtypes::EVENT_SUBSCRIPTIONS => {
                    row.subscriptions = Some(parse_subscriptions(message)?);
                }
                _ => return Ok(()),
            }
            ClientEvent::Updated(row.clone())
        };
        self.emit(event);
        Ok(())
    }

    /// Whether a client ID is currently in the table
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().clients.contains_key(id)
    }

    /// Snapshot of one client's row
    pub fn get(&self, id: &str) -> Option<ClientInfo> {
        self.inner.lock().clients.get(id).cloned()
    }

    /// Snapshot of all rows
    pub fn clients(&self) -> Vec<ClientInfo> {
        self.inner.lock().clients.values().cloned().collect()
    }

    /// Number of clients in the table
    pub fn len(&self) -> usize {
        self.inner.lock().clients.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().clients.is_empty()
    }

    /// Number of parked operations awaiting a registration
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop parked operations older than the expiry window
    pub fn sweep_expired(&self) -> usize {
        let dropped = self.pending.sweep_expired();
        if dropped > 0 {
            warn!(
                "Discarded {} pending operations with no matching registration",
                dropped
            );
        }
        dropped
    }

    /// Start the periodic expiry sweep
    pub fn start_expiry_sweep(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = (self.pending.max_age() / 2).max(Duration::from_millis(100));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.sweep_expired();
            }
        })
    }
}

fn parse_metadata(message: &Message) -> BridgeResult<Metadata> {
    let map = require_map(message, mtypes::PARAM_METADATA)?;
    Ok(Metadata::from_map(map))
}

fn parse_subscriptions(message: &Message) -> BridgeResult<Subscriptions> {
    let map = require_map(message, mtypes::PARAM_SUBSCRIPTIONS)?;
    let mut subs = Subscriptions::new();
    for (mtype, attrs) in map {
        let attrs = match attrs {
            Value::Map(m) => m.clone(),
            _ => ValueMap::new(),
        };
        subs.0.insert(mtype.clone(), attrs);
    }
    Ok(subs)
}

fn require_map<'a>(message: &'a Message, key: &str) -> BridgeResult<&'a ValueMap> {
    message
        .param(key)
        .and_then(Value::as_map)
        .ok_or_else(|| {
            crate::models::BridgeError::malformed(format!(
                "message {} is missing required map parameter '{}'",
                message.mtype, key
            ))
        })
}
