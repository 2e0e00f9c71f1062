//! In-memory hub for integration tests
//!
//! A complete routing hub implementing the consumed `HubConnection` traits:
//! registration, metadata/subscriptions with administrative events, and the
//! three message patterns with hub-assigned message IDs. Callbacks are
//! delivered through one ordered pump task per registered client, matching
//! the one-worker-per-connection model of the real transport.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

use hub_bridge::hub::{mtypes, CallbackReceiver, HubConnection, HubProfile};
use hub_bridge::models::{
    BridgeError, BridgeResult, Message, Metadata, Response, Subscriptions, Value, ValueMap,
};

/// The hub's own administrative client ID
pub const HUB_ID: &str = "hub";

enum Delivery {
    Notify {
        sender: String,
        message: Message,
    },
    Call {
        sender: String,
        msg_id: String,
        message: Message,
    },
    Response {
        responder: String,
        tag: String,
        response: Response,
    },
}

struct ClientRecord {
    metadata: Metadata,
    subscriptions: Subscriptions,
    deliveries: mpsc::UnboundedSender<Delivery>,
}

struct HubState {
    clients: HashMap<String, ClientRecord>,
    /// In-flight calls: message ID to (caller, caller's tag)
    pending: HashMap<String, (String, String)>,
    next_client: u64,
    next_msg: u64,
    closed: bool,
}

/// An in-process message hub
pub struct TestHub {
    name: String,
    state: Mutex<HubState>,
}

impl TestHub {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let mut clients = HashMap::new();

        // The hub itself is an ordinary, if mute, registered client.
        let (tx, _rx) = mpsc::unbounded_channel();
        clients.insert(
            HUB_ID.to_string(),
            ClientRecord {
                metadata: Metadata::named(&name),
                subscriptions: Subscriptions::new(),
                deliveries: tx,
            },
        );

        Arc::new(Self {
            name,
            state: Mutex::new(HubState {
                clients,
                pending: HashMap::new(),
                next_client: 0,
                next_msg: 0,
                closed: false,
            }),
        })
    }

    pub fn profile(self: &Arc<Self>) -> Arc<dyn HubProfile> {
        Arc::new(TestProfile {
            hub: Arc::clone(self),
        })
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.state.lock().clients.keys().cloned().collect()
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    pub fn subscribed_to(&self, mtype: &str) -> Vec<String> {
        self.state
            .lock()
            .clients
            .iter()
            .filter(|(_, rec)| subscription_matches(&rec.subscriptions, mtype))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn metadata_of(&self, client_id: &str) -> Option<Metadata> {
        self.state
            .lock()
            .clients
            .get(client_id)
            .map(|rec| rec.metadata.clone())
    }

    /// Kill the hub: announce shutdown, then refuse all further operations
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        emit_event(&state, Message::new(mtypes::EVENT_SHUTDOWN));
        state.closed = true;
        state.clients.clear();
        state.pending.clear();
    }

    /// Forcibly disconnect one client, hub-side
    pub fn disconnect_client(&self, client_id: &str) {
        let mut state = self.state.lock();
        if let Some(rec) = state.clients.get(client_id) {
            let _ = rec.deliveries.send(Delivery::Notify {
                sender: HUB_ID.to_string(),
                message: Message::new(mtypes::DISCONNECT)
                    .with_param("reason", "disconnected by test"),
            });
        }
        if state.clients.remove(client_id).is_some() {
            emit_event(
                &state,
                Message::new(mtypes::EVENT_UNREGISTER).with_param(mtypes::PARAM_ID, client_id),
            );
        }
    }

    fn connect(self: &Arc<Self>) -> BridgeResult<Arc<TestConnection>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(BridgeError::transport(format!("hub {} is down", self.name)));
        }

        state.next_client += 1;
        let client_id = format!("{}-c{}", self.name, state.next_client);

        let (tx, rx) = mpsc::unbounded_channel();
        let (receiver_tx, receiver_rx) = watch::channel(None);
        spawn_pump(rx, receiver_rx);

        state.clients.insert(
            client_id.clone(),
            ClientRecord {
                metadata: Metadata::default(),
                subscriptions: Subscriptions::new(),
                deliveries: tx,
            },
        );
        emit_event(
            &state,
            Message::new(mtypes::EVENT_REGISTER).with_param(mtypes::PARAM_ID, client_id.as_str()),
        );

        Ok(Arc::new(TestConnection {
            hub: Arc::clone(self),
            client_id,
            receiver_tx,
        }))
    }
}

/// Deliver an administrative event from the hub to every subscribed client
fn emit_event(state: &HubState, message: Message) {
    for (id, rec) in &state.clients {
        if id != HUB_ID && subscription_matches(&rec.subscriptions, &message.mtype) {
            let _ = rec.deliveries.send(Delivery::Notify {
                sender: HUB_ID.to_string(),
                message: message.clone(),
            });
        }
    }
}

fn subscription_matches(subscriptions: &Subscriptions, mtype: &str) -> bool {
    subscriptions.0.keys().any(|pattern| {
        pattern == mtype
            || pattern == "*"
            || (pattern.ends_with(".*") && mtype.starts_with(&pattern[..pattern.len() - 1]))
    })
}

fn spawn_pump(
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
    mut receiver_rx: watch::Receiver<Option<Arc<dyn CallbackReceiver>>>,
) {
    tokio::spawn(async move {
        // Hold deliveries until the client installs its receiver.
        let receiver = loop {
            if let Some(receiver) = receiver_rx.borrow().clone() {
                break receiver;
            }
            if receiver_rx.changed().await.is_err() {
                return;
            }
        };

        while let Some(delivery) = deliveries.recv().await {
            let result = match delivery {
                Delivery::Notify { sender, message } => {
                    receiver.receive_notification(&sender, &message).await
                }
                Delivery::Call {
                    sender,
                    msg_id,
                    message,
                } => receiver.receive_call(&sender, &msg_id, &message).await,
                Delivery::Response {
                    responder,
                    tag,
                    response,
                } => receiver.receive_response(&responder, &tag, &response).await,
            };
            if let Err(e) = result {
                eprintln!("callback error: {}", e);
            }
        }
    });
}

struct TestProfile {
    hub: Arc<TestHub>,
}

#[async_trait]
impl HubProfile for TestProfile {
    fn label(&self) -> &str {
        &self.hub.name
    }

    async fn register(&self) -> BridgeResult<Arc<dyn HubConnection>> {
        let connection: Arc<dyn HubConnection> = self.hub.connect()?;
        Ok(connection)
    }
}

pub struct TestConnection {
    hub: Arc<TestHub>,
    client_id: String,
    receiver_tx: watch::Sender<Option<Arc<dyn CallbackReceiver>>>,
}

impl TestConnection {
    fn send_to(
        state: &HubState,
        recipient_id: &str,
        delivery: Delivery,
    ) -> BridgeResult<()> {
        let rec = state
            .clients
            .get(recipient_id)
            .ok_or_else(|| BridgeError::ClientNotFound(recipient_id.to_string()))?;
        let _ = rec.deliveries.send(delivery);
        Ok(())
    }

    fn checked_state(&self) -> BridgeResult<parking_lot::MutexGuard<'_, HubState>> {
        let state = self.hub.state.lock();
        if state.closed {
            return Err(BridgeError::transport(format!(
                "hub {} is down",
                self.hub.name
            )));
        }
        if !state.clients.contains_key(&self.client_id) {
            return Err(BridgeError::transport(format!(
                "client {} is not registered",
                self.client_id
            )));
        }
        Ok(state)
    }
}

#[async_trait]
impl HubConnection for TestConnection {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn hub_client_id(&self) -> &str {
        HUB_ID
    }

    async fn declare_metadata(&self, metadata: &Metadata) -> BridgeResult<()> {
        let mut state = self.checked_state()?;
        if let Some(rec) = state.clients.get_mut(&self.client_id) {
            rec.metadata = metadata.clone();
        }
        emit_event(
            &state,
            Message::new(mtypes::EVENT_METADATA)
                .with_param(mtypes::PARAM_ID, self.client_id.as_str())
                .with_param(mtypes::PARAM_METADATA, Value::Map(metadata.to_map())),
        );
        Ok(())
    }

    async fn declare_subscriptions(&self, subscriptions: &Subscriptions) -> BridgeResult<()> {
        let mut state = self.checked_state()?;
        if let Some(rec) = state.clients.get_mut(&self.client_id) {
            rec.subscriptions = subscriptions.clone();
        }
        let map: ValueMap = subscriptions
            .0
            .iter()
            .map(|(mtype, attrs)| (mtype.clone(), Value::Map(attrs.clone())))
            .collect();
        emit_event(
            &state,
            Message::new(mtypes::EVENT_SUBSCRIPTIONS)
                .with_param(mtypes::PARAM_ID, self.client_id.as_str())
                .with_param(mtypes::PARAM_SUBSCRIPTIONS, Value::Map(map)),
        );
        Ok(())
    }

    async fn get_registered_clients(&self) -> BridgeResult<Vec<String>> {
        let state = self.checked_state()?;
        Ok(state.clients.keys().cloned().collect())
    }

    async fn get_metadata(&self, client_id: &str) -> BridgeResult<Metadata> {
        let state = self.checked_state()?;
        state
            .clients
            .get(client_id)
            .map(|rec| rec.metadata.clone())
            .ok_or_else(|| BridgeError::ClientNotFound(client_id.to_string()))
    }

    async fn get_subscriptions(&self, client_id: &str) -> BridgeResult<Subscriptions> {
        let state = self.checked_state()?;
        state
            .clients
            .get(client_id)
            .map(|rec| rec.subscriptions.clone())
            .ok_or_else(|| BridgeError::ClientNotFound(client_id.to_string()))
    }

    async fn notify(&self, recipient_id: &str, message: &Message) -> BridgeResult<()> {
        let state = self.checked_state()?;
        Self::send_to(
            &state,
            recipient_id,
            Delivery::Notify {
                sender: self.client_id.clone(),
                message: message.clone(),
            },
        )
    }

    async fn notify_all(&self, message: &Message) -> BridgeResult<Vec<String>> {
        let state = self.checked_state()?;
        let mut recipients = Vec::new();
        for (id, rec) in &state.clients {
            if *id != self.client_id
                && id != HUB_ID
                && subscription_matches(&rec.subscriptions, &message.mtype)
            {
                let _ = rec.deliveries.send(Delivery::Notify {
                    sender: self.client_id.clone(),
                    message: message.clone(),
                });
                recipients.push(id.clone());
            }
        }
        Ok(recipients)
    }

    async fn call(
        &self,
        recipient_id: &str,
        tag: &str,
        message: &Message,
    ) -> BridgeResult<String> {
        let mut state = self.checked_state()?;
        if !state.clients.contains_key(recipient_id) {
            return Err(BridgeError::ClientNotFound(recipient_id.to_string()));
        }

        state.next_msg += 1;
        let msg_id = format!("{}-m{}", self.hub.name, state.next_msg);
        state
            .pending
            .insert(msg_id.clone(), (self.client_id.clone(), tag.to_string()));

        Self::send_to(
            &state,
            recipient_id,
            Delivery::Call {
                sender: self.client_id.clone(),
                msg_id: msg_id.clone(),
                message: message.clone(),
            },
        )?;
        Ok(msg_id)
    }

    async fn call_all(
        &self,
        tag: &str,
        message: &Message,
    ) -> BridgeResult<HashMap<String, String>> {
        let mut state = self.checked_state()?;
        let recipients: Vec<String> = state
            .clients
            .iter()
            .filter(|(id, rec)| {
                **id != self.client_id
                    && *id != HUB_ID
                    && subscription_matches(&rec.subscriptions, &message.mtype)
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut sent = HashMap::new();
        for recipient_id in recipients {
            state.next_msg += 1;
            let msg_id = format!("{}-m{}", self.hub.name, state.next_msg);
            state
                .pending
                .insert(msg_id.clone(), (self.client_id.clone(), tag.to_string()));
            Self::send_to(
                &state,
                &recipient_id,
                Delivery::Call {
                    sender: self.client_id.clone(),
                    msg_id: msg_id.clone(),
                    message: message.clone(),
                },
            )?;
            sent.insert(recipient_id, msg_id);
        }
        Ok(sent)
    }

    async fn reply(&self, msg_id: &str, response: &Response) -> BridgeResult<()> {
        let mut state = self.checked_state()?;
        let (caller, tag) = state
            .pending
            .remove(msg_id)
            .ok_or_else(|| BridgeError::transport(format!("unknown message id {}", msg_id)))?;
        Self::send_to(
            &state,
            &caller,
            Delivery::Response {
                responder: self.client_id.clone(),
                tag,
                response: response.clone(),
            },
        )
    }

    fn set_receiver(&self, receiver: Arc<dyn CallbackReceiver>) {
        let _ = self.receiver_tx.send(Some(receiver));
    }

    async fn unregister(&self) -> BridgeResult<()> {
        let mut state = self.checked_state()?;
        state.clients.remove(&self.client_id);
        emit_event(
            &state,
            Message::new(mtypes::EVENT_UNREGISTER)
                .with_param(mtypes::PARAM_ID, self.client_id.as_str()),
        );
        Ok(())
    }
}

/// A genuine hub client that records inbound traffic and echoes calls
pub struct TestClient {
    pub id: String,
    pub connection: Arc<dyn HubConnection>,
    pub notifications: Arc<Mutex<Vec<(String, Message)>>>,
    pub responses: Arc<Mutex<Vec<(String, String, Response)>>>,
}

struct EchoReceiver {
    id: String,
    connection: Weak<dyn HubConnection>,
    notifications: Arc<Mutex<Vec<(String, Message)>>>,
    responses: Arc<Mutex<Vec<(String, String, Response)>>>,
}

#[async_trait]
impl CallbackReceiver for EchoReceiver {
    async fn receive_notification(&self, sender_id: &str, message: &Message) -> BridgeResult<()> {
        self.notifications
            .lock()
            .push((sender_id.to_string(), message.clone()));
        Ok(())
    }

    async fn receive_call(
        &self,
        sender_id: &str,
        msg_id: &str,
        message: &Message,
    ) -> BridgeResult<()> {
        let mut result = ValueMap::new();
        result.insert("echo.responder".to_string(), Value::str(&self.id));
        result.insert("echo.mtype".to_string(), Value::str(&message.mtype));
        result.insert("echo.sender".to_string(), Value::str(sender_id));
        if let Some(text) = message.param_str("text") {
            result.insert("echo.text".to_string(), Value::str(text));
        }

        if let Some(connection) = self.connection.upgrade() {
            connection.reply(msg_id, &Response::ok(result)).await?;
        }
        Ok(())
    }

    async fn receive_response(
        &self,
        responder_id: &str,
        tag: &str,
        response: &Response,
    ) -> BridgeResult<()> {
        self.responses
            .lock()
            .push((responder_id.to_string(), tag.to_string(), response.clone()));
        Ok(())
    }
}

impl TestClient {
    pub async fn join(hub: &Arc<TestHub>, name: &str, mtypes: &[&str]) -> BridgeResult<Self> {
        let connection = hub.profile().register().await?;
        let id = connection.client_id().to_string();

        let notifications = Arc::new(Mutex::new(Vec::new()));
        let responses = Arc::new(Mutex::new(Vec::new()));
        connection.set_receiver(Arc::new(EchoReceiver {
            id: id.clone(),
            connection: Arc::downgrade(&connection),
            notifications: Arc::clone(&notifications),
            responses: Arc::clone(&responses),
        }));

        connection.declare_metadata(&Metadata::named(name)).await?;
        let mut subscriptions = Subscriptions::new();
        for mtype in mtypes {
            subscriptions = subscriptions.with_mtype(*mtype);
        }
        connection.declare_subscriptions(&subscriptions).await?;

        Ok(Self {
            id,
            connection,
            notifications,
            responses,
        })
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.lock().len()
    }

    pub fn response_count(&self) -> usize {
        self.responses.lock().len()
    }
}

/// Poll a condition until it holds or the timeout elapses
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Initialise test logging once; respects RUST_LOG
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
