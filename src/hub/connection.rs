//! Consumed hub interfaces
//!
//! The bridge core never talks to a wire directly; it consumes these traits,
//! implemented by an external transport (the reference transport is an
//! RPC-over-HTTP protocol restricted to string/list/map values). Any
//! operation may fail with a transport error, which callers treat as "this
//! client or operation is currently unreachable", never as fatal.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{BridgeResult, Message, Metadata, Response, Subscriptions};

/// One client's live registration with one hub
///
/// Ownership: exactly one owner (the manager or registry that created it);
/// destroyed by explicit unregistration.
#[async_trait]
pub trait HubConnection: Send + Sync {
    /// This connection's own client ID within the hub's namespace
    fn client_id(&self) -> &str;

    /// The hub's own administrative client ID
    fn hub_client_id(&self) -> &str;

    /// Declare this client's metadata
    async fn declare_metadata(&self, metadata: &Metadata) -> BridgeResult<()>;

    /// Declare this client's subscriptions
    async fn declare_subscriptions(&self, subscriptions: &Subscriptions) -> BridgeResult<()>;

    /// List the IDs of all clients currently registered with the hub
    async fn get_registered_clients(&self) -> BridgeResult<Vec<String>>;

    /// Query another client's declared metadata
    async fn get_metadata(&self, client_id: &str) -> BridgeResult<Metadata>;

    /// Query another client's declared subscriptions
    async fn get_subscriptions(&self, client_id: &str) -> BridgeResult<Subscriptions>;

    /// Send a fire-and-forget notification to one client
    async fn notify(&self, recipient_id: &str, message: &Message) -> BridgeResult<()>;

    /// Send a notification to every subscribed client; returns recipient IDs
    async fn notify_all(&self, message: &Message) -> BridgeResult<Vec<String>>;

    /// Send a call expecting one reply, correlated by `tag`; returns the
    /// hub-assigned message ID
    async fn call(&self, recipient_id: &str, tag: &str, message: &Message)
        -> BridgeResult<String>;

    /// Send a call to every subscribed client; returns recipient ID to
    /// message ID
    async fn call_all(
        &self,
        tag: &str,
        message: &Message,
    ) -> BridgeResult<HashMap<String, String>>;

    /// Reply to a call previously received under `msg_id`
    async fn reply(&self, msg_id: &str, response: &Response) -> BridgeResult<()>;

    /// Install the receiver invoked for inbound traffic addressed to this
    /// client
    fn set_receiver(&self, receiver: Arc<dyn CallbackReceiver>);

    /// Unregister from the hub, destroying this connection
    async fn unregister(&self) -> BridgeResult<()>;
}

/// Receiver for inbound traffic on one hub connection
///
/// Invoked by the transport collaborator; each delivery runs on its own
/// worker, so implementations must tolerate concurrent invocation.
#[async_trait]
pub trait CallbackReceiver: Send + Sync {
    /// A notification was sent to this client
    async fn receive_notification(&self, sender_id: &str, message: &Message) -> BridgeResult<()>;

    /// A call was sent to this client; a reply under `msg_id` is expected
    async fn receive_call(
        &self,
        sender_id: &str,
        msg_id: &str,
        message: &Message,
    ) -> BridgeResult<()>;

    /// A reply arrived for a call this client previously sent under `tag`
    async fn receive_response(
        &self,
        responder_id: &str,
        tag: &str,
        response: &Response,
    ) -> BridgeResult<()>;
}

/// Factory for registrations with one particular hub
///
/// Registration/handshake and endpoint discovery live behind this trait;
/// by the time a connection is obtained, authentication has already
/// happened.
#[async_trait]
pub trait HubProfile: Send + Sync {
    /// Short human-readable label for this hub, used in logs and provenance
    fn label(&self) -> &str;

    /// Register a new client with the hub
    async fn register(&self) -> BridgeResult<Arc<dyn HubConnection>>;
}
