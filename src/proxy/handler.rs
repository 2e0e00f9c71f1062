//! Per-proxy callback handler
//!
//! One `ProxyHandler` is attached to every proxy connection a manager
//! registers on a remote hub. It tunnels the three message patterns back to
//! the true local client: notifications are forwarded, calls are forwarded
//! with the remote message ID reused verbatim as the local tag, and
//! responses invert that mapping to find their way home. Payloads are
//! rewritten with the exporter of the hub the traffic originated on.

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use super::manager::ProxyManager;
use crate::export::UrlExporter;
use crate::hub::{mtypes, CallbackReceiver, HubConnection};
use crate::models::{BridgeResult, ErrorInfo, Message, Response};

pub(crate) struct ProxyHandler {
    /// Manager owning the proxied local client
    manager: Arc<ProxyManager>,
    /// Index of the hub this proxy lives on
    remote_index: usize,
    /// The true local client this proxy stands in for
    local_client_id: String,
    /// This handler's own proxy connection, for synthesized error replies
    proxy: OnceCell<Weak<dyn HubConnection>>,
}

impl ProxyHandler {
    pub fn new(manager: Arc<ProxyManager>, remote_index: usize, local_client_id: String) -> Self {
        Self {
            manager,
            remote_index,
            local_client_id,
            proxy: OnceCell::new(),
        }
    }

    /// Record the connection this handler serves; called once, right after
    /// registration
    pub fn attach(&self, connection: &Arc<dyn HubConnection>) {
        let _ = self.proxy.set(Arc::downgrade(connection));
    }

    fn own_connection(&self) -> Option<Arc<dyn HubConnection>> {
        self.proxy.get().and_then(Weak::upgrade)
    }

    /// Exporter of the hub the inbound traffic originated on
    fn exporter(&self) -> Option<Arc<UrlExporter>> {
        self.manager
            .sibling(self.remote_index)
            .ok()
            .and_then(|m| m.exporter())
    }

    /// The local proxy standing in for a client of the remote hub
    ///
    /// Maintained by the remote-side manager; its absence means the sender
    /// is not bridged onto this handler's hub.
    async fn peer_proxy(
        &self,
        remote_client_id: &str,
    ) -> BridgeResult<Option<Arc<dyn HubConnection>>> {
        let remote_manager = self.manager.sibling(self.remote_index)?;
        let local_index = self.manager.self_index()?;
        Ok(remote_manager
            .proxy_connection(local_index, remote_client_id)
            .await)
    }

    fn sender_is_hub(&self, sender_id: &str) -> bool {
        self.own_connection()
            .map_or(false, |conn| conn.hub_client_id() == sender_id)
    }
}

#[async_trait]
impl CallbackReceiver for ProxyHandler {
    async fn receive_notification(&self, sender_id: &str, message: &Message) -> BridgeResult<()> {
        if mtypes::is_admin_mtype(&message.mtype) {
            // The hub telling this one proxy to go away takes down just
            // this slot, not the whole client.
            if message.mtype == mtypes::DISCONNECT || message.mtype == mtypes::EVENT_SHUTDOWN {
                if self.sender_is_hub(sender_id) {
                    debug!(
                        "Hub disconnected proxy of {} on hub index {}",
                        self.local_client_id, self.remote_index
                    );
                    self.manager
                        .remove_proxy_slot(&self.local_client_id, self.remote_index)
                        .await;
                } else {
                    warn!(
                        "Ignoring {} for proxy of {} from non-hub sender {}",
                        message.mtype, self.local_client_id, sender_id
                    );
                }
            } else {
                // Never relay administrative traffic; the local hub
                // generates its own.
                debug!("Not relaying administrative {} to {}", message.mtype, self.local_client_id);
            }
            return Ok(());
        }

        let mut message = message.clone();
        if let Some(exporter) = self.exporter() {
            exporter.export_message(&mut message);
        }

        match self.peer_proxy(sender_id).await? {
            Some(peer) => {
                if let Err(e) = peer.notify(&self.local_client_id, &message).await {
                    warn!(
                        "Failed to forward notification from {} to {}: {}",
                        sender_id, self.local_client_id, e
                    );
                }
            }
            None => {
                debug!(
                    "Dropping notification from {}: no local proxy for sender",
                    sender_id
                );
            }
        }
        Ok(())
    }

    async fn receive_call(
        &self,
        sender_id: &str,
        msg_id: &str,
        message: &Message,
    ) -> BridgeResult<()> {
        let mut message = message.clone();
        if let Some(exporter) = self.exporter() {
            exporter.export_message(&mut message);
        }

        let forward_failure = match self.peer_proxy(sender_id).await? {
            Some(peer) => {
                // The remote message ID becomes the local tag verbatim;
                // the reply path recovers it without a correlation table.
                match peer.call(&self.local_client_id, msg_id, &message).await {
                    Ok(_local_msg_id) => None,
                    Err(e) => {
                        warn!(
                            "Failed to forward call from {} to {}: {}",
                            sender_id, self.local_client_id, e
                        );
                        Some(format!("Bridge failed to forward call: {}", e))
                    }
                }
            }
            None => Some(format!("No bridge proxy available for sender {}", sender_id)),
        };

        // A call expects a reply; it must never be dropped silently.
        if let Some(reason) = forward_failure {
            let response = Response::error(
                ErrorInfo::new(reason.clone()).with_user_text(format!(
                    "Client {} could not be reached through the bridge",
                    self.local_client_id
                )),
            );
            match self.own_connection() {
                Some(conn) => {
                    if let Err(e) = conn.reply(msg_id, &response).await {
                        warn!("Failed to send synthesized error reply: {}", e);
                    }
                }
                None => warn!(
                    "Cannot synthesize error reply for call from {}: proxy connection gone",
                    sender_id
                ),
            }
        }
        Ok(())
    }

    async fn receive_response(
        &self,
        responder_id: &str,
        tag: &str,
        response: &Response,
    ) -> BridgeResult<()> {
        let mut response = response.clone();
        if let Some(exporter) = self.exporter() {
            exporter.export_response(&mut response);
        }

        // The tag used when the call was forwarded is the originating hub's
        // message ID; routing the reply home is just reading it back.
        let msg_id = tag;

        match self.peer_proxy(responder_id).await? {
            Some(peer) => {
                if let Err(e) = peer.reply(msg_id, &response).await {
                    warn!(
                        "Failed to forward response from {} (tag {}): {}",
                        responder_id, tag, e
                    );
                }
            }
            None => {
                // The proxy vanished between call and reply; nothing
                // survives to retry with.
                warn!(
                    "Dropping unroutable response from {} (tag {})",
                    responder_id, tag
                );
            }
        }
        Ok(())
    }
}
