//! Hub Bridge - Cross-Hub Client Bridge
//!
//! Makes independently-running message hubs interoperate as if they were
//! one: every client registered with one hub appears as a proxy client on
//! every other bridged hub, so any client can message any other regardless
//! of where it registered. Provides:
//! - Order-tolerant per-hub client registries
//! - Proxy lifecycle management and three-pattern message tunneling
//! - Loopback URL export for cross-machine payloads
//! - Aggregate bridge start/stop/liveness
//!
//! The hub itself, the wire transport, and endpoint discovery are external
//! collaborators consumed through the traits in [`hub`].

pub mod bridge;
pub mod config;
pub mod export;
pub mod hub;
pub mod models;
pub mod proxy;
pub mod registry;

// Re-export commonly used types
pub use bridge::Bridge;
pub use config::Settings;
pub use export::UrlExporter;
pub use hub::{CallbackReceiver, HubConnection, HubProfile};
pub use models::{
    BridgeError, BridgeResult, ClientInfo, ErrorInfo, Message, Metadata, Response,
    ResponseStatus, Subscriptions, Value,
};
pub use proxy::ProxyManager;
pub use registry::{ClientEvent, ClientRegistry};

/// Version of the hub-bridge crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
