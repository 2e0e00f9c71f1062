//! Per-hub client registry
//!
//! Digests the hub's administrative event stream into an order-tolerant,
//! eventually-consistent table of registered clients.

mod clients;
mod pending;

pub use clients::{ClientEvent, ClientRegistry};
pub use pending::{PendingOp, PendingPool};
