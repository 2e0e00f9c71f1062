//! Hub interface boundary
//!
//! Traits implemented by the external transport, and the administrative
//! MType vocabulary the hub speaks.

mod connection;
pub mod mtypes;

pub use connection::*;
