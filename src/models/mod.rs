//! Data models for the hub bridge
//!
//! These models cover the wire vocabulary shared with the external hub
//! collaborators: values, messages, responses, and per-client state.

mod client;
mod error;
mod message;
mod value;

pub use client::*;
pub use error::*;
pub use message::*;
pub use value::*;
