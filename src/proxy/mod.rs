//! Cross-hub proxy lifecycle and message tunneling

mod handler;
mod manager;

pub use manager::{ProxyManager, PROXY_SOURCE_ATTR};
