//! Administrative MType vocabulary
//!
//! The hub announces registry changes to subscribed clients with these
//! message types. A proxy must never re-declare subscriptions to them: the
//! receiving hub generates its own administrative traffic, and a proxy that
//! relayed another hub's would duplicate it.

/// A client registered with the hub; params: `id`
pub const EVENT_REGISTER: &str = "hub.event.register";

/// A client unregistered from the hub; params: `id`
pub const EVENT_UNREGISTER: &str = "hub.event.unregister";

/// A client declared new metadata; params: `id`, `metadata`
pub const EVENT_METADATA: &str = "hub.event.metadata";

/// A client declared new subscriptions; params: `id`, `subscriptions`
pub const EVENT_SUBSCRIPTIONS: &str = "hub.event.subscriptions";

/// The hub is shutting down
pub const EVENT_SHUTDOWN: &str = "hub.event.shutdown";

/// The hub is forcibly disconnecting the recipient; params: `reason`
pub const DISCONNECT: &str = "hub.disconnect";

/// Parameter key naming the client an administrative event is about
pub const PARAM_ID: &str = "id";

/// Parameter key carrying a metadata map
pub const PARAM_METADATA: &str = "metadata";

/// Parameter key carrying a subscriptions map
pub const PARAM_SUBSCRIPTIONS: &str = "subscriptions";

/// Prefix common to the hub event MTypes
pub const EVENT_PREFIX: &str = "hub.event.";

/// Whether an MType is hub-administrative
pub fn is_admin_mtype(mtype: &str) -> bool {
    mtype.starts_with(EVENT_PREFIX) || mtype == DISCONNECT
}

/// Whether a subscription pattern would match administrative traffic and
/// must be stripped before re-publication by a proxy
///
/// Exact administrative MTypes and the `hub.event.*` wildcard are stripped;
/// broader wildcards are left alone since removing them would also suppress
/// legitimate traffic.
pub fn is_admin_pattern(pattern: &str) -> bool {
    is_admin_mtype(pattern) || pattern == "hub.event.*"
}
