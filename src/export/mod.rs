//! Loopback URL export
//!
//! Message payloads may embed URLs that point at the sending machine's
//! loopback interface. Forwarded verbatim to another machine they would
//! resolve to the wrong host, so the bridge rewrites the loopback host
//! segment to a name the remote side can reach. Deliberately best-effort:
//! no attempt at full URL parsing is made, and non-matching strings pass
//! through untouched.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;

use crate::models::{Message, Metadata, Response, Subscriptions, Value};

/// Loopback URL for a small fixed set of schemes: the host segment must be
/// followed by a port, a path, whitespace/quoting, or the end of the string,
/// so that e.g. `localhost.example.com` is left alone.
static LOOPBACK_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b(https?|ftp)://(127\.0\.0\.1|localhost)($|[:/\s"'<>])"#)
        .expect("loopback URL pattern must compile")
});

/// Rewrites loopback-host URLs so they resolve from a remote host
#[derive(Debug, Clone)]
pub struct UrlExporter {
    host: String,
}

impl UrlExporter {
    /// Create an exporter targeting the given host name
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// The target host name
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Rewrite every embedded loopback URL in a string
    pub fn export_str(&self, s: &str) -> String {
        LOOPBACK_URL
            .replace_all(s, |caps: &Captures| {
                format!("{}://{}{}", &caps[1], self.host, &caps[3])
            })
            .into_owned()
    }

    fn export_in_place(&self, s: &mut String) {
        if let Cow::Owned(rewritten) = LOOPBACK_URL.replace_all(s, |caps: &Captures| {
            format!("{}://{}{}", &caps[1], self.host, &caps[3])
        }) {
            *s = rewritten;
        }
    }

    /// Recursively rewrite a wire value in place
    pub fn export_value(&self, value: &mut Value) {
        match value {
            Value::Str(s) => self.export_in_place(s),
            Value::List(items) => {
                for item in items {
                    self.export_value(item);
                }
            }
            Value::Map(map) => {
                for item in map.values_mut() {
                    self.export_value(item);
                }
            }
        }
    }

    /// Rewrite a message's parameters in place
    pub fn export_message(&self, message: &mut Message) {
        for value in message.params.values_mut() {
            self.export_value(value);
        }
    }

    /// Rewrite a response's result map in place
    pub fn export_response(&self, response: &mut Response) {
        for value in response.result.values_mut() {
            self.export_value(value);
        }
    }

    /// Rewrite metadata in place: icon URL, description, and attributes
    pub fn export_metadata(&self, metadata: &mut Metadata) {
        if let Some(ref mut url) = metadata.icon_url {
            self.export_in_place(url);
        }
        if let Some(ref mut desc) = metadata.description {
            self.export_in_place(desc);
        }
        for value in metadata.attrs.values_mut() {
            self.export_value(value);
        }
    }

    /// Rewrite subscription attribute maps in place
    pub fn export_subscriptions(&self, subscriptions: &mut Subscriptions) {
        for attrs in subscriptions.0.values_mut() {
            for value in attrs.values_mut() {
                self.export_value(value);
            }
        }
    }
}
