//! Message and response models
//!
//! A `Message` is an MType string plus a parameter map. A `Response` carries
//! a status, a result map on success, and error information otherwise. A
//! call is correlated to its eventual reply by a caller-chosen tag; across
//! the bridge the tag of a forwarded call is the receiving hub's message ID,
//! verbatim, so no correlation table is needed.

use serde::{Deserialize, Serialize};

use super::{BridgeError, BridgeResult, Value, ValueMap};

/// A typed message: MType plus parameter map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The string naming the message's semantic type
    pub mtype: String,
    /// Message parameters
    #[serde(default)]
    pub params: ValueMap,
}

impl Message {
    /// Create a new message with no parameters
    pub fn new(mtype: impl Into<String>) -> Self {
        Self {
            mtype: mtype.into(),
            params: ValueMap::new(),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Get a parameter by key
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Get a string parameter by key
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Get a required string parameter
    ///
    /// A missing required parameter is a fatal input error for the event
    /// that carried it, not something to queue or guess around.
    pub fn require_str(&self, key: &str) -> BridgeResult<&str> {
        self.param_str(key).ok_or_else(|| {
            BridgeError::malformed(format!(
                "message {} is missing required parameter '{}'",
                self.mtype, key
            ))
        })
    }
}

/// Response status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Warning,
    Error,
}

/// Error information attached to a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-oriented error text
    pub text: String,
    /// Human-readable explanation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_text: Option<String>,
    /// Stack-trace-like debug text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_text: Option<String>,
}

impl ErrorInfo {
    /// Create error info with just the error text
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            user_text: None,
            debug_text: None,
        }
    }

    /// Set the human-readable text
    pub fn with_user_text(mut self, text: impl Into<String>) -> Self {
        self.user_text = Some(text.into());
        self
    }
}

/// Reply to a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    /// Result map; meaningful for Ok and Warning status
    #[serde(default)]
    pub result: ValueMap,
    /// Error info; present for Error and Warning status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Response {
    /// Create a successful response
    pub fn ok(result: ValueMap) -> Self {
        Self {
            status: ResponseStatus::Ok,
            result,
            error: None,
        }
    }

    /// Create an empty successful response
    pub fn ok_empty() -> Self {
        Self::ok(ValueMap::new())
    }

    /// Create an error response
    pub fn error(info: ErrorInfo) -> Self {
        Self {
            status: ResponseStatus::Error,
            result: ValueMap::new(),
            error: Some(info),
        }
    }

    /// Whether the response reports success
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_params() {
        let msg = Message::new("table.load.votable")
            .with_param("url", "http://localhost/t.vot")
            .with_param("name", "catalog");

        assert_eq!(msg.param_str("url"), Some("http://localhost/t.vot"));
        assert_eq!(msg.require_str("name").unwrap(), "catalog");
    }

    #[test]
    fn test_require_str_missing() {
        let msg = Message::new("hub.event.register");
        let err = msg.require_str("id").unwrap_err();
        assert!(matches!(err, BridgeError::MalformedEvent(_)));
    }

    #[test]
    fn test_error_response() {
        let resp = Response::error(
            ErrorInfo::new("no proxy").with_user_text("sender has no proxy on this hub"),
        );
        assert!(!resp.is_ok());
        assert_eq!(resp.error.unwrap().text, "no proxy");
    }
}
