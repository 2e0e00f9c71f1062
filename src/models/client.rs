//! Client models: metadata, subscriptions, and registry rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{Value, ValueMap};

/// Well-known metadata keys on the wire
pub const META_NAME: &str = "client.name";
pub const META_DESCRIPTION: &str = "client.description";
pub const META_ICON_URL: &str = "client.icon.url";

/// Declared metadata of a client
///
/// Name, description and icon URL are well-known entries; anything else a
/// client declares rides along in `attrs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    /// Free-form key/value attributes beyond the well-known entries
    #[serde(default)]
    pub attrs: ValueMap,
}

impl Metadata {
    /// Create metadata with just a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the icon URL
    pub fn with_icon_url(mut self, url: impl Into<String>) -> Self {
        self.icon_url = Some(url.into());
        self
    }

    /// Set a free-form attribute
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Convert to the flat wire map
    pub fn to_map(&self) -> ValueMap {
        let mut map = self.attrs.clone();
        if let Some(ref name) = self.name {
            map.insert(META_NAME.to_string(), Value::str(name));
        }
        if let Some(ref desc) = self.description {
            map.insert(META_DESCRIPTION.to_string(), Value::str(desc));
        }
        if let Some(ref url) = self.icon_url {
            map.insert(META_ICON_URL.to_string(), Value::str(url));
        }
        map
    }

    /// Build from the flat wire map
    pub fn from_map(map: &ValueMap) -> Self {
        let mut meta = Metadata::default();
        for (key, value) in map {
            match key.as_str() {
                META_NAME => meta.name = value.as_str().map(str::to_string),
                META_DESCRIPTION => meta.description = value.as_str().map(str::to_string),
                META_ICON_URL => meta.icon_url = value.as_str().map(str::to_string),
                _ => {
                    meta.attrs.insert(key.clone(), value.clone());
                }
            }
        }
        meta
    }
}

/// Declared subscriptions of a client: MType pattern to attribute map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscriptions(pub HashMap<String, ValueMap>);

impl Subscriptions {
    /// Create an empty subscription set
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to an MType with no attributes
    pub fn with_mtype(mut self, mtype: impl Into<String>) -> Self {
        self.0.insert(mtype.into(), ValueMap::new());
        self
    }

    /// Whether the given MType pattern is declared
    pub fn contains(&self, mtype: &str) -> bool {
        self.0.contains_key(mtype)
    }

    /// Number of declared patterns
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no patterns are declared
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the MType patterns accepted by the predicate
    pub fn retain_mtypes(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|mtype, _| keep(mtype));
    }
}

/// One row of a hub's observed client registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Opaque client ID, unique within one hub connection's namespace
    pub id: String,
    /// Declared metadata, if any has been observed
    pub metadata: Option<Metadata>,
    /// Declared subscriptions, if any have been observed
    pub subscriptions: Option<Subscriptions>,
    /// When this row was created
    pub registered_at: DateTime<Utc>,
}

impl ClientInfo {
    /// Create a bare row for a newly registered client
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: None,
            subscriptions: None,
            registered_at: Utc::now(),
        }
    }

    /// Display name: declared name if present, else the ID
    pub fn display_name(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|m| m.name.as_deref())
            .unwrap_or(&self.id)
    }
}
