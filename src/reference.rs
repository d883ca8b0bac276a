//! Reference metadata attached to machine and image specifications.
//!
//! The provisioning framework persists a small key/value map per machine and
//! per image. Older state written by Ruby tooling may spell keys as symbols
//! (`:image_id`); those are folded onto the plain spelling when the map is
//! built so that every read site looks up a single canonical key. When both
//! spellings are present the plain key wins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Key holding the provider server identifier of a machine.
pub const SERVER_ID_KEY: &str = "server_id";
/// Key holding the provider image identifier of an image.
pub const IMAGE_ID_KEY: &str = "image_id";
/// Key selecting the private address for remote management.
pub const USE_PRIVATE_IP_KEY: &str = "use_private_ip_for_ssh";
/// Key overriding the WinRM listener port.
pub const WINRM_PORT_KEY: &str = "winrm_port";
/// Key overriding the WinRM user name.
pub const WINRM_USERNAME_KEY: &str = "winrm.username";
/// Key recording the driver URL that allocated an image.
pub const DRIVER_URL_KEY: &str = "driver_url";
/// Key recording the driver version that allocated an image.
pub const DRIVER_VERSION_KEY: &str = "driver_version";
/// Key recording the account that allocated an image.
pub const CREATOR_KEY: &str = "creator";
/// Key recording when an image was allocated (Unix seconds).
pub const CREATED_AT_KEY: &str = "created_at";

const SYMBOL_PREFIX: char = ':';

/// Errors raised when a reference value has the wrong shape.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ReferenceError {
    /// A key holds a value of an unexpected type.
    #[error("reference key {key} must be {expected}")]
    InvalidValue {
        /// Offending key.
        key: String,
        /// Human readable description of the accepted shape.
        expected: String,
    },
}

/// Caller-owned key/value metadata with canonical keys.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Value>", into = "BTreeMap<String, Value>")]
pub struct ReferenceMap {
    entries: BTreeMap<String, Value>,
}

fn canonical_key(key: &str) -> &str {
    key.strip_prefix(SYMBOL_PREFIX).unwrap_or(key)
}

impl From<BTreeMap<String, Value>> for ReferenceMap {
    fn from(raw: BTreeMap<String, Value>) -> Self {
        let mut entries = BTreeMap::new();
        let (legacy, plain): (Vec<_>, Vec<_>) = raw
            .into_iter()
            .partition(|(key, _)| key.starts_with(SYMBOL_PREFIX));
        for (key, value) in plain {
            entries.insert(key, value);
        }
        for (key, value) in legacy {
            entries
                .entry(canonical_key(&key).to_owned())
                .or_insert(value);
        }
        Self { entries }
    }
}

impl From<ReferenceMap> for BTreeMap<String, Value> {
    fn from(map: ReferenceMap) -> Self {
        map.entries
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for ReferenceMap {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self::from(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect::<BTreeMap<_, _>>(),
        )
    }
}

impl ReferenceMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when no keys are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a key, accepting either spelling.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(canonical_key(key))
    }

    /// Stores a value under the canonical spelling of `key`.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.entries
            .insert(canonical_key(key).to_owned(), value.into());
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(canonical_key(key))
    }

    /// Iterates over canonical keys and their values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Reads a non-empty string value.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::InvalidValue`] when the key holds a
    /// non-string value.
    pub fn get_str(&self, key: &str) -> Result<Option<&str>, ReferenceError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.trim()).filter(|text| !text.is_empty())),
            Some(_) => Err(invalid(key, "a string")),
        }
    }

    /// Reads a flag; `"true"`/`"false"` strings are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::InvalidValue`] for any other shape.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ReferenceError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(flag)) => Ok(Some(*flag)),
            Some(Value::String(text)) => match text.trim() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(invalid(key, "a boolean")),
            },
            Some(_) => Err(invalid(key, "a boolean")),
        }
    }

    /// Reads a TCP port; numeric strings are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::InvalidValue`] when the value is not a port
    /// number.
    pub fn get_port(&self, key: &str) -> Result<Option<u16>, ReferenceError> {
        let port = match self.get(key) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Number(number)) => number.as_u64().and_then(|n| u16::try_from(n).ok()),
            Some(Value::String(text)) => text.trim().parse::<u16>().ok(),
            Some(_) => None,
        };
        port.filter(|port| *port != 0)
            .map(Some)
            .ok_or_else(|| invalid(key, "a port number between 1 and 65535"))
    }

    /// Provider server identifier recorded for a machine.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::InvalidValue`] for a non-string value.
    pub fn server_id(&self) -> Result<Option<&str>, ReferenceError> {
        self.get_str(SERVER_ID_KEY)
    }

    /// Provider image identifier recorded for an image.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::InvalidValue`] for a non-string value.
    pub fn image_id(&self) -> Result<Option<&str>, ReferenceError> {
        self.get_str(IMAGE_ID_KEY)
    }
}

fn invalid(key: &str, expected: &str) -> ReferenceError {
    ReferenceError::InvalidValue {
        key: canonical_key(key).to_owned(),
        expected: expected.to_owned(),
    }
}

/// Provenance recorded when an image is allocated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageReference {
    /// URL of the driver that created the image.
    pub driver_url: String,
    /// Version of the driver that created the image.
    pub driver_version: String,
    /// Provider image identifier.
    pub image_id: String,
    /// Account that requested the image, when known.
    pub creator: Option<String>,
    /// Allocation time in Unix seconds.
    pub created_at: i64,
}

impl ImageReference {
    /// Renders the reference as persisted metadata.
    #[must_use]
    pub fn to_map(&self) -> ReferenceMap {
        let mut map = ReferenceMap::new();
        map.insert(DRIVER_URL_KEY, self.driver_url.clone());
        map.insert(DRIVER_VERSION_KEY, self.driver_version.clone());
        map.insert(IMAGE_ID_KEY, self.image_id.clone());
        map.insert(CREATOR_KEY, self.creator.clone());
        map.insert(CREATED_AT_KEY, self.created_at);
        map
    }
}

/// Machine description owned by the provisioning framework.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MachineSpec {
    /// Machine name.
    pub name: String,
    /// Persisted reference metadata.
    pub reference: ReferenceMap,
}

impl MachineSpec {
    /// Creates a machine spec.
    #[must_use]
    pub fn new(name: impl Into<String>, reference: ReferenceMap) -> Self {
        Self {
            name: name.into(),
            reference,
        }
    }
}

/// Image description owned by the provisioning framework.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Image name.
    pub name: String,
    /// Persisted reference metadata; empty until the image is allocated.
    #[serde(default)]
    pub reference: ReferenceMap,
}

impl ImageSpec {
    /// Creates an image spec with no reference yet.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reference: ReferenceMap::new(),
        }
    }
}
