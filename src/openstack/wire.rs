//! Nova request and response bodies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::compute::{ImageSnapshot, ServerSnapshot};

#[derive(Debug, Deserialize)]
pub(super) struct ServerEnvelope {
    pub(super) server: ServerBody,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerBody {
    pub(super) id: String,
    #[serde(default)]
    pub(super) name: String,
    #[serde(default)]
    pub(super) status: String,
    #[serde(default)]
    pub(super) addresses: BTreeMap<String, Vec<AddressBody>>,
    #[serde(default, rename = "accessIPv4")]
    pub(super) access_ipv4: Option<String>,
    #[serde(default, rename = "accessIPv6")]
    pub(super) access_ipv6: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct AddressBody {
    pub(super) addr: String,
    #[serde(default)]
    pub(super) version: Option<u8>,
    #[serde(default, rename = "OS-EXT-IPS:type")]
    pub(super) kind: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum AddressKind {
    Fixed,
    Floating,
}

impl AddressBody {
    /// Classifies the address by its extension type, falling back to the
    /// network name when the extension is not reported.
    fn kind(&self, network: &str) -> AddressKind {
        match self.kind.as_deref() {
            Some("floating") => AddressKind::Floating,
            Some(_) => AddressKind::Fixed,
            None if network.eq_ignore_ascii_case("public") => AddressKind::Floating,
            None => AddressKind::Fixed,
        }
    }

    fn is_ipv4(&self) -> bool {
        self.version.is_none_or(|version| version == 4)
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|text| text.trim())
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

impl ServerBody {
    fn first_address(&self, wanted: AddressKind) -> Option<String> {
        let matching: Vec<&AddressBody> = self
            .addresses
            .iter()
            .flat_map(|(network, entries)| {
                entries
                    .iter()
                    .filter(move |entry| entry.kind(network) == wanted)
            })
            .collect();
        matching
            .iter()
            .find(|entry| entry.is_ipv4())
            .or_else(|| matching.first())
            .map(|entry| entry.addr.clone())
    }

    pub(super) fn into_snapshot(self) -> ServerSnapshot {
        let private_ip = self.first_address(AddressKind::Fixed);
        let public_ip = self
            .first_address(AddressKind::Floating)
            .or_else(|| non_empty(self.access_ipv4.as_ref()))
            .or_else(|| non_empty(self.access_ipv6.as_ref()));
        ServerSnapshot {
            id: self.id,
            name: self.name,
            status: self.status,
            private_ip,
            public_ip,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct PasswordBody {
    #[serde(default)]
    pub(super) password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ImageEnvelope {
    pub(super) image: ImageBody,
}

#[derive(Debug, Deserialize)]
pub(super) struct ImageBody {
    pub(super) id: String,
    #[serde(default)]
    pub(super) name: String,
    #[serde(default)]
    pub(super) status: String,
}

impl From<ImageBody> for ImageSnapshot {
    fn from(body: ImageBody) -> Self {
        Self {
            id: body.id,
            name: body.name,
            status: body.status,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct CreateImageAction<'a> {
    #[serde(rename = "createImage")]
    pub(super) create_image: CreateImageBody<'a>,
}

#[derive(Debug, Serialize)]
pub(super) struct CreateImageBody<'a> {
    pub(super) name: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub(super) metadata: BTreeMap<&'static str, &'a str>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct CreateImageResponse {
    #[serde(default)]
    pub(super) image_id: Option<String>,
}

/// Extracts the image id from a `Location: .../images/<id>` header.
pub(super) fn image_id_from_location(location: &str) -> Option<String> {
    let mut segments = location.trim().trim_end_matches('/').rsplit('/');
    let id = segments.next()?.trim();
    if segments.next() != Some("images") || id.is_empty() {
        return None;
    }
    Some(id.to_owned())
}

/// Pulls a human readable message out of a Nova fault body such as
/// `{"itemNotFound": {"message": "...", "code": 404}}`.
pub(super) fn fault_message(body: &[u8]) -> String {
    let parsed = serde_json::from_slice::<BTreeMap<String, serde_json::Value>>(body).ok();
    parsed
        .as_ref()
        .and_then(|faults| faults.values().next())
        .and_then(|fault| fault.get("message"))
        .and_then(serde_json::Value::as_str)
        .map_or_else(
            || String::from_utf8_lossy(body).trim().to_owned(),
            str::to_owned,
        )
}
