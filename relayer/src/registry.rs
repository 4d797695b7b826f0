//! The persisted relayer registry: the chains we know about and the paths between them.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// The only registry layout this version of the relayer understands.
pub const SUPPORTED_VERSION: &str = "2";

pub const TRANSFER_PORT: &str = "transfer";
pub const TRANSFER_VERSION: &str = "ics20-1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, deserialize_with = "deserialize_version")]
    pub version: String,
    #[serde(default)]
    pub chains: Vec<Chain>,
    #[serde(default)]
    pub paths: Vec<Path>,
}

impl Config {
    pub fn path_by_id(&self, id: &str) -> Option<&Path> {
        self.paths.iter().find(|p| p.id == id)
    }

    pub fn path_by_id_mut(&mut self, id: &str) -> Option<&mut Path> {
        self.paths.iter_mut().find(|p| p.id == id)
    }

    pub fn chain_by_id(&self, id: &str) -> Option<&Chain> {
        self.chains.iter().find(|c| c.id == id)
    }

    pub fn chain_by_id_mut(&mut self, id: &str) -> Option<&mut Chain> {
        self.chains.iter_mut().find(|c| c.id == id)
    }

    /// Identifiers of all linked paths, in registry order.
    pub fn linked_path_ids(&self) -> Vec<String> {
        self.paths
            .iter()
            .filter(|p| p.is_linked())
            .map(|p| p.id.clone())
            .collect()
    }
}

// Older hand-edited registries sometimes carry `version: 1` rather than `version: "1"`. Accept both, so that they
// fail the version check with a useful message rather than a decoding error.
fn deserialize_version<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Version {
        Text(String),
        Number(u64),
    }

    Ok(match Option::<Version>::deserialize(deserializer)? {
        Some(Version::Text(v)) => v,
        Some(Version::Number(v)) => v.to_string(),
        None => String::new(),
    })
}

/// A chain known to the relayer. `id` is the network identity reported by the chain's own node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub id: String,
    pub account: String,
    #[serde(default)]
    pub address_prefix: String,
    pub rpc_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ordering {
    #[default]
    #[serde(rename = "ORDER_UNORDERED", alias = "UNORDERED")]
    Unordered,
    #[serde(rename = "ORDER_ORDERED", alias = "ORDERED")]
    Ordered,
}

impl fmt::Display for Ordering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Ordering::Unordered => "unordered",
            Ordering::Ordered => "ordered",
        })
    }
}

/// A relay route from `src` to `dst`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub id: String,
    #[serde(default)]
    pub ordering: Ordering,
    pub src: PathEnd,
    pub dst: PathEnd,
}

impl Path {
    /// A path is linked once the handshake has given its source end a channel.
    pub fn is_linked(&self) -> bool {
        !self.src.channel_id.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEnd {
    pub chain_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
    pub port_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Last height at which the relay engine processed packets on this end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_height: Option<u64>,
    /// Last height at which the relay engine processed acknowledgements on this end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_height: Option<u64>,
}
