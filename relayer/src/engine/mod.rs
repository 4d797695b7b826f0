//! The relay engine: the out-of-process component which runs IBC handshakes and relays packets.
//!
//! The relayer only decides what to link and records the outcome. [RelayEngine] is the contract it relies on.
//! [rpc::RpcRelayEngine] talks to a real engine over JSON-RPC and [memory::MemoryRelayEngine] stands in for one.

pub mod memory;
pub mod rpc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::EngineError,
    registry::{Chain, Path},
};

/// Everything the engine needs to link one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRequest {
    pub src: Chain,
    pub dst: Chain,
    pub path: Path,
}

/// Identifiers established by a handshake, per end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedEnd {
    #[serde(rename = "channelID")]
    pub channel_id: String,
    #[serde(rename = "connectionID")]
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedPath {
    pub src: LinkedEnd,
    pub dst: LinkedEnd,
}

/// A path as the engine sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnginePath {
    pub id: String,
    #[serde(rename = "isLinked")]
    pub is_linked: bool,
    pub src: EnginePathEnd,
    pub dst: EnginePathEnd,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnginePathEnd {
    #[serde(rename = "chainID")]
    pub chain_id: String,
    #[serde(rename = "portID")]
    pub port_id: String,
    #[serde(rename = "channelID", default)]
    pub channel_id: String,
}

#[async_trait]
pub trait RelayEngine: Send + Sync {
    /// Runs the connection and channel handshakes for one path.
    async fn link(&self, request: &LinkRequest) -> Result<LinkedPath, EngineError>;

    /// Relays packets on `path_ids` until the returned future is dropped or the engine gives up.
    async fn start(&self, path_ids: &[String]) -> Result<(), EngineError>;

    async fn get_path(&self, id: &str) -> Result<EnginePath, EngineError>;

    async fn list_paths(&self) -> Result<Vec<EnginePath>, EngineError>;
}
