use std::time::Duration;

use async_trait::async_trait;
use jsonrpsee::{
    core::client::ClientT,
    http_client::{HttpClient, HttpClientBuilder},
    rpc_params,
};
use tracing::*;

use super::{EnginePath, LinkRequest, LinkedPath, RelayEngine};
use crate::{cfg::EngineSettings, error::EngineError};

// `start` only returns when relaying stops, so its request must outlive any sensible timeout.
const SESSION_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// A relay engine reached over JSON-RPC.
#[derive(Clone)]
pub struct RpcRelayEngine {
    url: String,
    client: HttpClient,
    session: HttpClient,
}

impl RpcRelayEngine {
    pub fn new(settings: &EngineSettings) -> Result<Self, EngineError> {
        let client = HttpClientBuilder::default()
            .request_timeout(settings.request_timeout)
            .build(&settings.url)?;
        let session = HttpClientBuilder::default()
            .request_timeout(SESSION_TIMEOUT)
            .build(&settings.url)?;
        Ok(RpcRelayEngine {
            url: settings.url.clone(),
            client,
            session,
        })
    }
}

#[async_trait]
impl RelayEngine for RpcRelayEngine {
    async fn link(&self, request: &LinkRequest) -> Result<LinkedPath, EngineError> {
        debug!(url = %self.url, path_id = %request.path.id, "requesting link");
        let linked = self
            .client
            .request(
                "link",
                rpc_params![&request.src, &request.dst, &request.path],
            )
            .await?;
        Ok(linked)
    }

    async fn start(&self, path_ids: &[String]) -> Result<(), EngineError> {
        debug!(url = %self.url, ?path_ids, "starting relay session");
        let _: serde_json::Value = self.session.request("start", rpc_params![path_ids]).await?;
        Ok(())
    }

    async fn get_path(&self, id: &str) -> Result<EnginePath, EngineError> {
        Ok(self.client.request("getPath", rpc_params![id]).await?)
    }

    async fn list_paths(&self) -> Result<Vec<EnginePath>, EngineError> {
        Ok(self.client.request("listPaths", rpc_params![]).await?)
    }
}
