use std::{sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::*;
use url::Url;

use crate::{error::RegistryError, registry::Chain, store::ConfigStore};

pub const DEFAULT_ADDRESS_PREFIX: &str = "cosmos";

/// Normalises a chain RPC address: a missing scheme becomes `http://`, the scheme's default port is made explicit
/// and any trailing slash is dropped. `localhost:26657/` becomes `http://localhost:26657`.
pub fn normalize_rpc_address(address: &str) -> Result<String, RegistryError> {
    let invalid = |reason: String| RegistryError::InvalidRpcAddress {
        address: address.to_owned(),
        reason,
    };

    let trimmed = address.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_owned()
    } else {
        format!("http://{trimmed}")
    };
    let url = Url::parse(&with_scheme).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    let host = url
        .host_str()
        .ok_or_else(|| invalid("no host".to_owned()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid("no port".to_owned()))?;

    let mut normalized = format!("{}://{host}:{port}{}", url.scheme(), url.path());
    if let Some(query) = url.query() {
        normalized.push('?');
        normalized.push_str(query);
    }
    Ok(normalized.trim_end_matches('/').to_owned())
}

/// Asks a live chain who it is.
#[async_trait]
pub trait ChainStatus: Send + Sync {
    /// Returns the network identity (chain id) reported by the node at `rpc_address`.
    async fn network_id(&self, rpc_address: &str) -> Result<String>;
}

/// [ChainStatus] over a Tendermint node's JSON-RPC `status` method.
#[derive(Debug, Clone)]
pub struct TendermintStatus {
    client: reqwest::Client,
}

#[derive(Deserialize, Debug)]
struct StatusResponse {
    result: Option<StatusResult>,
    error: Option<Value>,
}

#[derive(Deserialize, Debug)]
struct StatusResult {
    node_info: NodeInfo,
}

#[derive(Deserialize, Debug)]
struct NodeInfo {
    network: String,
}

impl TendermintStatus {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(TendermintStatus {
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl ChainStatus for TendermintStatus {
    async fn network_id(&self, rpc_address: &str) -> Result<String> {
        let res = self
            .client
            .post(rpc_address)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": "status",
                "params": {},
                "id": 1
            }))
            .send()
            .await?
            .error_for_status()?;
        let status: StatusResponse = res.json().await?;
        match status {
            StatusResponse {
                result: Some(result),
                ..
            } if !result.node_info.network.is_empty() => Ok(result.node_info.network),
            StatusResponse {
                error: Some(error), ..
            } => Err(anyhow!("status call failed: {error}")),
            _ => Err(anyhow!("status response carries no network id")),
        }
    }
}

/// Optional per-chain settings. Fields left as `None` keep their stored value when a chain is registered again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainOptions {
    /// Bech32 prefix of account addresses on this chain. New chains default to [DEFAULT_ADDRESS_PREFIX].
    pub address_prefix: Option<String>,
    /// Gas price for relay transactions, eg. `0.025stake`.
    pub gas_price: Option<String>,
    /// Gas limit for relay transactions.
    pub gas_limit: Option<u64>,
}

/// Records chains in the registry under the identity they report themselves.
pub struct ChainRegistrar {
    store: Arc<dyn ConfigStore>,
    status: Arc<dyn ChainStatus>,
}

impl ChainRegistrar {
    pub fn new(store: Arc<dyn ConfigStore>, status: Arc<dyn ChainStatus>) -> Self {
        ChainRegistrar { store, status }
    }

    /// Registers the chain served at `rpc_address`, or updates its record if it is already known.
    ///
    /// Registering a chain which is known under a different RPC address fails with
    /// [RegistryError::EndpointConflict] and leaves the registry unchanged.
    pub async fn register(
        &self,
        account: &str,
        rpc_address: &str,
        options: &ChainOptions,
    ) -> Result<Chain, RegistryError> {
        let rpc_address = normalize_rpc_address(rpc_address)?;
        let id = self.status.network_id(&rpc_address).await.map_err(|e| {
            RegistryError::ChainQuery {
                rpc_address: rpc_address.clone(),
                reason: format!("{e:#}"),
            }
        })?;
        debug!(chain_id = %id, %rpc_address, "queried chain identity");

        let mut registered = None;
        self.store.modify(&mut |config| {
            let chain = match config.chain_by_id_mut(&id) {
                Some(existing) => {
                    if existing.rpc_address != rpc_address {
                        return Err(RegistryError::EndpointConflict {
                            chain_id: id.clone(),
                            existing: existing.rpc_address.clone(),
                            requested: rpc_address.clone(),
                        });
                    }
                    merge(existing, account, options);
                    existing.clone()
                }
                None => {
                    let chain = new_chain(&id, account, &rpc_address, options);
                    config.chains.push(chain.clone());
                    chain
                }
            };
            registered = Some(chain);
            Ok(())
        })?;

        let chain = registered.ok_or_else(|| RegistryError::ChainQuery {
            rpc_address: rpc_address.clone(),
            reason: "registration produced no record".to_owned(),
        })?;
        info!(chain_id = %chain.id, rpc_address = %chain.rpc_address, "chain registered");
        Ok(chain)
    }
}

fn new_chain(id: &str, account: &str, rpc_address: &str, options: &ChainOptions) -> Chain {
    Chain {
        id: id.to_owned(),
        account: account.to_owned(),
        address_prefix: options
            .address_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_ADDRESS_PREFIX.to_owned()),
        rpc_address: rpc_address.to_owned(),
        gas_price: options.gas_price.clone(),
        gas_limit: options.gas_limit,
    }
}

fn merge(chain: &mut Chain, account: &str, options: &ChainOptions) {
    if !account.is_empty() {
        chain.account = account.to_owned();
    }
    if let Some(prefix) = &options.address_prefix {
        chain.address_prefix = prefix.clone();
    }
    if let Some(price) = &options.gas_price {
        chain.gas_price = Some(price.clone());
    }
    if let Some(limit) = options.gas_limit {
        chain.gas_limit = Some(limit);
    }
}
