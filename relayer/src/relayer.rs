//! Linking paths and relaying over them.

use std::{collections::HashSet, future::Future, io, sync::Arc};

use serde::Serialize;
use tracing::*;

use crate::{
    engine::{EnginePath, LinkRequest, LinkedPath, RelayEngine},
    error::RegistryError,
    registry::{Chain, Config, Path},
    store::ConfigStore,
};

/// Outcome of [Relayer::link]. Each list is in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkReport {
    /// Paths linked by this call.
    pub linked: Vec<String>,
    /// Paths which were linked before this call and were left alone.
    pub already_linked: Vec<String>,
    /// Paths whose handshake failed. They remain unlinked and will be retried by the next call.
    pub failed: Vec<LinkFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkFailure {
    pub path_id: String,
    pub reason: String,
}

impl LinkReport {
    /// The paths which can be relayed over: newly linked first, then already linked.
    pub fn connectable(&self) -> Vec<String> {
        self.linked
            .iter()
            .chain(&self.already_linked)
            .cloned()
            .collect()
    }
}

enum Step {
    AlreadyLinked(String),
    Handshake(Box<LinkRequest>),
}

pub struct Relayer {
    store: Arc<dyn ConfigStore>,
    engine: Arc<dyn RelayEngine>,
}

impl Relayer {
    pub fn new(store: Arc<dyn ConfigStore>, engine: Arc<dyn RelayEngine>) -> Self {
        Relayer { store, engine }
    }

    /// Links the given paths, or every known path if `path_ids` is empty. Calling this repeatedly is harmless:
    /// linked paths are never handshaked again.
    ///
    /// Unknown paths, unregistered chains and an unreachable engine abort the whole call; paths linked before that
    /// stay recorded. A handshake which the engine rejects, times out, or reports without a source channel only fails
    /// its own path.
    pub async fn link(&self, path_ids: &[String]) -> Result<LinkReport, RegistryError> {
        let config = self.store.load()?;
        let paths = resolve_paths(&config, path_ids)?;

        // Validate the whole batch before the first handshake.
        let steps = paths
            .into_iter()
            .map(|path| -> Result<Step, RegistryError> {
                if path.is_linked() {
                    return Ok(Step::AlreadyLinked(path.id));
                }
                let src = chain_for(&config, &path, &path.src.chain_id)?;
                let dst = chain_for(&config, &path, &path.dst.chain_id)?;
                Ok(Step::Handshake(Box::new(LinkRequest { src, dst, path })))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut report = LinkReport::default();
        for step in steps {
            let request = match step {
                Step::AlreadyLinked(id) => {
                    debug!(path_id = %id, "path already linked");
                    report.already_linked.push(id);
                    continue;
                }
                Step::Handshake(request) => request,
            };

            let id = request.path.id.clone();
            info!(path_id = %id, src = %request.src.id, dst = %request.dst.id, "linking path");
            let linked = match self.engine.link(&request).await {
                Ok(linked) if linked.src.channel_id.is_empty() => {
                    warn!(path_id = %id, "engine reported a link without a source channel");
                    report.failed.push(LinkFailure {
                        path_id: id,
                        reason: "engine returned no source channel".to_owned(),
                    });
                    continue;
                }
                Ok(linked) => linked,
                Err(e) if e.is_per_request() => {
                    let reason = e.to_string();
                    warn!(path_id = %id, %reason, "failed to link path");
                    report.failed.push(LinkFailure {
                        path_id: id,
                        reason,
                    });
                    continue;
                }
                Err(e) => {
                    if !report.linked.is_empty() {
                        warn!(linked = ?report.linked, "relay engine lost after linking some paths");
                    }
                    return Err(e.into());
                }
            };

            if self.record_link(&id, &linked)? {
                info!(path_id = %id, src_channel = %linked.src.channel_id, dst_channel = %linked.dst.channel_id, "path linked");
                report.linked.push(id);
            } else {
                report.already_linked.push(id);
            }
        }
        Ok(report)
    }

    /// Stores the identifiers of a new link. Returns `false`, leaving the registry alone, if the path was linked by
    /// someone else while the handshake ran.
    fn record_link(&self, id: &str, linked: &LinkedPath) -> Result<bool, RegistryError> {
        let mut recorded = false;
        self.store.modify(&mut |config| {
            let path = config
                .path_by_id_mut(id)
                .ok_or_else(|| RegistryError::UnknownPath(id.to_owned()))?;
            if path.is_linked() {
                warn!(path_id = %id, channel_id = %path.src.channel_id, unused_channel_id = %linked.src.channel_id, "path was linked concurrently, keeping the stored channel");
                return Ok(());
            }
            for (end, linked) in [(&mut path.src, &linked.src), (&mut path.dst, &linked.dst)] {
                end.channel_id = linked.channel_id.clone();
                end.connection_id = linked.connection_id.clone();
                if linked.version.is_some() {
                    end.version = linked.version.clone();
                }
                // A new channel has no relay history.
                end.packet_height = None;
                end.ack_height = None;
            }
            recorded = true;
            Ok(())
        })?;
        Ok(recorded)
    }

    /// Relays packets over the given linked paths, or every linked path if `path_ids` is empty, until `shutdown`
    /// completes or the engine stops. Dropping the engine's session on shutdown ends it; the engine keeps its own
    /// relay heights.
    pub async fn start(
        &self,
        path_ids: &[String],
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), RegistryError> {
        let config = self.store.load()?;
        let ids = if path_ids.is_empty() {
            config.linked_path_ids()
        } else {
            let mut ids = Vec::with_capacity(path_ids.len());
            for path in resolve_paths(&config, path_ids)? {
                if !path.is_linked() {
                    return Err(RegistryError::PathNotLinked(path.id));
                }
                ids.push(path.id);
            }
            ids
        };
        if ids.is_empty() {
            info!("no linked paths to relay");
            return Ok(());
        }

        info!(paths = ?ids, "relaying packets");
        tokio::select! {
            result = self.engine.start(&ids) => {
                result?;
                info!("relay engine finished");
                Ok(())
            }
            () = shutdown => {
                info!("relaying stopped");
                Ok(())
            }
        }
    }

    /// Links the given paths and then relays over everything that ended up linked, until `shutdown` completes. Paths
    /// that failed to link are reported but do not stop the others from being relayed.
    pub async fn connect(
        &self,
        path_ids: &[String],
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<LinkReport, RegistryError> {
        let report = self.link(path_ids).await?;
        let connectable = report.connectable();
        if connectable.is_empty() {
            info!("no paths to connect");
            return Ok(report);
        }
        self.start(&connectable, shutdown).await?;
        Ok(report)
    }

    /// The engine's view of a path.
    pub async fn get_path(&self, id: &str) -> Result<EnginePath, RegistryError> {
        Ok(self.engine.get_path(id).await?)
    }

    pub async fn list_paths(&self) -> Result<Vec<EnginePath>, RegistryError> {
        Ok(self.engine.list_paths().await?)
    }
}

/// Completes once `signal` fires. If the signal cannot be listened for, this never completes, so relaying continues
/// until the engine stops rather than ending at once.
pub async fn shutdown_on(signal: impl Future<Output = io::Result<()>>) {
    if let Err(e) = signal.await {
        error!(%e, "cannot listen for the shutdown signal, relaying until the engine stops");
        std::future::pending::<()>().await;
    }
}

/// Looks up `path_ids` (all paths if empty), failing on the first unknown id. Repeated ids are only returned once.
fn resolve_paths(config: &Config, path_ids: &[String]) -> Result<Vec<Path>, RegistryError> {
    if path_ids.is_empty() {
        return Ok(config.paths.clone());
    }
    let mut seen = HashSet::new();
    path_ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .map(|id| {
            config
                .path_by_id(id)
                .cloned()
                .ok_or_else(|| RegistryError::UnknownPath(id.clone()))
        })
        .collect()
}

fn chain_for(
    config: &Config,
    path: &Path,
    chain_id: &str,
) -> Result<Chain, RegistryError> {
    config
        .chain_by_id(chain_id)
        .cloned()
        .ok_or_else(|| RegistryError::UnknownChain {
            path_id: path.id.clone(),
            chain_id: chain_id.to_owned(),
        })
}
