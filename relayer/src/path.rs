use std::sync::Arc;

use tracing::*;

use crate::{
    error::RegistryError,
    registry::{Config, Ordering, Path, PathEnd, TRANSFER_PORT, TRANSFER_VERSION},
    store::ConfigStore,
};

/// How the channel of a new path should be opened once it is linked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    pub source_port: String,
    pub source_version: String,
    pub target_port: String,
    pub target_version: String,
    pub ordering: Ordering,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        ChannelOptions {
            source_port: TRANSFER_PORT.to_owned(),
            source_version: TRANSFER_VERSION.to_owned(),
            target_port: TRANSFER_PORT.to_owned(),
            target_version: TRANSFER_VERSION.to_owned(),
            ordering: Ordering::Unordered,
        }
    }
}

/// The first of `src-dst`, `src-dst-2`, `src-dst-3`, ... which no path in `config` uses yet.
pub fn unique_path_id(config: &Config, src: &str, dst: &str) -> String {
    let base = format!("{src}-{dst}");
    if config.path_by_id(&base).is_none() {
        return base;
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{base}-{suffix}");
        if config.path_by_id(&candidate).is_none() {
            return candidate;
        }
        suffix += 1;
    }
}

pub struct PathAllocator {
    store: Arc<dyn ConfigStore>,
}

impl PathAllocator {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        PathAllocator { store }
    }

    /// Records a new, unlinked path from `src` to `dst` and returns its id. The chains do not have to be registered
    /// yet; they must be by the time the path is linked.
    pub fn allocate(
        &self,
        src: &str,
        dst: &str,
        options: &ChannelOptions,
    ) -> Result<String, RegistryError> {
        let mut allocated = String::new();
        self.store.modify(&mut |config| {
            let id = unique_path_id(config, src, dst);
            config.paths.push(Path {
                id: id.clone(),
                ordering: options.ordering,
                src: PathEnd {
                    chain_id: src.to_owned(),
                    port_id: options.source_port.clone(),
                    version: Some(options.source_version.clone()),
                    ..Default::default()
                },
                dst: PathEnd {
                    chain_id: dst.to_owned(),
                    port_id: options.target_port.clone(),
                    version: Some(options.target_version.clone()),
                    ..Default::default()
                },
            });
            allocated = id;
            Ok(())
        })?;

        info!(path_id = %allocated, src, dst, ordering = %options.ordering, "path created");
        Ok(allocated)
    }
}
