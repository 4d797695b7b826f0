use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{EnginePath, EnginePathEnd, LinkRequest, LinkedEnd, LinkedPath, RelayEngine};
use crate::error::EngineError;

/// An in-process relay engine. Handshakes succeed immediately with sequential channel and connection ids unless a
/// failure has been scripted for the path; `start` records its paths and then relays "forever".
#[derive(Debug, Default)]
pub struct MemoryRelayEngine {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    link_failures: HashMap<String, String>,
    start_failure: Option<String>,
    link_calls: Vec<String>,
    sessions: Vec<Vec<String>>,
    paths: BTreeMap<String, EnginePath>,
    next_id: u64,
}

impl MemoryRelayEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every handshake for `path_id` fail with `reason`.
    pub fn fail_link(&self, path_id: &str, reason: &str) {
        self.state
            .lock()
            .link_failures
            .insert(path_id.to_owned(), reason.to_owned());
    }

    pub fn clear_link_failure(&self, path_id: &str) {
        self.state.lock().link_failures.remove(path_id);
    }

    /// Makes `start` return `reason` at once instead of relaying.
    pub fn fail_start(&self, reason: &str) {
        self.state.lock().start_failure = Some(reason.to_owned());
    }

    /// Path ids passed to `link`, in call order.
    pub fn link_calls(&self) -> Vec<String> {
        self.state.lock().link_calls.clone()
    }

    /// Path id sets passed to `start`, in call order.
    pub fn sessions(&self) -> Vec<Vec<String>> {
        self.state.lock().sessions.clone()
    }
}

#[async_trait]
impl RelayEngine for MemoryRelayEngine {
    async fn link(&self, request: &LinkRequest) -> Result<LinkedPath, EngineError> {
        let mut state = self.state.lock();
        let path = &request.path;
        state.link_calls.push(path.id.clone());
        if let Some(reason) = state.link_failures.get(&path.id) {
            return Err(EngineError::Rejected(reason.clone()));
        }

        let n = state.next_id;
        state.next_id += 2;
        let end = |n: u64, version: &Option<String>| LinkedEnd {
            channel_id: format!("channel-{n}"),
            connection_id: format!("connection-{n}"),
            version: version.clone(),
        };
        let linked = LinkedPath {
            src: end(n, &path.src.version),
            dst: end(n + 1, &path.dst.version),
        };

        state.paths.insert(
            path.id.clone(),
            EnginePath {
                id: path.id.clone(),
                is_linked: true,
                src: EnginePathEnd {
                    chain_id: path.src.chain_id.clone(),
                    port_id: path.src.port_id.clone(),
                    channel_id: linked.src.channel_id.clone(),
                },
                dst: EnginePathEnd {
                    chain_id: path.dst.chain_id.clone(),
                    port_id: path.dst.port_id.clone(),
                    channel_id: linked.dst.channel_id.clone(),
                },
            },
        );
        Ok(linked)
    }

    async fn start(&self, path_ids: &[String]) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock();
            state.sessions.push(path_ids.to_vec());
            if let Some(reason) = &state.start_failure {
                return Err(EngineError::Rejected(reason.clone()));
            }
        }
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn get_path(&self, id: &str) -> Result<EnginePath, EngineError> {
        self.state
            .lock()
            .paths
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::Rejected(format!("path {id} not found")))
    }

    async fn list_paths(&self) -> Result<Vec<EnginePath>, EngineError> {
        Ok(self.state.lock().paths.values().cloned().collect())
    }
}
