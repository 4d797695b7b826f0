use jsonrpsee::core::ClientError;

/// Failures of registry operations. Everything here aborts the operation that raised it; per-path handshake
/// failures are reported through [crate::relayer::LinkReport] instead.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error(
        "your relayer setup at {location} is outdated (version {found:?}, expected \"2\"). run 'rm {location}' and configure the relayer again"
    )]
    Schema { location: String, found: String },
    #[error(
        "chain {chain_id} is already registered with rpc endpoint {existing}, refusing to register it again at {requested}"
    )]
    EndpointConflict {
        chain_id: String,
        existing: String,
        requested: String,
    },
    #[error("path {0:?} cannot be found")]
    UnknownPath(String),
    #[error("chain {chain_id:?} used by path {path_id:?} is not registered")]
    UnknownChain { path_id: String, chain_id: String },
    #[error("path {0:?} is not linked yet")]
    PathNotLinked(String),
    #[error("invalid rpc address {address:?}: {reason}")]
    InvalidRpcAddress { address: String, reason: String },
    #[error("cannot query chain status at {rpc_address}: {reason}")]
    ChainQuery { rpc_address: String, reason: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("i/o error on {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed relayer registry {location}: {source}")]
    Encoding {
        location: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl RegistryError {
    pub(crate) fn io(location: impl Into<String>, source: std::io::Error) -> Self {
        RegistryError::Io {
            location: location.into(),
            source,
        }
    }
}

/// An error from the relay engine.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// The engine processed the request and refused or failed it, eg. a handshake that did not complete.
    #[error("{0}")]
    Rejected(String),
    /// The engine did not answer a single request in time. It may still be working on it.
    #[error("relay engine did not answer in time")]
    TimedOut,
    /// The engine could not be reached.
    #[error("relay engine unavailable: {0}")]
    Transport(String),
}

impl EngineError {
    /// Whether the failure concerns only the request that raised it, rather than the engine as a whole.
    pub fn is_per_request(&self) -> bool {
        matches!(self, EngineError::Rejected(_) | EngineError::TimedOut)
    }
}

impl From<ClientError> for EngineError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Call(err) => EngineError::Rejected(err.message().to_owned()),
            ClientError::RequestTimeout => EngineError::TimedOut,
            other => EngineError::Transport(other.to_string()),
        }
    }
}
