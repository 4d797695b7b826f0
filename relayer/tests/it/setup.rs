use std::{collections::HashMap, fs, sync::Arc};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use relayerlib::{
    chain::{ChainOptions, ChainRegistrar, ChainStatus},
    engine::memory::MemoryRelayEngine,
    error::RegistryError,
    path::{ChannelOptions, PathAllocator},
    registry::Ordering,
    relayer::Relayer,
    store::{ConfigStore, FileStore},
};

use crate::ids;

struct Network(HashMap<&'static str, &'static str>);

#[async_trait]
impl ChainStatus for Network {
    async fn network_id(&self, rpc_address: &str) -> Result<String> {
        self.0
            .get(rpc_address)
            .map(|id| id.to_string())
            .ok_or_else(|| anyhow!("no route to {rpc_address}"))
    }
}

fn network() -> Arc<Network> {
    Arc::new(Network(HashMap::from([
        ("http://localhost:26657", "mars"),
        ("http://localhost:26659", "venus"),
    ])))
}

#[tokio::test]
async fn configure_then_link_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("relayer").join("config.yml");
    let store = Arc::new(FileStore::new(&file));

    let registrar = ChainRegistrar::new(store.clone(), network());
    let mars = registrar
        .register("alice", "localhost:26657", &ChainOptions::default())
        .await
        .unwrap();
    let venus = registrar
        .register(
            "bob",
            "http://localhost:26659/",
            &ChainOptions {
                address_prefix: Some("venus".to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(mars.address_prefix, "cosmos");
    assert_eq!(venus.rpc_address, "http://localhost:26659");

    let allocator = PathAllocator::new(store.clone());
    let first = allocator
        .allocate(&mars.id, &venus.id, &ChannelOptions::default())
        .unwrap();
    let second = allocator
        .allocate(
            &mars.id,
            &venus.id,
            &ChannelOptions {
                ordering: Ordering::Ordered,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(first, "mars-venus");
    assert_eq!(second, "mars-venus-2");

    let engine = Arc::new(MemoryRelayEngine::new());
    let relayer = Relayer::new(store.clone(), engine.clone());
    let report = relayer.link(&ids(&["mars-venus-2"])).await.unwrap();
    assert_eq!(report.linked, ids(&["mars-venus-2"]));

    // A fresh process sees everything the first one recorded.
    let reopened = FileStore::new(&file).load().unwrap();
    assert_eq!(reopened.version, "2");
    assert_eq!(reopened.chains.len(), 2);
    assert!(!reopened.path_by_id("mars-venus").unwrap().is_linked());
    let linked = reopened.path_by_id("mars-venus-2").unwrap();
    assert!(linked.is_linked());
    assert_eq!(linked.ordering, Ordering::Ordered);
    assert_eq!(linked.src.channel_id, "channel-0");
    assert_eq!(reopened.linked_path_ids(), ids(&["mars-venus-2"]));

    let contents = fs::read_to_string(&file).unwrap();
    assert!(contents.contains("ORDER_ORDERED"), "{contents}");
}

#[tokio::test]
async fn outdated_registry_is_never_touched() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("config.yml");
    let outdated = "version: \"1\"\nchains:\n- id: mars\n  account: alice\n  rpc_address: http://localhost:26657\npaths: []\n";
    fs::write(&file, outdated).unwrap();
    let store = Arc::new(FileStore::new(&file));

    let engine = Arc::new(MemoryRelayEngine::new());
    let relayer = Relayer::new(store.clone(), engine.clone());
    let err = relayer.link(&[]).await.unwrap_err();
    assert!(matches!(err, RegistryError::Schema { ref found, .. } if found == "1"));

    let err = ChainRegistrar::new(store.clone(), network())
        .register("alice", "localhost:26657", &ChainOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Schema { .. }));

    let err = PathAllocator::new(store)
        .allocate("mars", "venus", &ChannelOptions::default())
        .unwrap_err();
    assert!(matches!(err, RegistryError::Schema { .. }));

    assert!(engine.link_calls().is_empty());
    assert_eq!(fs::read_to_string(&file).unwrap(), outdated);
}

#[tokio::test]
async fn conflicting_endpoint_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path().join("config.yml")));
    let status = Arc::new(Network(HashMap::from([
        ("http://localhost:26657", "mars"),
        ("http://10.0.0.2:26657", "mars"),
    ])));
    let registrar = ChainRegistrar::new(store.clone(), status);

    registrar
        .register("alice", "localhost:26657", &ChainOptions::default())
        .await
        .unwrap();
    let err = registrar
        .register("alice", "10.0.0.2:26657", &ChainOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RegistryError::EndpointConflict { ref chain_id, ref existing, ref requested }
            if chain_id == "mars" && existing == "http://localhost:26657" && requested == "http://10.0.0.2:26657"
    ));
    let config = store.load().unwrap();
    assert_eq!(config.chains.len(), 1);
    assert_eq!(config.chains[0].rpc_address, "http://localhost:26657");
}
