use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use jsonrpsee::{
    RpcModule,
    server::{Server, ServerHandle},
    types::{ErrorObject, ErrorObjectOwned, Params, error::CALL_EXECUTION_FAILED_CODE},
};
use parking_lot::Mutex;
use relayerlib::{
    cfg::EngineSettings,
    chain::{ChainOptions, ChainRegistrar, TendermintStatus},
    engine::rpc::RpcRelayEngine,
    error::{EngineError, RegistryError},
    registry::{Chain, Path},
    relayer::Relayer,
    store::{ConfigStore, MemoryStore},
};
use serde_json::{Value, json};

use crate::{Harness, ids};

/// A JSON-RPC server on a local port. Stops when dropped.
struct TestServer {
    url: String,
    _handle: ServerHandle,
}

async fn serve(module: RpcModule<()>) -> TestServer {
    let server = Server::builder()
        .build((Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.start(module);
    TestServer {
        url: format!("http://{addr}"),
        _handle: handle,
    }
}

fn failed(message: impl Into<String>) -> ErrorObjectOwned {
    ErrorObject::owned(CALL_EXECUTION_FAILED_CODE, message.into(), None::<()>)
}

/// Handshake answer for `path`. `p2` is refused by the engine.
fn answer_link(params: Params, calls: &Mutex<Vec<String>>) -> Result<Value, ErrorObjectOwned> {
    let (src, dst, path): (Chain, Chain, Path) = params.parse()?;
    calls
        .lock()
        .push(format!("link {} {}>{}", path.id, src.id, dst.id));
    if path.id == "p2" {
        return Err(failed(format!("no route from {} to {}", src.id, dst.id)));
    }
    Ok(json!({
        "src": { "channelID": "channel-3", "connectionID": "connection-3", "version": "ics20-1" },
        "dst": { "channelID": "channel-8", "connectionID": "connection-8" },
    }))
}

fn engine_path(id: &str) -> Value {
    json!({
        "id": id,
        "isLinked": true,
        "src": { "chainID": "mars", "portID": "transfer", "channelID": "channel-3" },
        "dst": { "chainID": "venus", "portID": "transfer", "channelID": "channel-8" },
    })
}

/// A relay engine which records every call it receives.
fn engine_module(calls: Arc<Mutex<Vec<String>>>) -> RpcModule<()> {
    let mut module = RpcModule::new(());
    module
        .register_method("link", {
            let calls = calls.clone();
            move |params, _, _| answer_link(params, &calls)
        })
        .unwrap();
    module
        .register_method("start", {
            let calls = calls.clone();
            move |params, _, _| -> Result<(), ErrorObjectOwned> {
                let path_ids: Vec<String> = params.one()?;
                calls.lock().push(format!("start {}", path_ids.join(",")));
                Ok(())
            }
        })
        .unwrap();
    module
        .register_method("getPath", |params, _, _| -> Result<Value, ErrorObjectOwned> {
            let id: String = params.one()?;
            if id != "p1" {
                return Err(failed(format!("path {id} not found")));
            }
            Ok(engine_path(&id))
        })
        .unwrap();
    module
        .register_method("listPaths", |_, _, _| -> Result<Value, ErrorObjectOwned> {
            Ok(json!([engine_path("p1")]))
        })
        .unwrap();
    module
}

fn rpc_engine(url: &str, request_timeout: Duration) -> Arc<RpcRelayEngine> {
    Arc::new(
        RpcRelayEngine::new(&EngineSettings {
            url: url.to_owned(),
            request_timeout,
        })
        .unwrap(),
    )
}

#[tokio::test]
async fn link_over_json_rpc() {
    let calls = Arc::new(Mutex::new(vec![]));
    let server = serve(engine_module(calls.clone())).await;
    let h = Harness::standard();
    let relayer = Relayer::new(
        h.store.clone(),
        rpc_engine(&server.url, Duration::from_secs(5)),
    );

    let report = relayer.link(&[]).await.unwrap();

    assert_eq!(report.linked, ids(&["p1"]));
    assert_eq!(report.already_linked, ids(&["p3"]));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path_id, "p2");
    assert_eq!(report.failed[0].reason, "no route from venus to earth");
    assert_eq!(
        *calls.lock(),
        vec!["link p1 mars>venus".to_owned(), "link p2 venus>earth".to_owned()]
    );

    let path = h.path("p1");
    assert_eq!(path.src.channel_id, "channel-3");
    assert_eq!(path.src.connection_id, "connection-3");
    assert_eq!(path.src.version.as_deref(), Some("ics20-1"));
    assert_eq!(path.dst.channel_id, "channel-8");
    assert_eq!(path.dst.connection_id, "connection-8");
}

#[tokio::test]
async fn engine_view_over_json_rpc() {
    let server = serve(engine_module(Arc::new(Mutex::new(vec![])))).await;
    let relayer = Relayer::new(
        Arc::new(MemoryStore::new()),
        rpc_engine(&server.url, Duration::from_secs(5)),
    );

    let path = relayer.get_path("p1").await.unwrap();
    assert!(path.is_linked);
    assert_eq!(path.src.chain_id, "mars");
    assert_eq!(path.src.port_id, "transfer");
    assert_eq!(path.dst.channel_id, "channel-8");
    assert_eq!(relayer.list_paths().await.unwrap(), vec![path]);

    let err = relayer.get_path("p9").await.unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Engine(EngineError::Rejected(ref m)) if m == "path p9 not found"
    ));
}

#[tokio::test]
async fn start_over_json_rpc_ends_with_the_session() {
    let calls = Arc::new(Mutex::new(vec![]));
    let server = serve(engine_module(calls.clone())).await;
    let h = Harness::standard();
    let relayer = Relayer::new(
        h.store.clone(),
        rpc_engine(&server.url, Duration::from_secs(5)),
    );

    relayer
        .start(&[], std::future::pending())
        .await
        .unwrap();
    assert_eq!(*calls.lock(), vec!["start p3".to_owned()]);
}

#[tokio::test]
async fn slow_handshake_fails_only_its_path() {
    let mut module = RpcModule::new(());
    module
        .register_async_method("link", |params, _, _| async move {
            let (_, _, path): (Chain, Chain, Path) = params.parse()?;
            if path.id == "p1" {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            Ok::<_, ErrorObjectOwned>(json!({
                "src": { "channelID": "channel-5", "connectionID": "connection-5" },
                "dst": { "channelID": "channel-6", "connectionID": "connection-6" },
            }))
        })
        .unwrap();
    let server = serve(module).await;
    let h = Harness::standard();
    let relayer = Relayer::new(
        h.store.clone(),
        rpc_engine(&server.url, Duration::from_millis(200)),
    );

    let report = relayer.link(&[]).await.unwrap();

    assert_eq!(report.linked, ids(&["p2"]));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path_id, "p1");
    assert_eq!(report.failed[0].reason, "relay engine did not answer in time");
    assert!(!h.path("p1").is_linked());
    assert_eq!(h.path("p2").src.channel_id, "channel-5");
}

#[tokio::test]
async fn unreachable_engine_is_a_transport_failure() {
    // Nothing listens on port 1.
    let h = Harness::standard();
    let relayer = Relayer::new(
        h.store.clone(),
        rpc_engine("http://127.0.0.1:1", Duration::from_secs(5)),
    );

    let err = relayer.link(&[]).await.unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Engine(EngineError::Transport(_))
    ));
}

fn status_module(answer: Result<Value, String>) -> RpcModule<()> {
    let mut module = RpcModule::new(());
    module
        .register_method("status", move |_, _, _| -> Result<Value, ErrorObjectOwned> {
            answer.clone().map_err(failed)
        })
        .unwrap();
    module
}

#[tokio::test]
async fn chain_identity_comes_from_its_status() {
    let server = serve(status_module(Ok(json!({
        "node_info": { "network": "mars-1", "moniker": "validator-0" },
        "sync_info": { "latest_block_height": "42", "catching_up": false },
    }))))
    .await;
    let store = Arc::new(MemoryStore::new());
    let status = TendermintStatus::new(Duration::from_secs(5)).unwrap();
    let registrar = ChainRegistrar::new(store.clone(), Arc::new(status));

    let address = server.url.trim_start_matches("http://").to_owned() + "/";
    let chain = registrar
        .register("alice", &address, &ChainOptions::default())
        .await
        .unwrap();

    assert_eq!(chain.id, "mars-1");
    assert_eq!(chain.rpc_address, server.url);
    assert_eq!(store.load().unwrap().chains, vec![chain]);
}

#[tokio::test]
async fn status_error_is_a_chain_query_failure() {
    let server = serve(status_module(Err("node is still syncing".to_owned()))).await;
    let store = Arc::new(MemoryStore::new());
    let status = TendermintStatus::new(Duration::from_secs(5)).unwrap();
    let registrar = ChainRegistrar::new(store.clone(), Arc::new(status));

    let err = registrar
        .register("alice", &server.url, &ChainOptions::default())
        .await
        .unwrap_err();

    assert!(
        matches!(err, RegistryError::ChainQuery { ref reason, .. } if reason.contains("node is still syncing")),
        "{err}"
    );
    assert!(store.load().unwrap().chains.is_empty());
}
