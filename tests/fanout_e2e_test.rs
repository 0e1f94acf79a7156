//! End-to-end test: origin → manager → fan-out channel → mirror →
//! RPC evaluation.
//!
//! Spins the real axum router on an ephemeral port, talks to it with a
//! raw WebSocket client and with the reconnecting mirror supervisor,
//! and drives refreshes through the HTTP surface.

#![cfg(all(feature = "server", feature = "client"))]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gjallarhorn::mirror::supervisor::{self, BackoffConfig};
use gjallarhorn::rpc::methods::MethodContext;
use gjallarhorn::rpc::{MethodRegistry, dispatch};
use gjallarhorn::server::{self, AppState};
use gjallarhorn::types::revision_of;
use gjallarhorn::{
    ActiveKeySet, Attributes, DatafileCache, DecisionEngine, EngineFactory, EventBus, HttpFetcher,
    Mirror, RefreshCoordinator, Result, VariableKind, WirePush, WireRequest,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
struct StubEngine {
    revision: u64,
}

impl DecisionEngine for StubEngine {
    fn revision(&self) -> u64 {
        self.revision
    }

    fn activate(&self, experiment_key: &str, _user_id: &str, _attributes: &Attributes)
    -> Option<String> {
        Some(format!("{experiment_key}-v{}", self.revision))
    }

    fn variation(&self, _experiment_key: &str, _user_id: &str, _attributes: &Attributes)
    -> Option<String> {
        None
    }

    fn set_forced_variation(&self, _experiment_key: &str, _user_id: &str, _variation_key: &str)
    -> bool {
        false
    }

    fn forced_variation(&self, _experiment_key: &str, _user_id: &str) -> Option<String> {
        None
    }

    fn is_feature_enabled(&self, _feature_key: &str, _user_id: &str, _attributes: &Attributes)
    -> bool {
        false
    }

    fn feature_variable(
        &self,
        _feature_key: &str,
        _variable_key: &str,
        _kind: VariableKind,
        _user_id: &str,
        _attributes: &Attributes,
    ) -> Option<Value> {
        None
    }

    fn enabled_features(&self, _user_id: &str, _attributes: &Attributes) -> Vec<String> {
        Vec::new()
    }

    fn track(&self, _event_key: &str, _user_id: &str, _attributes: &Attributes, _tags: &Value) {}
}

struct StubFactory;

impl EngineFactory for StubFactory {
    fn create(&self, document: &Value) -> Result<Arc<dyn DecisionEngine>> {
        Ok(Arc::new(StubEngine {
            revision: revision_of(document)?,
        }))
    }
}

/// Running manager bound to an ephemeral port.
struct TestManager {
    addr: SocketAddr,
    state: AppState,
    server: tokio::task::JoinHandle<()>,
}

impl TestManager {
    async fn start(origin: &MockServer) -> Self {
        let cache = Arc::new(DatafileCache::new());
        let active = Arc::new(ActiveKeySet::new());
        let bus = EventBus::new(64);
        let fetcher = Arc::new(HttpFetcher::new(format!(
            "{}/datafiles/{{KEY}}.json",
            origin.uri()
        )));
        let coordinator = Arc::new(
            RefreshCoordinator::new(
                Arc::clone(&cache),
                Arc::clone(&active),
                fetcher,
                bus.clone(),
            )
            .fetch_timeout(Duration::from_secs(2)),
        );
        // Default probe interval: these tests read lazily, so a short
        // interval would drop the raw client between steps.
        let state = AppState::new(cache, active, coordinator, bus);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = server::router(state.clone());
        let server = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            addr,
            state,
            server,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for TestManager {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn serve_datafile(origin: &MockServer, key: &str, revision: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/datafiles/{key}.json")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"revision": revision})))
        .mount(origin)
        .await;
}

async fn subscribe(manager: &TestManager) -> WsStream {
    let (stream, _response) = connect_async(manager.ws_url().as_str()).await.unwrap();
    stream
}

async fn send_request(stream: &mut WsStream, request: WireRequest) {
    let json = serde_json::to_string(&request).unwrap();
    stream.send(Message::Text(json)).await.unwrap();
}

/// Next parseable push, bounded by a timeout.
async fn recv_push(stream: &mut WsStream) -> WirePush {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = stream.next().await {
            if let Message::Text(text) = frame.unwrap() {
                if let Ok(push) = serde_json::from_str::<WirePush>(&text) {
                    return push;
                }
            }
        }
        panic!("stream closed before a push arrived");
    })
    .await
    .expect("timed out waiting for a push")
}

/// Poll until the mirror publishes the expected revision for a key.
async fn wait_for_revision(mirror: &Mirror, key: &str, revision: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if mirror.engine_revision(key) == Some(revision) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("mirror never reached revision {revision} for {key}"));
}

#[tokio::test(flavor = "multi_thread")]
async fn greeting_and_request_reply() {
    let origin = MockServer::start().await;
    serve_datafile(&origin, "K1", 5).await;
    let manager = TestManager::start(&origin).await;
    manager
        .state
        .coordinator
        .full_refresh(vec!["K1".to_string()])
        .await;

    let mut stream = subscribe(&manager).await;

    // One-time greeting carrying the peer's observed address.
    match recv_push(&mut stream).await {
        WirePush::ServerMessage { data } => assert!(data.contains("Hello from server")),
        other => panic!("expected greeting, got {other:?}"),
    }

    send_request(&mut stream, WireRequest::GetSdkKeys).await;
    match recv_push(&mut stream).await {
        WirePush::ActiveSdkKeys { data } => assert_eq!(data, vec!["K1"]),
        other => panic!("expected active_sdk_keys, got {other:?}"),
    }

    send_request(&mut stream, WireRequest::GetDatafiles).await;
    match recv_push(&mut stream).await {
        WirePush::ActiveDatafile { data, id } => {
            assert_eq!(id, "K1");
            assert_eq!(data["revision"], 5);
        }
        other => panic!("expected active_datafile, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_key_set_yields_notice() {
    let origin = MockServer::start().await;
    let manager = TestManager::start(&origin).await;

    let mut stream = subscribe(&manager).await;
    let _greeting = recv_push(&mut stream).await;

    send_request(&mut stream, WireRequest::GetDatafiles).await;
    match recv_push(&mut stream).await {
        WirePush::ServerMessage { data } => assert!(data.contains("registered datafiles")),
        other => panic!("expected notice, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn unrecognized_messages_are_ignored() {
    let origin = MockServer::start().await;
    let manager = TestManager::start(&origin).await;

    let mut stream = subscribe(&manager).await;
    let _greeting = recv_push(&mut stream).await;

    stream
        .send(Message::Text(r#"{"type": "get_everything"}"#.to_string()))
        .await
        .unwrap();

    // Connection stays usable afterwards.
    send_request(&mut stream, WireRequest::GetSdkKeys).await;
    match recv_push(&mut stream).await {
        WirePush::ActiveSdkKeys { data } => assert!(data.is_empty()),
        other => panic!("expected active_sdk_keys, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn update_sdk_keys_broadcasts_the_new_list() {
    let origin = MockServer::start().await;
    let manager = TestManager::start(&origin).await;

    let mut stream = subscribe(&manager).await;
    let _greeting = recv_push(&mut stream).await;

    let response: Value = reqwest::Client::new()
        .post(format!("{}/update_sdk_keys", manager.http_url()))
        .json(&json!({"sdk_keys": ["K1", "K2"]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["status"], "success");
    assert_eq!(response["registered_keys"], json!(["K1", "K2"]));

    match recv_push(&mut stream).await {
        WirePush::ActiveSdkKeys { data } => assert_eq!(data, vec!["K1", "K2"]),
        other => panic!("expected active_sdk_keys broadcast, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_payload_is_rejected_without_side_effects() {
    let origin = MockServer::start().await;
    let manager = TestManager::start(&origin).await;

    let response: Value = reqwest::Client::new()
        .post(format!("{}/datafile_update", manager.http_url()))
        .json(&json!({"sdk_keys": []}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(response["status"], "error");
    assert!(response["message"].is_string());
    assert!(manager.state.active.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn datafile_json_fetches_on_demand_without_registering() {
    let origin = MockServer::start().await;
    serve_datafile(&origin, "K9", 2).await;
    let manager = TestManager::start(&origin).await;

    let document: Value = reqwest::get(format!("{}/datafile/json/K9", manager.http_url()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(document["revision"], 2);
    // Lazy fetch does not mutate the active key set.
    assert!(manager.state.active.is_empty());
    assert!(manager.state.cache.get("K9").is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn revision_advance_reaches_subscriber_mirror_and_rpc() {
    let origin = MockServer::start().await;
    serve_datafile(&origin, "K1", 5).await;
    let manager = TestManager::start(&origin).await;
    manager
        .state
        .coordinator
        .full_refresh(vec!["K1".to_string()])
        .await;

    // Raw subscriber watching the broadcast side.
    let mut stream = subscribe(&manager).await;
    let _greeting = recv_push(&mut stream).await;

    // Mirror primed over its own connection.
    let mirror = Arc::new(
        Mirror::new(Arc::new(StubFactory)).with_source(Arc::new(HttpFetcher::new(format!(
            "{}/datafile/json/{{KEY}}",
            manager.http_url()
        )))),
    );
    let supervisor = supervisor::spawn(
        Arc::clone(&mirror),
        manager.ws_url(),
        BackoffConfig::new().initial(Duration::from_millis(50)),
    );
    wait_for_revision(&mirror, "K1", 5).await;

    // Origin advances to revision 6; webhook-style update request.
    origin.reset().await;
    serve_datafile(&origin, "K1", 6).await;
    let response: Value = reqwest::Client::new()
        .post(format!("{}/datafile_update", manager.http_url()))
        .json(&json!({"sdk_keys": ["K1"]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["status"], "success");

    // The raw subscriber sees exactly the changed document.
    match recv_push(&mut stream).await {
        WirePush::ActiveDatafile { data, id } => {
            assert_eq!(id, "K1");
            assert_eq!(data["revision"], 6);
        }
        other => panic!("expected active_datafile push, got {other:?}"),
    }

    // The mirror swaps its instance...
    wait_for_revision(&mirror, "K1", 6).await;

    // ...and a subsequent RPC evaluation reflects revision 6.
    let ctx = Arc::new(MethodContext::new(
        Arc::clone(&mirror),
        Some("K1".to_string()),
    ));
    let mut registry = MethodRegistry::new();
    ctx.register_all(&mut registry);
    let body = r#"{"experiment": {"experiment_key": "exp1", "user_id": "u1"}}"#;
    let rpc_response = dispatch(&registry, body).await.unwrap();
    assert_eq!(rpc_response["experiment"]["variation_key"], "exp1-v6");

    supervisor.abort();
}

#[tokio::test(flavor = "multi_thread")]
async fn supervisor_retries_until_manager_appears_then_primes() {
    let origin = MockServer::start().await;
    serve_datafile(&origin, "K1", 6).await;

    // Reserve an address, then leave it dark: the supervisor has to
    // retry through connect failures.
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let mirror = Arc::new(Mirror::new(Arc::new(StubFactory)));
    let supervisor = supervisor::spawn(
        Arc::clone(&mirror),
        format!("ws://{addr}/ws"),
        BackoffConfig::new()
            .initial(Duration::from_millis(50))
            .max(Duration::from_millis(200)),
    );
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(mirror.engine("K1").is_none());

    // The manager comes up with the current state; the next attempt
    // connects and the mandatory priming request recovers everything
    // the mirror missed — no replay involved.
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let cache = Arc::new(DatafileCache::new());
    let active = Arc::new(ActiveKeySet::new());
    let bus = EventBus::new(64);
    let fetcher = Arc::new(HttpFetcher::new(format!(
        "{}/datafiles/{{KEY}}.json",
        origin.uri()
    )));
    let coordinator = Arc::new(RefreshCoordinator::new(
        Arc::clone(&cache),
        Arc::clone(&active),
        fetcher,
        bus.clone(),
    ));
    coordinator.full_refresh(vec!["K1".to_string()]).await;
    let state = AppState::new(cache, active, coordinator, bus);
    let app = server::router(state);
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    wait_for_revision(&mirror, "K1", 6).await;

    supervisor.abort();
    server.abort();
}
