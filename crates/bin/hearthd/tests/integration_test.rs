//! End-to-end tests: hub, virtual provider, `SQLite` store and the HTTP
//! surface wired together the way `hearthd` does it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use hearth_adapter_http_axum::api::{COUNTER_HEADER, INSTANCE_HEADER};
use hearth_adapter_http_axum::state::AppState;
use hearth_adapter_storage_sqlite_sqlx::{Config, SqliteKeyValueStore};
use hearth_adapter_virtual::VirtualOptions;
use hearth_app::hub::{Hub, HubOptions};
use hearth_app::ports::SnapshotSource;
use hearth_app::sync::{FrameOutcome, Reconciler};
use hearth_domain::device::Device;
use hearth_domain::error::HearthError;
use hearth_domain::id::{DeviceKey, UniqueId};
use hearth_domain::service::ServiceSnapshot;
use hearth_domain::sync::SyncCursor;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn hub() -> Arc<Hub> {
    let db = Config {
        max_connections: 1,
        ..Config::new("sqlite::memory:")
    }
    .build()
    .await
    .unwrap();
    let store = Arc::new(SqliteKeyValueStore::new(db.pool().clone()));

    let hub = Hub::new(HubOptions::default());
    let options = VirtualOptions {
        meter_period: Duration::from_secs(3600),
        ..VirtualOptions::default()
    };
    let provider = hearth_adapter_virtual::setup(store, options).await.unwrap();
    hub.add_provider(provider).unwrap();
    hub.drain().await;
    hub
}

fn app(hub: &Arc<Hub>) -> Router {
    hearth_adapter_http_axum::router::build(AppState::new(Arc::clone(hub)))
}

async fn json_body(resp: Response<Body>) -> Value {
    serde_json::from_slice(&resp.into_body().collect().await.unwrap().to_bytes()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// `update` frames for `id.key` found in a chunk of SSE text.
fn updates_of(chunk: &str, id: &str, key: &str) -> Vec<Value> {
    chunk
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|data| serde_json::from_str::<Value>(data).ok())
        .filter(|frame| frame["action"] == "update" && frame["id"] == id && frame["key"] == key)
        .collect()
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_return_ok_on_health() {
    let hub = hub().await;

    let resp = app(&hub).oneshot(get("/health")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_list_virtual_services() {
    let hub = hub().await;

    let resp = app(&hub).oneshot(get("/services")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    let ids: Vec<&str> = body.as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["virtual:light", "virtual:meter", "virtual:switch"]);
    assert_eq!(body["virtual:light"]["values"]["on"], json!(false));
}

#[tokio::test]
async fn should_show_written_value_in_next_listing() {
    let hub = hub().await;
    let app = app(&hub);

    let resp = app
        .clone()
        .oneshot(post("/service/virtual:light", json!({"on": true})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    hub.drain().await;

    let body = json_body(app.oneshot(get("/services")).await.unwrap()).await;
    assert_eq!(body["virtual:light"]["values"]["on"], json!(true));
}

#[tokio::test]
async fn should_toggle_switch_through_action() {
    let hub = hub().await;

    let resp = app(&hub)
        .oneshot(post("/service/virtual:switch/action/toggle", json!({})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["result"]["on"], json!(true));
}

#[tokio::test]
async fn should_reject_write_to_read_only_meter() {
    let hub = hub().await;

    let resp = app(&hub)
        .oneshot(post("/service/virtual:meter", json!({"power": 12.0})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = json_body(resp).await;
    assert_eq!(body["success"], json!(false));
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_merge_light_and_meter_into_one_device() {
    let hub = hub().await;

    let body = json_body(app(&hub).oneshot(get("/devices")).await.unwrap()).await;

    let device = &body[hearth_adapter_virtual::devices::BULB_IDENTIFIER];
    assert_eq!(device["services"], json!(["virtual:light", "virtual:meter"]));
}

// ---------------------------------------------------------------------------
// Event stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_stream_exactly_one_update_per_write() {
    let hub = hub().await;
    let app = app(&hub);

    let resp = app.clone().oneshot(get("/events")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let mut body = resp.into_body();

    app.oneshot(post("/service/virtual:light", json!({"on": true})))
        .await
        .unwrap();
    hub.drain().await;

    let mut frames = Vec::new();
    while frames.is_empty() {
        let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let chunk = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        frames.extend(updates_of(&chunk, "virtual:light", "on"));
    }

    hub.shutdown().await;
    let rest = tokio::time::timeout(Duration::from_secs(5), body.collect())
        .await
        .unwrap()
        .unwrap()
        .to_bytes();
    frames.extend(updates_of(&String::from_utf8_lossy(&rest), "virtual:light", "on"));

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["value"], json!(true));
    assert_eq!(frames[0]["oldValue"], json!(false));
}

// ---------------------------------------------------------------------------
// Sync: a reconciler mirroring the hub over HTTP
// ---------------------------------------------------------------------------

/// Pulls snapshots through the router, reading the cursor from headers.
struct HttpSource(Router);

impl HttpSource {
    async fn pull(&self, uri: &str) -> Result<(SyncCursor, Value), HearthError> {
        let resp = self
            .0
            .clone()
            .oneshot(get(uri))
            .await
            .map_err(HearthError::backend)?;
        let cursor = {
            let header = |name: &str| {
                resp.headers()
                    .get(name)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| HearthError::backend(format!("missing {name} header")))
            };
            SyncCursor {
                instance: header(INSTANCE_HEADER)?.parse().map_err(HearthError::backend)?,
                counter: header(COUNTER_HEADER)?.parse().map_err(HearthError::backend)?,
            }
        };
        Ok((cursor, json_body(resp).await))
    }
}

impl SnapshotSource for HttpSource {
    async fn fetch_services(&self) -> Result<(SyncCursor, BTreeMap<UniqueId, ServiceSnapshot>), HearthError> {
        let (cursor, body) = self.pull("/services").await?;
        let services = serde_json::from_value(body).map_err(HearthError::backend)?;
        Ok((cursor, services))
    }

    async fn fetch_devices(&self) -> Result<(SyncCursor, Vec<Device>), HearthError> {
        let (cursor, body) = self.pull("/devices").await?;
        let by_key: BTreeMap<String, Device> = serde_json::from_value(body).map_err(HearthError::backend)?;
        let devices = by_key
            .into_iter()
            .map(|(key, device)| Device {
                key: DeviceKey::new(key),
                ..device
            })
            .collect();
        Ok((cursor, devices))
    }
}

#[tokio::test]
async fn should_mirror_hub_state_through_snapshots_and_frames() {
    let hub = hub().await;
    let source = HttpSource(app(&hub));
    let mut frames = hub.subscribe();

    let mut mirror = Reconciler::default();
    mirror.refresh(&source).await.unwrap();
    assert_eq!(mirror.services().len(), 3);
    assert_eq!(mirror.devices().len(), 1);

    let light: UniqueId = "virtual:light".parse().unwrap();
    hub.write(&light, "on", json!(true)).await.unwrap();
    hub.drain().await;

    let frame = frames.try_recv().unwrap();
    assert_eq!(mirror.accept(frame), FrameOutcome::Applied);
    assert_eq!(mirror.service(&light).unwrap().values["on"], json!(true));
}
