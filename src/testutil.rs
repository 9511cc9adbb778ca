//! In-process HTTP fixtures for tests: a scriptable entry node speaking
//! the recorder contract and serving chunks, bound to an ephemeral port.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;

use crate::config::EntryNode;

/// Scriptable state backing the mock entry node.
#[derive(Default)]
pub struct RecorderState {
    pub create_calls: Mutex<Vec<serde_json::Value>>,
    pub announce_calls: Mutex<Vec<serde_json::Value>>,
    next_id: AtomicU64,
    /// File ids returned by list-file, in order.
    pub rows: Mutex<Vec<u64>>,
    /// id -> partition hashes returned by detail-file.
    pub details: Mutex<HashMap<u64, Vec<String>>>,
    /// hash -> contributor peers returned by list-contributor.
    pub contributors: Mutex<HashMap<String, Vec<String>>>,
    /// Chunk bytes served under /chunks/:hash.
    pub chunks: Mutex<HashMap<String, Bytes>>,
    pub fail_create: AtomicBool,
    pub fail_announce: AtomicBool,
    /// Concurrency tracking for chunk fetches.
    active_fetches: AtomicU64,
    pub max_active_fetches: AtomicU64,
}

impl RecorderState {
    pub fn created_count(&self) -> usize {
        self.create_calls.lock().len()
    }
}

/// Spawn the mock entry node; returns its base URL.
pub async fn spawn_recorder(state: Arc<RecorderState>) -> String {
    let app = Router::new()
        .route("/v1/create-file", post(create_file))
        .route("/v1/list-file", get(list_files))
        .route("/v1/detail-file", get(detail_file))
        .route("/v1/add-contributor", post(add_contributor))
        .route("/v1/list-contributor", post(list_contributors))
        .route("/chunks/:hash", get(serve_chunk))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Entry-node config pointing at a spawned mock.
pub fn entry_node_for(base_url: &str) -> EntryNode {
    let addr = base_url.trim_start_matches("http://");
    let (host, port) = addr.split_once(':').unwrap();
    EntryNode {
        host: host.to_string(),
        port: port.parse().unwrap(),
        dht_port: None,
    }
}

async fn create_file(
    State(state): State<Arc<RecorderState>>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    if state.fail_create.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))).into_response();
    }
    state.create_calls.lock().push(body);
    let id = state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "id": id })).into_response()
}

async fn list_files(State(state): State<Arc<RecorderState>>) -> impl IntoResponse {
    let rows: Vec<_> = state.rows.lock().iter().map(|id| json!({ "id": id })).collect();
    Json(json!({ "rows": rows }))
}

async fn detail_file(
    State(state): State<Arc<RecorderState>>,
    Query(q): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let id: u64 = q.get("id").and_then(|v| v.parse().ok()).unwrap_or(0);
    let details = state.details.lock();
    let partitions: Vec<_> = details
        .get(&id)
        .map(|hashes| hashes.iter().map(|h| json!({ "hash": h })).collect())
        .unwrap_or_default();
    Json(json!({ "partitions": partitions }))
}

async fn add_contributor(
    State(state): State<Arc<RecorderState>>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    if state.fail_announce.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))).into_response();
    }
    state.announce_calls.lock().push(body);
    Json(json!({})).into_response()
}

async fn list_contributors(
    State(state): State<Arc<RecorderState>>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let contributors = state.contributors.lock();
    let lists: Vec<Vec<String>> = body["partition_hash"]
        .as_array()
        .map(|hashes| {
            hashes
                .iter()
                .map(|h| {
                    contributors
                        .get(h.as_str().unwrap_or_default())
                        .cloned()
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default();
    Json(json!({ "contributors": lists }))
}

async fn serve_chunk(
    State(state): State<Arc<RecorderState>>,
    AxumPath(hash): AxumPath<String>,
) -> impl IntoResponse {
    let active = state.active_fetches.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_active_fetches.fetch_max(active, Ordering::SeqCst);

    // Keep the request open long enough for overlap to be observable.
    tokio::time::sleep(Duration::from_millis(25)).await;
    let data = state.chunks.lock().get(&hash).cloned();

    state.active_fetches.fetch_sub(1, Ordering::SeqCst);

    match data {
        Some(data) => data.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
