//! Request handlers for the share server.
//!
//! `/chunks/:hash` serves partition bytes to peers; possession of the
//! hash is the capability, there is no authentication. Any other path is
//! looked up in the file registry: regular files stream from their
//! original location, directory shares are archived on demand, unknown
//! names get the original plain-text "not found" body.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;

use crate::archive;
use crate::cas::{self, store::ChunkStore};
use crate::registry::{FileKind, FileRegistry};

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<ChunkStore>,
    pub registry: Arc<FileRegistry>,
}

pub async fn health() -> &'static str {
    "OK"
}

/// Serve a partition's bytes. 404 while the partition is absent or still
/// being fetched; `Present` guarantees the file at the path is complete.
pub async fn get_chunk(State(state): State<Arc<AppState>>, Path(hash): Path<String>) -> Response {
    let path = match state.store.get(&hash) {
        Ok(path) => path,
        Err(e) => return e.into_response(),
    };

    match stream_file(&path, "application/octet-stream").await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!("failed to serve chunk {}: {}", hash, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serve a shared file by name.
pub async fn get_share(State(state): State<Arc<AppState>>, Path(filename): Path<String>) -> Response {
    serve_share(&state, &filename).await
}

/// `/` and multi-segment paths: the last path segment names the share, so
/// links with extra prefixes still resolve.
pub async fn get_share_fallback(State(state): State<Arc<AppState>>, uri: Uri) -> Response {
    let name = uri.path().rsplit('/').next().unwrap_or("");
    serve_share(&state, name).await
}

async fn serve_share(state: &AppState, filename: &str) -> Response {
    let Some(file) = state.registry.get(filename) else {
        return (StatusCode::NOT_FOUND, format!("{} not found", filename)).into_response();
    };

    match file.kind {
        FileKind::RegularFile => {
            match stream_file(&file.local_source_path, "application/octet-stream").await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::error!("failed to serve {}: {}", filename, e);
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
        FileKind::Directory => {
            // Archive the tree to a per-request scratch file. The path is
            // unlinked as soon as the response holds its own handle; the
            // open descriptor keeps the bytes readable until the stream
            // ends, and a crash-leftover archive is swept with the other
            // temps at startup.
            let src = file.local_source_path.clone();
            let dest = cas::temp_path(state.store.store_dir());
            let zip_dest = dest.clone();
            let archived =
                tokio::task::spawn_blocking(move || archive::zip_dir(&src, &zip_dest)).await;

            let result = match archived {
                Ok(Ok(())) => match stream_file(&dest, "application/zip").await {
                    Ok(resp) => Ok(resp),
                    Err(e) => {
                        tracing::error!("failed to serve archive {}: {}", filename, e);
                        Err(())
                    }
                },
                Ok(Err(e)) => {
                    tracing::error!("failed to archive {}: {}", filename, e);
                    Err(())
                }
                Err(e) => {
                    tracing::error!("archive task panicked for {}: {}", filename, e);
                    Err(())
                }
            };
            let _ = tokio::fs::remove_file(&dest).await;

            match result {
                Ok(resp) => resp,
                Err(()) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            }
        }
    }
}

async fn stream_file(path: &FsPath, content_type: &str) -> std::io::Result<Response> {
    let file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let body = Body::from_stream(ReaderStream::new(file));

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, len)
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}
