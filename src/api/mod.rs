pub mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};

pub use handlers::AppState;

/// Inbound routes: the reserved `/chunks` prefix goes to the chunk store,
/// everything else is a shared-file lookup by the path's last segment.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/chunks/:hash", get(handlers::get_chunk))
        .route("/:filename", get(handlers::get_share))
        .fallback(handlers::get_share_fallback)
}
