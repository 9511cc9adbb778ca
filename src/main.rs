mod api;
mod archive;
mod cas;
mod config;
mod directory;
mod error;
mod persist;
mod registry;
mod sync;
#[cfg(test)]
mod testutil;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::AppState;
use cas::store::ChunkStore;
use config::AppConfig;
use directory::DirectoryClient;
use registry::FileRegistry;
use sync::ReplicationSync;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "freeshare=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_dir = config::default_config_dir();
    let data_dir = std::env::var("FREESHARE_DATA_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| config::default_data_dir());
    std::fs::create_dir_all(&data_dir).expect("Failed to create data directory");

    let app_config = AppConfig::load(&config_dir).expect("Failed to load config");
    app_config.save(&config_dir).expect("Failed to write config");
    let app_config = Arc::new(app_config);
    tracing::info!("config loaded from {:?}", config_dir);

    // Chunk store: reload the durable partition map before serving.
    let store = Arc::new(ChunkStore::new(&data_dir).expect("Failed to open chunk store"));
    store.reload().expect("Failed to load partition map");

    // File registry: reload shared-file manifests.
    let registry = Arc::new(FileRegistry::new(&data_dir, app_config.clone()));
    registry.reload().expect("Failed to load file map");

    let directory = Arc::new(DirectoryClient::new(app_config.recorder_base()));

    // Background replication against the entry node.
    let replication = Arc::new(ReplicationSync::new(
        app_config.clone(),
        store.clone(),
        registry.clone(),
        directory,
    ));
    replication.spawn();
    tracing::info!(
        "replication sync started (every {}s against {})",
        app_config.sync_interval_secs,
        app_config.recorder_base()
    );

    let state = Arc::new(AppState { store, registry });

    let app = api::router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], app_config.port));
    tracing::info!("freeshare serving on http://{}", addr);
    tracing::info!("  GET /chunks/:hash - partition bytes for peers");
    tracing::info!("  GET /:filename    - shared file by name");

    let listener = tokio::net::TcpListener::bind(addr).await.expect("Failed to bind");
    axum::serve(listener, app).await.expect("Server error");
}
