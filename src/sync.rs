//! Replication sync loop.
//!
//! Three periodic activities run against the recorder on a fixed interval
//! from process start, each on its own timer so a hung call stalls only
//! its own activity:
//!
//! 1. announce every locally `Present` partition in one call
//! 2. discover newly registered files and fetch missing partitions,
//!    strictly one at a time
//! 3. refresh per-file contributor counts for the UI
//!
//! A successful fetch re-announces the partition immediately and restarts
//! discovery right away so catch-up after downtime is fast; steady state
//! polls on the interval. Failures never escape the loop: an announce
//! error self-heals next tick, a failed fetch leaves the partition
//! `Fetching` and it is retried, at the fixed interval, indefinitely.

use std::sync::Arc;
use std::time::Duration;

use crate::cas::store::ChunkStore;
use crate::config::AppConfig;
use crate::directory::DirectoryClient;
use crate::error::{Result, ShareError};
use crate::registry::FileRegistry;

/// Page requested from list-file on every discovery pass.
const DISCOVERY_PAGE_SIZE: u32 = 20;

pub struct ReplicationSync {
    config: Arc<AppConfig>,
    store: Arc<ChunkStore>,
    registry: Arc<FileRegistry>,
    directory: Arc<DirectoryClient>,
    client: reqwest::Client,
    /// Caps chunk transfers at one in flight, process-wide.
    fetch_gate: tokio::sync::Mutex<()>,
}

impl ReplicationSync {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<ChunkStore>,
        registry: Arc<FileRegistry>,
        directory: Arc<DirectoryClient>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            directory,
            client: reqwest::Client::new(),
            fetch_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Start the timer-driven loops. They run for the life of the process.
    pub fn spawn(self: &Arc<Self>) {
        let interval = Duration::from_secs(self.config.sync_interval_secs);

        let sync = self.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            loop {
                timer.tick().await;
                if let Err(e) = sync.announce_present().await {
                    tracing::warn!("announce failed, will retry next tick: {}", e);
                }
            }
        });

        let sync = self.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            loop {
                timer.tick().await;
                sync.run_discovery().await;
            }
        });

        let sync = self.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            loop {
                timer.tick().await;
                if let Err(e) = sync.registry.refresh_online(&sync.directory).await {
                    tracing::warn!("online refresh failed: {}", e);
                }
            }
        });
    }

    /// Announce the full `Present` set in a single call. Best-effort.
    pub async fn announce_present(&self) -> Result<()> {
        let hashes = self.store.present_hashes();
        if hashes.is_empty() {
            return Ok(());
        }
        self.directory
            .announce_contributor(&self.config.domain, &hashes)
            .await?;
        tracing::debug!("announced {} partitions", hashes.len());
        Ok(())
    }

    /// Run discovery passes until nothing is fetched. Each successful
    /// fetch restarts discovery immediately to drain outstanding
    /// partitions; a failure ends the run and the interval retries.
    pub async fn run_discovery(&self) {
        loop {
            match self.discover_once().await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    tracing::warn!("discovery pass failed, retrying next tick: {}", e);
                    break;
                }
            }
        }
    }

    /// One discovery pass: find the first recently-registered file with an
    /// outstanding partition and fetch only its first such partition.
    /// Returns whether a partition was fetched.
    async fn discover_once(&self) -> Result<bool> {
        // Held across candidate selection and transfer: at most one fetch
        // is ever in flight.
        let _gate = self.fetch_gate.lock().await;

        let rows = self.directory.list_recent_files(0, DISCOVERY_PAGE_SIZE).await?;

        for row in rows {
            let partitions = self.directory.file_detail(row.id).await?;
            let outstanding = partitions.iter().find(|p| !self.store.is_present(&p.hash));

            let Some(partition) = outstanding else {
                continue;
            };

            self.store.mark_fetching(&partition.hash)?;
            self.fetch_partition(&partition.hash).await?;

            // Make the new copy discoverable before the next pass; the
            // periodic announce corrects any miss here.
            if let Err(e) = self
                .directory
                .announce_contributor(&self.config.domain, std::slice::from_ref(&partition.hash))
                .await
            {
                tracing::warn!("post-fetch announce failed: {}", e);
            }

            tracing::info!("fetched partition {} of remote file {}", partition.hash, row.id);
            return Ok(true);
        }

        Ok(false)
    }

    /// Stream one chunk from the entry node into the store.
    async fn fetch_partition(&self, hash_hex: &str) -> Result<()> {
        let url = self.config.chunk_url(hash_hex);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(ShareError::Remote(format!(
                "peer returned {} for {}",
                resp.status(),
                url
            )));
        }
        self.store.put_stream(hash_hex, Box::pin(resp.bytes_stream())).await
    }
}
