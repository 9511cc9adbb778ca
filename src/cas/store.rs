//! On-disk partition store.
//!
//! Owns the chunk directory and the durable PartitionMap. Chunk files are
//! written to a temp path, flushed, then renamed to their hash name before
//! the partition is marked `Present`, so a reader that observes `Present`
//! never sees a truncated file. Every map mutation is followed by a
//! full-document persist before it counts as durable.

#![allow(dead_code)] // Some accessors exist for the UI layer and tests

use std::path::{Path, PathBuf};

use bytes::Bytes;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

use crate::cas::{self, ContentHash, Partition, PartitionStatus};
use crate::error::{Result, ShareError};
use crate::persist;

pub struct ChunkStore {
    /// Directory exclusively owned by this store; chunk files live here
    /// under their hex hash names.
    store_dir: PathBuf,
    /// PartitionMap: hex hash -> partition record.
    partitions: DashMap<String, Partition>,
    doc_path: PathBuf,
    /// Serializes full-document overwrites of the partition map.
    persist_lock: Mutex<()>,
}

impl ChunkStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let store_dir = data_dir.join("store");
        std::fs::create_dir_all(&store_dir)?;
        sweep_stale_temps(&store_dir)?;

        Ok(Self {
            store_dir,
            partitions: DashMap::new(),
            doc_path: data_dir.join("partitions.json"),
            persist_lock: Mutex::new(()),
        })
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// Replace the in-memory map with the persisted document.
    ///
    /// Entries are trusted as-is: a `Present` chunk is assumed intact, no
    /// re-checksumming on load.
    pub fn reload(&self) -> Result<()> {
        let pairs: Vec<(String, Partition)> = persist::load_pairs(&self.doc_path)?;
        self.partitions.clear();
        for (hash, partition) in pairs {
            self.partitions.insert(hash, partition);
        }
        tracing::info!("partition map loaded: {} entries", self.partitions.len());
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock();
        let pairs: Vec<(String, Partition)> = self
            .partitions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        persist::save_pairs(&self.doc_path, &pairs)
    }

    /// Record a chunk the addresser already renamed into place.
    pub fn ingest(&self, hash: &ContentHash, final_path: PathBuf) -> Result<()> {
        self.partitions.insert(
            hash.to_hex(),
            Partition {
                status: PartitionStatus::Present,
                local_path: Some(final_path),
            },
        );
        self.persist()
    }

    /// Track a remotely-known partition we intend to fetch. A partition
    /// that is already `Present` is left untouched.
    pub fn mark_fetching(&self, hash_hex: &str) -> Result<()> {
        let entry = self.partitions.entry(hash_hex.to_string()).or_insert(Partition {
            status: PartitionStatus::Fetching,
            local_path: None,
        });
        drop(entry);
        self.persist()
    }

    /// Write fetched chunk bytes: temp file, flush, atomic rename, then
    /// flip to `Present` and persist. In that order.
    pub async fn put_stream<S, E>(&self, hash_hex: &str, mut stream: S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Into<ShareError>,
    {
        let temp = cas::temp_path(&self.store_dir);
        let mut file = tokio::fs::File::create(&temp).await?;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&temp).await;
                    return Err(e.into());
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(e.into());
            }
        }

        file.sync_all().await?;
        drop(file);

        let final_path = self.store_dir.join(hash_hex);
        tokio::fs::rename(&temp, &final_path).await?;

        self.partitions.insert(
            hash_hex.to_string(),
            Partition {
                status: PartitionStatus::Present,
                local_path: Some(final_path),
            },
        );
        self.persist()
    }

    /// Convenience for already-buffered bytes.
    pub async fn put_bytes(&self, hash_hex: &str, data: Bytes) -> Result<()> {
        let stream = futures::stream::once(async move { Ok::<_, ShareError>(data) });
        self.put_stream(hash_hex, Box::pin(stream)).await
    }

    /// Path to serve a partition's bytes from. `NotFound` when the
    /// partition is absent or still being fetched.
    pub fn get(&self, hash_hex: &str) -> Result<PathBuf> {
        let entry = self
            .partitions
            .get(hash_hex)
            .ok_or_else(|| ShareError::NotFound(hash_hex.to_string()))?;

        match (&entry.status, &entry.local_path) {
            (PartitionStatus::Present, Some(path)) => Ok(path.clone()),
            _ => Err(ShareError::NotFound(hash_hex.to_string())),
        }
    }

    pub fn status(&self, hash_hex: &str) -> Option<PartitionStatus> {
        self.partitions.get(hash_hex).map(|entry| entry.status)
    }

    pub fn is_present(&self, hash_hex: &str) -> bool {
        self.status(hash_hex) == Some(PartitionStatus::Present)
    }

    /// Every locally-complete partition, for contributor announcements.
    pub fn present_hashes(&self) -> Vec<String> {
        self.partitions
            .iter()
            .filter(|entry| entry.status == PartitionStatus::Present)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

/// Delete scratch files a previous process left behind. Temps are
/// pre-rename state and never referenced by the partition map, so a
/// crash-leftover temp is always garbage.
fn sweep_stale_temps(store_dir: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(store_dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(cas::TEMP_PREFIX) {
            tracing::debug!("removing stale temp {:?}", entry.file_name());
            let _ = std::fs::remove_file(entry.path());
        }
    }
    Ok(())
}
