//! Shared-file registry.
//!
//! Tracks every file the user shares: its manifest, whether it has been
//! offloaded into the chunk store, and UI-facing replication data. The
//! FileMap is durable with the same persist-after-mutate discipline as the
//! partition map; `online_count` is transient and resets on reload.

#![allow(dead_code)] // Listing/info accessors are driven by the UI layer

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cas::{self, store::ChunkStore};
use crate::config::AppConfig;
use crate::directory::{DirectoryClient, PartitionEntry, PartitionMeta};
use crate::error::{Result, ShareError};
use crate::persist;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    RegularFile,
    Directory,
}

/// Offload progress. Monotone: `Stored` is terminal and a failed offload
/// stays `Storing` rather than rolling back, so work already split and
/// ingested locally is not redone from scratch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreState {
    NotStored,
    Storing,
    Stored,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionRef {
    pub hash: String,
    pub size_bytes: u64,
    /// How many peers currently report holding this partition. Live fact,
    /// not durable state: reset to zero on reload.
    #[serde(skip)]
    pub online_count: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SharedFile {
    pub key: String,
    pub local_source_path: PathBuf,
    pub kind: FileKind,
    pub store_state: StoreState,
    /// Recorder-assigned id; set iff registration succeeded.
    pub remote_id: Option<u64>,
    /// Ordered partition manifest; non-empty iff `Stored`.
    pub partitions: Vec<PartitionRef>,
    pub original_size_bytes: u64,
}

/// What the UI renders per share.
#[derive(Clone, Debug, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub url: String,
    pub store_state: StoreState,
    /// Fraction of partitions with at least one contributor online.
    pub online_ratio: f64,
}

pub struct FileRegistry {
    config: Arc<AppConfig>,
    /// FileMap: share key -> manifest.
    files: DashMap<String, SharedFile>,
    doc_path: PathBuf,
    persist_lock: Mutex<()>,
}

impl FileRegistry {
    pub fn new(data_dir: &Path, config: Arc<AppConfig>) -> Self {
        Self {
            config,
            files: DashMap::new(),
            doc_path: data_dir.join("files.json"),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn reload(&self) -> Result<()> {
        let pairs: Vec<(String, SharedFile)> = persist::load_pairs(&self.doc_path)?;
        self.files.clear();
        for (key, file) in pairs {
            self.files.insert(key, file);
        }
        tracing::info!("file map loaded: {} shares", self.files.len());
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock();
        let pairs: Vec<(String, SharedFile)> = self
            .files
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        persist::save_pairs(&self.doc_path, &pairs)
    }

    /// Start sharing a local path. Directories are keyed with a `.zip`
    /// suffix since they are served as archives.
    pub fn add_file(&self, path: &Path) -> Result<FileInfo> {
        let meta = std::fs::metadata(path)?;
        let kind = if meta.is_dir() { FileKind::Directory } else { FileKind::RegularFile };

        let base = path
            .file_name()
            .ok_or_else(|| ShareError::Unsupported(format!("no file name in {}", path.display())))?
            .to_string_lossy()
            .to_string();
        let key = match kind {
            FileKind::Directory => format!("{}.zip", base),
            FileKind::RegularFile => base,
        };

        if self.files.contains_key(&key) {
            return Err(ShareError::Conflict("file name exists".to_string()));
        }

        let file = SharedFile {
            key: key.clone(),
            local_source_path: path.to_path_buf(),
            kind,
            store_state: StoreState::NotStored,
            remote_id: None,
            partitions: Vec::new(),
            original_size_bytes: if meta.is_dir() { 0 } else { meta.len() },
        };
        self.files.insert(key.clone(), file);
        self.persist()?;

        tracing::info!("sharing {} as {}", path.display(), key);
        Ok(self.info(&key).expect("just inserted"))
    }

    /// Stop sharing. Chunk bytes are deliberately not reclaimed: another
    /// manifest may reference partitions of identical content.
    pub fn remove_file(&self, key: &str) -> Result<()> {
        if self.files.remove(key).is_none() {
            return Err(ShareError::NotFound("file doesn't exists".to_string()));
        }
        self.persist()?;
        tracing::info!("unshared {}", key);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<SharedFile> {
        self.files.get(key).map(|entry| entry.value().clone())
    }

    pub fn info(&self, key: &str) -> Option<FileInfo> {
        self.files.get(key).map(|entry| {
            let file = entry.value();
            FileInfo {
                name: file.key.clone(),
                url: self.config.share_url(&file.key),
                store_state: file.store_state,
                online_ratio: online_ratio(file),
            }
        })
    }

    pub fn list(&self) -> Vec<FileInfo> {
        let mut infos: Vec<FileInfo> = self
            .files
            .iter()
            .map(|entry| {
                let file = entry.value();
                FileInfo {
                    name: file.key.clone(),
                    url: self.config.share_url(&file.key),
                    store_state: file.store_state,
                    online_ratio: online_ratio(file),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Offload a share into the chunk store and register it with the
    /// recorder.
    ///
    /// `Storing` is entered synchronously and persisted before any disk or
    /// network work, so the UI sees progress immediately and a crash
    /// mid-offload is visible on restart. The transition to `Stored`
    /// happens only after the file is fully split, every partition is
    /// durably `Present`, and the recorder returned an id. A failure
    /// leaves the manifest `Storing`; the user retries manually and
    /// already-present chunks dedup for free.
    pub async fn store_file(
        &self,
        key: &str,
        store: &ChunkStore,
        directory: &DirectoryClient,
    ) -> Result<()> {
        let file = self
            .get(key)
            .ok_or_else(|| ShareError::NotFound("file doesn't exists".to_string()))?;

        if file.kind == FileKind::Directory {
            return Err(ShareError::Unsupported(
                "directory shares cannot be offloaded".to_string(),
            ));
        }
        if file.store_state == StoreState::Stored {
            return Ok(());
        }

        self.set_state(key, StoreState::Storing);
        self.persist()?;

        let chunks = cas::split(&file.local_source_path, self.config.chunk_size, store.store_dir())
            .await?;

        let addressed = address_chunks(&chunks, store).await;
        let (entries, refs) = match addressed {
            Ok(addressed) => addressed,
            Err(e) => {
                // Temps the addresser never reached must not linger;
                // already-renamed chunks stay and dedup on retry.
                for chunk in &chunks {
                    let _ = tokio::fs::remove_file(&chunk.temp_path).await;
                }
                return Err(e);
            }
        };

        let remote_id = directory
            .register_file(key, file.original_size_bytes, &entries)
            .await?;

        if let Some(mut entry) = self.files.get_mut(key) {
            entry.remote_id = Some(remote_id);
            entry.partitions = refs;
            entry.store_state = StoreState::Stored;
        }
        self.persist()?;

        tracing::info!("offloaded {} as remote file {} ({} partitions)", key, remote_id, entries.len());
        Ok(())
    }

    fn set_state(&self, key: &str, state: StoreState) {
        if let Some(mut entry) = self.files.get_mut(key) {
            entry.store_state = state;
        }
    }

    /// Recompute each stored share's per-partition `online_count` from the
    /// recorder's contributor lists. UI-facing only; never touches
    /// partition status and is not persisted.
    pub async fn refresh_online(&self, directory: &DirectoryClient) -> Result<()> {
        let keys: Vec<String> = self
            .files
            .iter()
            .filter(|entry| !entry.partitions.is_empty())
            .map(|entry| entry.key().clone())
            .collect();

        for key in keys {
            let hashes: Vec<String> = match self.files.get(&key) {
                Some(entry) => entry.partitions.iter().map(|p| p.hash.clone()).collect(),
                None => continue,
            };

            let lists = directory.list_contributors(&hashes).await?;

            if let Some(mut entry) = self.files.get_mut(&key) {
                for (partition, peers) in entry.partitions.iter_mut().zip(lists.iter()) {
                    partition.online_count = peers.len() as u32;
                }
            }
        }

        Ok(())
    }
}

/// Name each split chunk and record it in the store, stopping at the
/// first failure. The caller owns cleanup of any temps left behind.
async fn address_chunks(
    chunks: &[cas::SplitChunk],
    store: &ChunkStore,
) -> Result<(Vec<PartitionEntry>, Vec<PartitionRef>)> {
    let mut entries: Vec<PartitionEntry> = Vec::with_capacity(chunks.len());
    let mut refs: Vec<PartitionRef> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let (hash, final_path) = cas::address_chunk(&chunk.temp_path, store.store_dir()).await?;
        store.ingest(&hash, final_path)?;
        entries.push(PartitionEntry {
            hash: hash.to_hex(),
            meta: PartitionMeta { size: chunk.size },
        });
        refs.push(PartitionRef {
            hash: hash.to_hex(),
            size_bytes: chunk.size,
            online_count: 0,
        });
    }
    Ok((entries, refs))
}

fn online_ratio(file: &SharedFile) -> f64 {
    if file.partitions.is_empty() {
        return 0.0;
    }
    let online = file.partitions.iter().filter(|p| p.online_count > 0).count();
    online as f64 / file.partitions.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::ContentHash;
    use crate::testutil::{spawn_recorder, RecorderState};
    use std::sync::atomic::Ordering;

    fn fixture() -> (tempfile::TempDir, Arc<AppConfig>, ChunkStore, FileRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(AppConfig::default());
        let store = ChunkStore::new(dir.path()).unwrap();
        let registry = FileRegistry::new(dir.path(), config.clone());
        (dir, config, store, registry)
    }

    fn write_source(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[tokio::test]
    async fn test_add_list_remove() {
        let (dir, _, _, registry) = fixture();
        let path = write_source(dir.path(), "notes.txt", b"hello");

        let info = registry.add_file(&path).unwrap();
        assert_eq!(info.name, "notes.txt");
        assert_eq!(info.url, "http://test.com:8080/notes.txt");
        assert_eq!(info.store_state, StoreState::NotStored);

        assert_eq!(registry.list().len(), 1);
        registry.remove_file("notes.txt").unwrap();
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_key_conflicts() {
        let (dir, _, _, registry) = fixture();
        let path = write_source(dir.path(), "dup.txt", b"x");

        registry.add_file(&path).unwrap();
        let err = registry.add_file(&path).unwrap_err();
        assert!(matches!(err, ShareError::Conflict(_)));
        // Short description string the UI layer shows verbatim.
        assert_eq!(err.to_string(), "conflict: file name exists");
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let (_dir, _, _, registry) = fixture();
        assert!(matches!(registry.remove_file("ghost"), Err(ShareError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_directory_key_gets_zip_suffix() {
        let (dir, _, _, registry) = fixture();
        let sub = dir.path().join("photos");
        std::fs::create_dir_all(&sub).unwrap();

        let info = registry.add_file(&sub).unwrap();
        assert_eq!(info.name, "photos.zip");

        let file = registry.get("photos.zip").unwrap();
        assert_eq!(file.kind, FileKind::Directory);
    }

    #[tokio::test]
    async fn test_offload_two_and_a_half_chunks() {
        let (dir, _, store, registry) = fixture();
        let mib = 1024 * 1024;
        let data: Vec<u8> = (0..mib * 5 / 2).map(|i| (i % 239) as u8).collect();
        let path = write_source(dir.path(), "video.bin", &data);
        registry.add_file(&path).unwrap();

        let state = Arc::new(RecorderState::default());
        let base = spawn_recorder(state.clone()).await;
        let directory = DirectoryClient::new(base);

        registry.store_file("video.bin", &store, &directory).await.unwrap();

        let file = registry.get("video.bin").unwrap();
        assert_eq!(file.store_state, StoreState::Stored);
        assert_eq!(file.remote_id, Some(1));

        let sizes: Vec<u64> = file.partitions.iter().map(|p| p.size_bytes).collect();
        assert_eq!(sizes, vec![mib as u64, mib as u64, mib as u64 / 2]);

        // Registered exactly once, with exactly those three hashes.
        assert_eq!(state.created_count(), 1);
        let call = state.create_calls.lock()[0].clone();
        assert_eq!(call["size"], data.len() as u64);
        let sent: Vec<String> = call["partitions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["hash"].as_str().unwrap().to_string())
            .collect();
        let expected: Vec<String> = [&data[..mib], &data[mib..2 * mib], &data[2 * mib..]]
            .iter()
            .map(|range| ContentHash::from_data(range).to_hex())
            .collect();
        assert_eq!(sent, expected);

        // Every partition is durably present and servable.
        for hash in &expected {
            assert!(store.is_present(hash));
        }
    }

    #[tokio::test]
    async fn test_failed_registration_leaves_storing() {
        let (dir, _, store, registry) = fixture();
        let path = write_source(dir.path(), "doc.bin", &vec![7u8; 2048]);
        registry.add_file(&path).unwrap();

        let state = Arc::new(RecorderState::default());
        state.fail_create.store(true, Ordering::SeqCst);
        let base = spawn_recorder(state.clone()).await;
        let directory = DirectoryClient::new(base);

        let err = registry.store_file("doc.bin", &store, &directory).await.unwrap_err();
        assert!(matches!(err, ShareError::Remote(_)));

        // Never rolled back to NotStored; no remote id, no partitions.
        let file = registry.get("doc.bin").unwrap();
        assert_eq!(file.store_state, StoreState::Storing);
        assert_eq!(file.remote_id, None);
        assert!(file.partitions.is_empty());

        // Manual retry from Storing completes; chunks dedup for free.
        state.fail_create.store(false, Ordering::SeqCst);
        registry.store_file("doc.bin", &store, &directory).await.unwrap();
        assert_eq!(registry.get("doc.bin").unwrap().store_state, StoreState::Stored);
    }

    #[tokio::test]
    async fn test_failed_offload_removes_split_temps() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.chunk_size = 1024;
        let store = ChunkStore::new(dir.path()).unwrap();
        let registry = FileRegistry::new(dir.path(), Arc::new(config));

        let path = write_source(dir.path(), "multi.bin", &vec![8u8; 2560]);
        registry.add_file(&path).unwrap();

        // Shadow the partition-map document with a directory so the first
        // ingest fails after the first chunk is renamed into place.
        std::fs::create_dir(dir.path().join("partitions.json")).unwrap();

        let directory = DirectoryClient::new("http://127.0.0.1:1".to_string());
        assert!(registry.store_file("multi.bin", &store, &directory).await.is_err());

        // The remaining split temps were cleaned up, not leaked.
        let temps: Vec<_> = std::fs::read_dir(store.store_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(temps.is_empty(), "stale temps: {:?}", temps);

        assert_eq!(registry.get("multi.bin").unwrap().store_state, StoreState::Storing);
    }

    #[tokio::test]
    async fn test_stored_is_terminal() {
        let (dir, _, store, registry) = fixture();
        let path = write_source(dir.path(), "one.bin", &vec![1u8; 64]);
        registry.add_file(&path).unwrap();

        let state = Arc::new(RecorderState::default());
        let directory = DirectoryClient::new(spawn_recorder(state.clone()).await);

        registry.store_file("one.bin", &store, &directory).await.unwrap();
        registry.store_file("one.bin", &store, &directory).await.unwrap();

        // Second call is a no-op: still Stored, registered only once.
        assert_eq!(registry.get("one.bin").unwrap().store_state, StoreState::Stored);
        assert_eq!(state.created_count(), 1);
    }

    #[tokio::test]
    async fn test_directory_offload_unsupported() {
        let (dir, _, store, registry) = fixture();
        let sub = dir.path().join("tree");
        std::fs::create_dir_all(&sub).unwrap();
        registry.add_file(&sub).unwrap();

        let directory = DirectoryClient::new("http://127.0.0.1:1".to_string());
        let err = registry.store_file("tree.zip", &store, &directory).await.unwrap_err();
        assert!(matches!(err, ShareError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_identical_content_stores_partitions_once() {
        let (dir, _, store, registry) = fixture();
        let data = vec![42u8; 4096];
        let a = write_source(dir.path(), "a.bin", &data);
        let b = write_source(dir.path(), "b.bin", &data);
        registry.add_file(&a).unwrap();
        registry.add_file(&b).unwrap();

        let state = Arc::new(RecorderState::default());
        let directory = DirectoryClient::new(spawn_recorder(state.clone()).await);

        registry.store_file("a.bin", &store, &directory).await.unwrap();
        registry.store_file("b.bin", &store, &directory).await.unwrap();

        let parts_a = registry.get("a.bin").unwrap().partitions;
        let parts_b = registry.get("b.bin").unwrap().partitions;
        assert_eq!(parts_a.len(), 1);
        assert_eq!(parts_a[0].hash, parts_b[0].hash);

        // One physical chunk backs both manifests.
        assert_eq!(store.partition_count(), 1);
        assert!(store.store_dir().join(&parts_a[0].hash).exists());
    }

    #[tokio::test]
    async fn test_refresh_online_updates_counts_only() {
        let (dir, _, store, registry) = fixture();
        let path = write_source(dir.path(), "r.bin", &vec![9u8; 128]);
        registry.add_file(&path).unwrap();

        let state = Arc::new(RecorderState::default());
        let directory = DirectoryClient::new(spawn_recorder(state.clone()).await);
        registry.store_file("r.bin", &store, &directory).await.unwrap();

        let hash = registry.get("r.bin").unwrap().partitions[0].hash.clone();
        state
            .contributors
            .lock()
            .insert(hash.clone(), vec!["peer-a".to_string(), "peer-b".to_string()]);

        registry.refresh_online(&directory).await.unwrap();

        let file = registry.get("r.bin").unwrap();
        assert_eq!(file.partitions[0].online_count, 2);
        assert_eq!(registry.info("r.bin").unwrap().online_ratio, 1.0);
        // Status untouched.
        assert!(store.is_present(&hash));
    }

    #[tokio::test]
    async fn test_reload_resets_online_counts() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(AppConfig::default());
        let store = ChunkStore::new(dir.path()).unwrap();
        let path = write_source(dir.path(), "p.bin", &vec![3u8; 256]);

        let state = Arc::new(RecorderState::default());
        let directory = DirectoryClient::new(spawn_recorder(state.clone()).await);

        {
            let registry = FileRegistry::new(dir.path(), config.clone());
            registry.add_file(&path).unwrap();
            registry.store_file("p.bin", &store, &directory).await.unwrap();

            let hash = registry.get("p.bin").unwrap().partitions[0].hash.clone();
            state.contributors.lock().insert(hash, vec!["peer".to_string()]);
            registry.refresh_online(&directory).await.unwrap();
            assert_eq!(registry.get("p.bin").unwrap().partitions[0].online_count, 1);
        }

        let registry = FileRegistry::new(dir.path(), config);
        registry.reload().unwrap();
        let file = registry.get("p.bin").unwrap();
        // Durable state survives; the live contributor count does not.
        assert_eq!(file.store_state, StoreState::Stored);
        assert_eq!(file.partitions[0].online_count, 0);
    }
}
