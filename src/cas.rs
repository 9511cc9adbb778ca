//! Content addressing.
//!
//! Files offloaded into the chunk store are split into fixed-size
//! partitions; each partition is named by the sha256 of its bytes and that
//! name is its on-disk filename, its wire identifier, and the key peers
//! use to request it.

#![allow(dead_code)] // Hash accessors are part of the public surface

pub mod store;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::Result;

/// Read buffer size for streaming split/hash (64KB)
pub const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Content hash (256-bit)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn from_data(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Self(hash)
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 {
            return None;
        }
        let mut hash = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).ok()?;
            hash[i] = u8::from_str_radix(s, 16).ok()?;
        }
        Some(Self(hash))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Whether a partition's bytes are on disk yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    /// Known from a remote manifest; bytes not (fully) local yet.
    Fetching,
    /// Bytes are complete and durable at the partition's final path.
    Present,
}

/// A content-addressed chunk tracked by the store.
///
/// Invariant: `local_path` points at a complete, readable file iff
/// `status` is `Present`. The status flips to `Present` only after the
/// final rename, never before.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Partition {
    pub status: PartitionStatus,
    pub local_path: Option<PathBuf>,
}

/// A chunk produced by `split`, still at its temporary path.
#[derive(Debug)]
pub struct SplitChunk {
    pub temp_path: PathBuf,
    pub size: u64,
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Filename prefix shared by every pre-rename scratch file. Anything in
/// the store directory starting with this is safe to delete at startup.
pub(crate) const TEMP_PREFIX: &str = ".tmp-";

/// A temp filename unique within this process, created in `dir` so the
/// later rename stays on one filesystem.
pub(crate) fn temp_path(dir: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    dir.join(format!("{}{}-{}", TEMP_PREFIX, std::process::id(), n))
}

/// Split `source` into successive fixed-size byte ranges written to
/// temporary files under `work_dir`. The final chunk may be shorter; a
/// zero-byte source yields no chunks. Partial temps are removed on error.
pub async fn split(source: &Path, chunk_size: u64, work_dir: &Path) -> Result<Vec<SplitChunk>> {
    let mut chunks: Vec<SplitChunk> = Vec::new();

    let result = split_inner(source, chunk_size, work_dir, &mut chunks).await;
    if let Err(e) = result {
        for chunk in &chunks {
            let _ = tokio::fs::remove_file(&chunk.temp_path).await;
        }
        return Err(e);
    }

    Ok(chunks)
}

async fn split_inner(
    source: &Path,
    chunk_size: u64,
    work_dir: &Path,
    chunks: &mut Vec<SplitChunk>,
) -> Result<()> {
    let mut reader = tokio::fs::File::open(source).await?;
    let mut buf = vec![0u8; STREAM_BUFFER_SIZE];

    'outer: loop {
        let path = temp_path(work_dir);
        let mut written = 0u64;
        let mut file: Option<tokio::fs::File> = None;

        while written < chunk_size {
            let want = std::cmp::min(buf.len() as u64, chunk_size - written) as usize;
            let n = reader.read(&mut buf[..want]).await?;
            if n == 0 {
                // Source exhausted; keep the short final chunk if it has bytes.
                if let Some(mut f) = file.take() {
                    f.sync_all().await?;
                    chunks.push(SplitChunk { temp_path: path, size: written });
                }
                break 'outer;
            }

            let f = match file.as_mut() {
                Some(f) => f,
                None => {
                    file = Some(tokio::fs::File::create(&path).await?);
                    file.as_mut().unwrap()
                }
            };
            f.write_all(&buf[..n]).await?;
            written += n as u64;
        }

        if let Some(mut f) = file.take() {
            f.sync_all().await?;
            chunks.push(SplitChunk { temp_path: path, size: written });
        }
    }

    Ok(())
}

/// Hash a chunk file's full bytes without loading it into memory.
pub async fn hash_file(path: &Path) -> Result<ContentHash> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; STREAM_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    Ok(ContentHash(hash))
}

/// Name a split chunk by its content and move it to its final location in
/// `store_dir`. Returns the hash and final path.
///
/// If a file with that hash already exists the temp is discarded instead
/// of overwriting it: equal hashes mean byte-identical content.
pub async fn address_chunk(temp: &Path, store_dir: &Path) -> Result<(ContentHash, PathBuf)> {
    let hash = hash_file(temp).await?;
    let final_path = store_dir.join(hash.to_hex());

    if tokio::fs::try_exists(&final_path).await? {
        tokio::fs::remove_file(temp).await?;
    } else {
        tokio::fs::rename(temp, &final_path).await?;
    }

    Ok((hash, final_path))
}
