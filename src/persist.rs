//! Durable map documents.
//!
//! The partition map and file map are each persisted as a single JSON
//! document holding the map's entries as a flat array of `[key, record]`
//! pairs. Every logical mutation is followed by a full-document overwrite
//! before it counts as durable; reload replaces the in-memory map
//! wholesale. No incremental or append-log format.

use std::io::Write;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// Overwrite `path` with the given entries, atomically.
///
/// Writes to a sibling temp file, syncs it to disk, then renames over the
/// target so a crash mid-write never leaves a torn document behind.
pub fn save_pairs<V: Serialize>(path: &Path, pairs: &[(String, V)]) -> Result<()> {
    let data = serde_json::to_vec(pairs)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let tmp = path.with_extension("tmp");
    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(&data)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load the entries persisted at `path`.
///
/// A missing document is an empty map, not an error (first run).
pub fn load_pairs<V: DeserializeOwned>(path: &Path) -> Result<Vec<(String, V)>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let pairs = serde_json::from_slice(&data)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(pairs)
}
