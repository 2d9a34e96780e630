//! Rebuilding a database file from its remote generation record.

use crate::generation::{self, GenerationId};
use crate::segment::Segment;
use crate::ReplicaError;
use object_store::ObjectStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// What [`restore`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The database file was reconstructed from this remote generation.
    Restored(GenerationId),
    /// Nothing was restored: either local state already exists (and always
    /// wins), or the remote has no generations and the caller should
    /// bootstrap a fresh database. Neither case is an error.
    Fresh,
}

/// Reconstruct `db_path` from the most recent remote generation.
///
/// The write is atomic with respect to `db_path`: bytes land in temporary
/// files that are renamed into place only once fully verified, so a crash
/// mid-restore never leaves a partial file at the final path. The log
/// sidecar (`<db>-wal`) is renamed before the main file — the main file's
/// existence is the marker that restore completed.
///
/// Every failure other than "nothing to restore from" is surfaced: the
/// caller must not open a database in unknown state.
pub async fn restore(
    db_path: &Path,
    store: &Arc<dyn ObjectStore>,
    prefix: &str,
) -> Result<RestoreOutcome, ReplicaError> {
    // Existing local state always wins over the remote copy, even if the
    // remote holds strictly newer history.
    if db_path.exists() {
        info!(path = %db_path.display(), "Local database exists, skipping restore");
        return Ok(RestoreOutcome::Fresh);
    }

    let generations = generation::list_generations(store, prefix).await?;
    let Some(latest) = generations.last().cloned() else {
        info!(prefix, "No remote generation found, starting fresh");
        return Ok(RestoreOutcome::Fresh);
    };

    info!(generation = %latest, path = %db_path.display(), "Restoring database from remote generation");

    let tmp_db = tmp_path(db_path, ".restore");
    let tmp_wal = tmp_path(&wal_sidecar(db_path), ".restore");

    let result = restore_into(db_path, &tmp_db, &tmp_wal, store, prefix, &latest).await;
    if result.is_err() {
        // Never leave partial state behind.
        let _ = tokio::fs::remove_file(&tmp_db).await;
        let _ = tokio::fs::remove_file(&tmp_wal).await;
    }
    result?;

    info!(generation = %latest, "Restore complete");
    Ok(RestoreOutcome::Restored(latest))
}

async fn restore_into(
    db_path: &Path,
    tmp_db: &Path,
    tmp_wal: &Path,
    store: &Arc<dyn ObjectStore>,
    prefix: &str,
    generation: &GenerationId,
) -> Result<(), ReplicaError> {
    let snapshot = store
        .get(&generation::snapshot_key(prefix, generation))
        .await?
        .bytes()
        .await?;
    write_durably(tmp_db, &snapshot).await?;

    let log = fetch_log(store, prefix, generation).await?;

    // Stale sidecars from a previous life of this path would be replayed by
    // the engine against the freshly restored file; clear them.
    remove_if_present(&wal_sidecar(db_path)).await?;
    remove_if_present(&shm_sidecar(db_path)).await?;

    if !log.is_empty() {
        write_durably(tmp_wal, &log).await?;
        tokio::fs::rename(tmp_wal, wal_sidecar(db_path))
            .await
            .map_err(|e| ReplicaError::io(tmp_wal, e))?;
    }

    tokio::fs::rename(tmp_db, db_path)
        .await
        .map_err(|e| ReplicaError::io(tmp_db, e))?;
    Ok(())
}

/// Download all segments of `generation` and replay them into the exact log
/// byte stream. Contiguity and checksums are verified before any byte is
/// accepted.
async fn fetch_log(
    store: &Arc<dyn ObjectStore>,
    prefix: &str,
    generation: &GenerationId,
) -> Result<Vec<u8>, ReplicaError> {
    let listing = store
        .list_with_delimiter(Some(&generation::wal_root(prefix, generation)))
        .await?;

    let mut keys: Vec<_> = listing
        .objects
        .into_iter()
        .filter_map(|meta| {
            let offset = generation::parse_segment_offset(&meta.location);
            if offset.is_none() {
                warn!(key = %meta.location, "Ignoring non-segment object in generation");
            }
            offset.map(|o| (o, meta.location))
        })
        .collect();
    keys.sort_by_key(|(offset, _)| *offset);

    let mut log = Vec::new();
    for (offset, key) in keys {
        let blob = store.get(&key).await?.bytes().await?;
        let segment = Segment::decode(key.as_ref(), &blob)?;

        if segment.offset != offset || segment.offset != log.len() as u64 {
            return Err(ReplicaError::SegmentGap {
                generation: generation.to_string(),
                expected: log.len() as u64,
                found: segment.offset,
            });
        }
        log.extend_from_slice(&segment.payload);
    }
    Ok(log)
}

async fn write_durably(path: &Path, bytes: &[u8]) -> Result<(), ReplicaError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| ReplicaError::io(path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| ReplicaError::io(path, e))?;
    file.sync_all()
        .await
        .map_err(|e| ReplicaError::io(path, e))?;
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<(), ReplicaError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ReplicaError::io(path, e)),
    }
}

fn tmp_path(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

/// SQLite's `-wal` sidecar for a database path.
pub(crate) fn wal_sidecar(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push("-wal");
    PathBuf::from(os)
}

fn shm_sidecar(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push("-shm");
    PathBuf::from(os)
}
