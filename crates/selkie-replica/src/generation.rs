//! Generation identifiers and the remote key layout.

use crate::ReplicaError;
use object_store::path::Path as StorePath;
use object_store::ObjectStore;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Identifier for one contiguous span of replicated log history.
///
/// 16 hex digits of creation-time microseconds plus 4 random hex digits, so
/// lexicographic order equals creation order and two instances starting in
/// the same microsecond still diverge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenerationId(String);

impl GenerationId {
    pub fn generate() -> Self {
        let micros = chrono::Utc::now().timestamp_micros().max(0) as u64;
        let nonce: u16 = rand::random();
        Self(format!("{micros:016x}{nonce:04x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GenerationId {
    type Err = ReplicaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 20 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(ReplicaError::InvalidTarget(format!(
                "malformed generation id: {s:?}"
            )))
        }
    }
}

/// Key helpers. The layout is private to this crate; everything else goes
/// through these.
pub(crate) fn generations_root(prefix: &str) -> StorePath {
    StorePath::from(format!("{prefix}/generations"))
}

pub(crate) fn snapshot_key(prefix: &str, id: &GenerationId) -> StorePath {
    StorePath::from(format!("{prefix}/generations/{id}/snapshot"))
}

pub(crate) fn wal_root(prefix: &str, id: &GenerationId) -> StorePath {
    StorePath::from(format!("{prefix}/generations/{id}/wal"))
}

pub(crate) fn segment_key(prefix: &str, id: &GenerationId, offset: u64) -> StorePath {
    StorePath::from(format!("{prefix}/generations/{id}/wal/{offset:016x}.seg"))
}

/// Parse the log offset back out of a segment key's file name.
pub(crate) fn parse_segment_offset(key: &StorePath) -> Option<u64> {
    let name = key.filename()?;
    let hex = name.strip_suffix(".seg")?;
    u64::from_str_radix(hex, 16).ok()
}

/// List generation ids at the target, ascending by creation order.
/// Unparseable directory names are skipped rather than failed on.
pub(crate) async fn list_generations(
    store: &Arc<dyn ObjectStore>,
    prefix: &str,
) -> Result<Vec<GenerationId>, ReplicaError> {
    let listing = store
        .list_with_delimiter(Some(&generations_root(prefix)))
        .await?;

    let mut generations: Vec<GenerationId> = listing
        .common_prefixes
        .iter()
        .filter_map(|p| p.filename())
        .filter_map(|name| name.parse().ok())
        .collect();

    generations.sort();
    Ok(generations)
}
