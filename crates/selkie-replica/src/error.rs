//! Replication error types.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplicaError {
    #[error("object store error: {0}")]
    Storage(#[from] object_store::Error),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: io::Error,
    },

    #[error("invalid replica target: {0}")]
    InvalidTarget(String),

    #[error("corrupt segment {key}: {reason}")]
    CorruptSegment { key: String, reason: String },

    #[error("generation {generation} has a gap: expected log offset {expected}, segment starts at {found}")]
    SegmentGap {
        generation: String,
        expected: u64,
        found: u64,
    },

    #[error("replicator is no longer running")]
    Closed,

    #[error("flush did not complete within {timeout:?}")]
    FlushTimeout { timeout: Duration },
}

impl ReplicaError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
