//! # selkie-replica
//!
//! Continuous replication of a WAL-mode SQLite database to an object store,
//! and reconstruction of the database from that remote record.
//!
//! ## Model
//!
//! Replicated history is organized into **generations**. A generation starts
//! with a **snapshot** (the full database file) and is extended by
//! **segments**: framed, CRC-checked byte ranges of the database's write-ahead
//! log, strictly ordered by offset. Replaying a generation's segments in order
//! reconstructs its log byte-exactly; the snapshot plus the reconstructed log
//! is the database.
//!
//! A checkpoint that resets the log (detected by a WAL salt change or a size
//! regression) breaks byte continuity, so the replicator rotates: it begins a
//! new generation with a fresh snapshot. At most one generation is written at
//! a time.
//!
//! ## Remote layout
//!
//! ```text
//! <prefix>/generations/<gen-id>/snapshot
//! <prefix>/generations/<gen-id>/wal/<offset>.seg
//! ```
//!
//! Generation ids sort lexicographically in creation order; callers never see
//! the blob naming.
//!
//! ## Guarantees (and non-guarantees)
//!
//! - [`restore`] never touches an existing local file and never leaves a
//!   partial file at the destination path.
//! - Replication is a best-effort shadow of already-committed state: it never
//!   blocks the writer, and upload failures are retried with backoff rather
//!   than surfaced to the host process.
//! - [`ReplicatorHandle::soft_close`] either flushes everything not yet
//!   uploaded or reports an error; it never drops unsent data silently.

mod error;
mod generation;
mod replicator;
mod restore;
mod segment;
mod target;
mod wal;

pub use error::ReplicaError;
pub use generation::GenerationId;
pub use replicator::{Replicator, ReplicatorHandle, DEFAULT_SYNC_INTERVAL};
pub use restore::{restore, RestoreOutcome};
pub use target::ReplicaTarget;
