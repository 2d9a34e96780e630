//! The bind-then-signal handoff protocol.
//!
//! State machine per instance: `Starting → Bound → (PredecessorSignaled) →
//! Serving`. The ordering that matters: our own bind must succeed before the
//! predecessor is told to drain, and the record is rewritten with our pid
//! regardless of whether the signal landed.

use crate::listener::bind_reuseport;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Handoff protocol errors. Stale or unreadable records are deliberately not
/// represented here — they are ignored, not failed on.
#[derive(Error, Debug)]
pub enum HandoffError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: io::Error,
    },

    #[error("failed to write handoff record {path}: {source}")]
    Record {
        path: PathBuf,
        source: io::Error,
    },
}

/// The shared handoff record: a small pid file replaced atomically on each
/// takeover. At most one writer per handoff event touches it.
pub struct HandoffRecord {
    path: PathBuf,
}

impl HandoffRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the recorded predecessor pid. A missing or malformed record
    /// yields `None` — there is nobody to signal.
    pub fn read(&self) -> Option<u32> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        raw.trim().parse().ok()
    }

    /// Atomically replace the record with this process's pid.
    pub fn write_self(&self) -> Result<(), HandoffError> {
        let record = |source| HandoffError::Record {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(record)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, format!("{}\n", std::process::id())).map_err(record)?;
        std::fs::rename(&tmp, &self.path).map_err(record)?;
        Ok(())
    }
}

/// Outcome of [`take_over`].
pub struct TakeOver {
    /// The bound listener, ready to serve.
    pub listener: TcpListener,
    /// Whether a live predecessor was found and signaled to drain.
    pub predecessor_signaled: bool,
}

/// Bind `addr` with address reuse and run the handoff handshake against the
/// record at `record_path`.
///
/// Binding happens first; only once it succeeds is a live predecessor sent
/// `SIGQUIT`. Between the bind and the predecessor finishing its drain both
/// processes accept connections, so the address is never unserved.
pub fn take_over(addr: SocketAddr, record_path: &Path) -> Result<TakeOver, HandoffError> {
    let listener = bind_reuseport(addr).map_err(|source| HandoffError::Bind { addr, source })?;

    let record = HandoffRecord::new(record_path);
    let predecessor_signaled = match record.read() {
        Some(pid) if pid == std::process::id() => false,
        Some(pid) if !process_alive(pid) => {
            info!(pid, "Handoff record is stale (process gone), ignoring");
            false
        }
        Some(pid) => {
            let delivered = unsafe { libc::kill(pid as libc::pid_t, libc::SIGQUIT) } == 0;
            if delivered {
                info!(pid, "Signaled predecessor to begin graceful shutdown");
            } else {
                warn!(pid, "Predecessor alive but SIGQUIT delivery failed");
            }
            delivered
        }
        None => false,
    };

    // Claim the record even if signaling failed — we are the active instance
    // from here on.
    record.write_self()?;
    info!(record = %record.path().display(), "Recorded own pid in handoff record");

    Ok(TakeOver {
        listener,
        predecessor_signaled,
    })
}

/// `kill(pid, 0)` probes liveness without delivering anything.
fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let record = HandoffRecord::new(dir.path().join("selkie.pid"));

        assert_eq!(record.read(), None);

        record.write_self().unwrap();
        assert_eq!(record.read(), Some(std::process::id()));
    }

    #[test]
    fn test_malformed_record_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selkie.pid");
        std::fs::write(&path, "not a pid\n").unwrap();

        assert_eq!(HandoffRecord::new(&path).read(), None);
    }

    #[test]
    fn test_write_replaces_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selkie.pid");
        std::fs::write(&path, "99999999\n").unwrap();

        let record = HandoffRecord::new(&path);
        record.write_self().unwrap();
        assert_eq!(record.read(), Some(std::process::id()));
        assert!(!path.with_extension("tmp").exists());
    }

    /// A record naming a dead process: bind succeeds, nothing is signaled,
    /// and the record is claimed anyway.
    #[tokio::test]
    async fn test_take_over_with_dead_predecessor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selkie.pid");
        // pid_max on Linux defaults to well below this value.
        std::fs::write(&path, "3999999\n").unwrap();

        let outcome = take_over("127.0.0.1:0".parse().unwrap(), &path).unwrap();
        assert!(!outcome.predecessor_signaled);
        assert_eq!(HandoffRecord::new(&path).read(), Some(std::process::id()));
    }

    /// No record at all: the cold-start path.
    #[tokio::test]
    async fn test_take_over_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selkie.pid");

        let outcome = take_over("127.0.0.1:0".parse().unwrap(), &path).unwrap();
        assert!(!outcome.predecessor_signaled);
        assert!(path.exists());
    }

    /// A record naming our own pid must not be signaled — that would make a
    /// restart drain itself.
    #[tokio::test]
    async fn test_take_over_ignores_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selkie.pid");
        std::fs::write(&path, format!("{}\n", std::process::id())).unwrap();

        let outcome = take_over("127.0.0.1:0".parse().unwrap(), &path).unwrap();
        assert!(!outcome.predecessor_signaled);
    }
}
