//! The background replication loop.
//!
//! One task per database: on a fixed tick it reads newly-committed log bytes
//! and ships them as the next segment of the active generation. The loop
//! never blocks the writer and never terminates on upload failure — errors
//! are logged and retried with capped exponential backoff. The only way the
//! loop ends is [`ReplicatorHandle::soft_close`] (final bounded flush, then
//! stop) or dropping the handle.

use crate::generation::{self, GenerationId};
use crate::segment::Segment;
use crate::wal;
use crate::{restore::wal_sidecar, ReplicaError};
use object_store::{ObjectStore, PutPayload};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default replication tick.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// Ceiling for the failure backoff between ticks.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

enum Command {
    /// Flush everything not yet uploaded, acknowledge, then stop the loop.
    SoftClose(oneshot::Sender<Result<(), ReplicaError>>),
}

/// Continuous replication of one database to one target.
pub struct Replicator;

impl Replicator {
    /// Spawn the replication task for the (already restored and opened)
    /// database at `db_path`.
    pub fn start(
        db_path: impl Into<PathBuf>,
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
        sync_interval: Duration,
    ) -> ReplicatorHandle {
        let session = Session::new(db_path, store, prefix);
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(run(session, rx, sync_interval));
        ReplicatorHandle { tx, task }
    }
}

/// Handle to a running replication task.
pub struct ReplicatorHandle {
    tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl ReplicatorHandle {
    /// Synchronously flush any not-yet-uploaded log bytes and stop the loop.
    ///
    /// `Ok(())` means everything through the last committed write was
    /// uploaded. On timeout the task is aborted and an error returned — the
    /// caller may still proceed to terminate, but is told data was left
    /// behind.
    pub async fn soft_close(self, timeout: Duration) -> Result<(), ReplicaError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .tx
            .send(Command::SoftClose(ack_tx))
            .await
            .is_err()
        {
            return Err(ReplicaError::Closed);
        }

        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ReplicaError::Closed),
            Err(_) => {
                self.task.abort();
                Err(ReplicaError::FlushTimeout { timeout })
            }
        }
    }
}

async fn run(mut session: Session, mut rx: mpsc::Receiver<Command>, interval: Duration) {
    let mut failures: u32 = 0;
    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::SoftClose(ack)) => {
                    let result = session.sync_once().await;
                    if let Err(e) = &result {
                        warn!(error = %e, "Final flush failed during soft close");
                    }
                    let _ = ack.send(result);
                    break;
                }
                // Handle dropped without a soft close: stop without flushing.
                None => break,
            },
            _ = tokio::time::sleep(backoff_delay(interval, failures)) => {
                match session.sync_once().await {
                    Ok(()) => failures = 0,
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        warn!(error = %e, failures, "Replication sync failed, will retry");
                    }
                }
            }
        }
    }
    debug!("Replication loop stopped");
}

fn backoff_delay(interval: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return interval;
    }
    let backed_off = interval.saturating_mul(1u32 << failures.min(5));
    backed_off.min(MAX_BACKOFF).max(interval)
}

/// Per-database replication state.
struct Session {
    db_path: PathBuf,
    wal_path: PathBuf,
    store: Arc<dyn ObjectStore>,
    prefix: String,
    active: Option<ActiveGeneration>,
}

struct ActiveGeneration {
    id: GenerationId,
    /// Log bytes below this offset are uploaded.
    offset: u64,
    /// Salt of the log epoch this generation tracks. `None` until the first
    /// log bytes of the generation are observed.
    salt: Option<(u32, u32)>,
}

impl Session {
    fn new(
        db_path: impl Into<PathBuf>,
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
    ) -> Self {
        let db_path = db_path.into();
        let wal_path = wal_sidecar(&db_path);
        Self {
            db_path,
            wal_path,
            store,
            prefix: prefix.into(),
            active: None,
        }
    }

    /// One replication pass: ensure a generation exists, detect log resets,
    /// upload whatever committed bytes are new.
    async fn sync_once(&mut self) -> Result<(), ReplicaError> {
        if self.active.is_none() {
            self.begin_generation().await?;
        }

        let status = wal::read_status(&self.wal_path).await?;
        let Some(header) = status.header else {
            // No log right now. If this generation already shipped log
            // bytes, the log was checkpointed away: rotate so continuity is
            // never silently broken.
            if self.active.as_ref().is_some_and(|a| a.offset > 0) {
                info!("Log file reset detected (log gone), rotating generation");
                self.begin_generation().await?;
            }
            return Ok(());
        };

        let reset = {
            let active = self.active.as_ref().expect("generation ensured above");
            active.salt.is_some_and(|salt| salt != header.salt) || status.len < active.offset
        };
        if reset {
            info!("Log checkpoint detected (salt or size reset), rotating generation");
            self.begin_generation().await?;
        }

        let active = self.active.as_mut().expect("generation ensured above");
        active.salt = Some(header.salt);

        let committed = header.committed_len(status.len);
        if committed <= active.offset {
            return Ok(());
        }

        let bytes = wal::read_range(&self.wal_path, active.offset, committed - active.offset).await?;
        let segment = Segment::new(active.offset, bytes);
        let key = generation::segment_key(&self.prefix, &active.id, active.offset);
        self.store
            .put(&key, PutPayload::from(segment.encode()))
            .await?;

        debug!(
            generation = %active.id,
            offset = active.offset,
            len = committed - active.offset,
            "Uploaded log segment"
        );
        active.offset = committed;
        Ok(())
    }

    /// Open a new generation: upload a fresh snapshot of the database file
    /// and restart segment offsets from zero.
    async fn begin_generation(&mut self) -> Result<(), ReplicaError> {
        let id = GenerationId::generate();
        let snapshot = tokio::fs::read(&self.db_path)
            .await
            .map_err(|e| ReplicaError::io(&self.db_path, e))?;
        let len = snapshot.len();

        self.store
            .put(
                &generation::snapshot_key(&self.prefix, &id),
                PutPayload::from(snapshot),
            )
            .await?;

        info!(generation = %id, snapshot_bytes = len, "Began new generation");
        self.active = Some(ActiveGeneration {
            id,
            offset: 0,
            salt: None,
        });
        Ok(())
    }
}
