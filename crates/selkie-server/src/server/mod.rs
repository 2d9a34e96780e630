//! Serve loop and the ordered shutdown sequence.
//!
//! [`run`] owns the whole serving lifecycle: take over the listen address
//! from any predecessor, serve until a shutdown trigger, then drain in a
//! fixed order — replication flush first, then stop accepting, then wait for
//! in-flight requests bounded by the graceful timeout, force-closing on
//! expiry. The function returns only once that sequence has completed, so
//! the process cannot exit mid-drain.

use crate::config::Config;
use crate::db::Database;
use anyhow::Result;
use selkie_replica::ReplicatorHandle;
use selkie_seamless::{take_over, GracefulShutdown, TakeOver};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod routes;

pub use routes::{router, AppState};

/// Bound on the final replication flush. Short by design: shutdown
/// durability is best-effort, and the regular sync interval keeps the
/// backlog small.
const REPLICA_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve until shutdown, then drain. Blocks for the lifetime of the server.
pub async fn run(db: Database, config: Config, replicator: Option<ReplicatorHandle>) -> Result<()> {
    let shutdown = GracefulShutdown::new()?;
    let stop = shutdown.stop_token();

    // Bind before signaling: a failed newcomer must never take down a
    // healthy predecessor, and the address is never left unserved.
    let TakeOver {
        listener,
        predecessor_signaled,
    } = take_over(config.listen, &config.handoff_record)?;
    if predecessor_signaled {
        info!("Taking over traffic from draining predecessor");
    }

    let state = Arc::new(AppState::new(db.clone(), config.server_name.clone()));
    info!(addr = %config.listen, instance = %state.instance_id, "Serving HTTP");
    let app = router(state);

    let serve_stop = stop.clone();
    let mut serve_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                serve_stop.cancelled().await;
                info!("Listener closed, draining in-flight requests");
            })
            .await
    });

    tokio::select! {
        // Server died on its own — an error, not a shutdown.
        result = &mut serve_task => {
            result??;
            anyhow::bail!("HTTP server stopped unexpectedly");
        }
        signal = shutdown.triggered() => {
            info!(signal = ?signal, "Beginning shutdown sequence");
        }
    }

    // Fixed drain order. (1) Flush replication while still serving:
    // durability of already-accepted writes outranks availability.
    if let Some(handle) = replicator {
        match handle.soft_close(REPLICA_FLUSH_TIMEOUT).await {
            Ok(()) => info!("Replication flushed and stopped"),
            Err(e) => warn!(error = %e, "Replication flush incomplete, proceeding with shutdown"),
        }
    }

    // (2) Stop accepting; (3) wait for in-flight requests, bounded.
    stop.cancel();
    match tokio::time::timeout(config.graceful_timeout, &mut serve_task).await {
        Ok(Ok(Ok(()))) => info!("Drain complete"),
        Ok(Ok(Err(e))) => warn!(error = %e, "HTTP server error during drain"),
        Ok(Err(e)) => warn!(error = %e, "Serve task failed during drain"),
        Err(_) => {
            // (4) Degraded but handled: force-close what remains.
            warn!(timeout = ?config.graceful_timeout, "Drain timeout exceeded, force closing");
            serve_task.abort();
        }
    }

    db.close().await;
    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::open_test_db;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::sync::CancellationToken;

    async fn spawn_serving(
        dir: &std::path::Path,
    ) -> (
        std::net::SocketAddr,
        CancellationToken,
        tokio::task::JoinHandle<std::io::Result<()>>,
    ) {
        let db = open_test_db(dir).await;
        let app = router(Arc::new(AppState::new(db, "drain-test")));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let token = CancellationToken::new();
        let stop = token.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
        });
        (addr, token, task)
    }

    async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                    .as_bytes(),
            )
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    /// Shutdown arrives while a slow request is in flight: the request
    /// completes normally and the server stops right after it, so total
    /// shutdown time tracks the request rather than the full timeout.
    #[tokio::test]
    async fn in_flight_request_completes_during_drain() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, token, task) = spawn_serving(dir.path()).await;

        let slow = tokio::spawn(async move { http_get(addr, "/?delay=500ms").await });
        // Let the request reach the handler, then trigger shutdown.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = Instant::now();
        token.cancel();

        let response = slow.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
        assert!(response.contains("page views = 1"));

        task.await.unwrap().unwrap();
        let drained_in = started.elapsed();
        assert!(
            drained_in < Duration::from_secs(5),
            "drain took {drained_in:?}, should track the request"
        );
    }

    /// After the drain starts, the listener no longer accepts new work.
    #[tokio::test]
    async fn no_new_connections_after_drain_starts() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, token, task) = spawn_serving(dir.path()).await;

        // Server is live first.
        let response = http_get(addr, "/hb").await;
        assert!(response.starts_with("HTTP/1.1 200"));

        token.cancel();
        task.await.unwrap().unwrap();

        let refused = tokio::net::TcpStream::connect(addr).await;
        assert!(refused.is_err(), "listener should be closed after drain");
    }
}
