//! One-shot shutdown trigger.
//!
//! Joins the operator path (`SIGTERM`) and the handoff handshake path
//! (`SIGQUIT` from a successor) into a single event. Whichever fires first
//! wins; the trigger is consumed exactly once and later signals are ignored.
//!
//! The trigger deliberately does not cancel the stop token itself: the drain
//! driver runs a fixed sequence (flush replication, then stop accepting,
//! then wait for in-flight work) and cancels the token at the
//! stop-accepting step.

use std::io;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Which path triggered the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// `SIGTERM` — operator or process manager requested shutdown.
    Term,
    /// `SIGQUIT` — a successor instance bound the address and asked us to
    /// drain.
    Handoff,
}

/// Watches for shutdown signals and hands out the [`CancellationToken`] that
/// serve loops select on.
pub struct GracefulShutdown {
    token: CancellationToken,
    term: Signal,
    quit: Signal,
}

impl GracefulShutdown {
    /// Register the signal handlers. Registration failure is a startup
    /// error, not something to discover at shutdown time.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            token: CancellationToken::new(),
            term: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    /// Token the serve loop watches. Cancelled by the drain driver, not by
    /// the signal itself.
    pub fn stop_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Block until the first shutdown signal and report which path fired.
    /// Consuming `self` makes the trigger one-shot.
    pub async fn triggered(mut self) -> ShutdownSignal {
        let which = tokio::select! {
            _ = self.term.recv() => ShutdownSignal::Term,
            _ = self.quit.recv() => ShutdownSignal::Handoff,
        };

        info!(signal = ?which, "Shutdown triggered");
        which
    }
}
