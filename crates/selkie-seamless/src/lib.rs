//! # selkie-seamless
//!
//! Zero-downtime process handoff for Selkie.
//!
//! ## Overview
//!
//! A new server instance replaces a running one without a connection-refused
//! window:
//! 1. The new process binds the listen address with `SO_REUSEPORT`, so the
//!    bind succeeds while the predecessor is still bound. During the overlap
//!    the kernel load-shares accepted connections between both processes.
//! 2. Only after its own bind succeeded does the new process read the handoff
//!    record (a pid file) and signal the predecessor to start draining. A
//!    failed newcomer therefore never kills a healthy predecessor.
//! 3. The new process rewrites the handoff record with its own pid, whether
//!    or not the signal could be delivered. A stale record is not an error.
//! 4. The old process stops accepting, drains in-flight requests up to a
//!    timeout, and exits.
//!
//! ## Signal Conventions
//!
//! - `SIGTERM` — operator-requested graceful shutdown
//! - `SIGQUIT` — handoff handshake (sent by a successor instance)
//!
//! Both converge on the same drain sequence; [`GracefulShutdown`] reports
//! which one fired.
//!
//! ## Platform
//!
//! This crate requires Unix (Linux / macOS). It will not compile on other
//! platforms. `SO_REUSEPORT` load sharing is the mechanism that makes the
//! dual-bind overlap work; on platforms without it the handoff degrades to a
//! brief real downtime.

#[cfg(not(unix))]
compile_error!("selkie-seamless requires a Unix platform (Linux or macOS)");

mod handoff;
mod listener;
mod shutdown;

pub use handoff::{take_over, HandoffError, HandoffRecord, TakeOver};
pub use listener::bind_reuseport;
pub use shutdown::{GracefulShutdown, ShutdownSignal};
