//! Connection acceptor and shutdown orchestration.
//!
//! Accepts TCP connections until the shutdown signal fires, handing each one
//! to the worker pool. On shutdown the listener is dropped first so the port
//! refuses new connections, then every session is told to quit and closed,
//! and finally the pool is drained under the configured grace period.

use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::handler::handle_connection;
use crate::state::AppState;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Summary of one server shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions that were sent the quit notice.
    pub notified: usize,
    /// Session tasks that finished within the grace period.
    pub drained: usize,
    /// Session tasks aborted at the deadline.
    pub cancelled: usize,
}

/// Accept until shutdown, then run the shutdown sequence.
pub async fn run(listener: TcpListener, app: AppState) -> ShutdownReport {
    loop {
        tokio::select! {
            () = app.shutdown.triggered() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, queued = app.pool.pending(), "acceptor: connection accepted");
                    app.pool.spawn(handle_connection(app.clone(), stream, peer));
                }
                Err(e) => {
                    if app.shutdown.is_triggered() {
                        debug!(error = %e, "acceptor: accept failed after shutdown");
                        break;
                    }
                    warn!(error = %e, "acceptor: accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    drop(listener);
    let sessions = app.board.session_count().await;
    info!(sessions, "acceptor: listener closed");

    let notified = app.board.shutdown_sessions(app.manager()).await;
    let drain = app.pool.drain(app.config.drain_timeout).await;
    let report = ShutdownReport { notified, drained: drain.completed, cancelled: drain.cancelled };
    info!(notified = report.notified, drained = report.drained, cancelled = report.cancelled, "acceptor: shutdown complete");
    report
}

#[cfg(test)]
#[path = "acceptor_test.rs"]
mod tests;
