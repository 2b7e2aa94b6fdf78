//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is cloned into every session task. It holds the configuration,
//! the board coordinator (shape history plus session registry behind one
//! mutex), the join approval gateway, the shutdown latch, and the worker pool.
//!
//! Each registered session is represented by a [`SessionHandle`]: the sending
//! half of its bounded outbound queue and a hangup flag. The session task owns
//! the matching [`SessionInbox`] and is the only place that touches its socket.
//!
//! Terminal notices (kick, server quit) ride on the hangup flag rather than
//! the queue, so a saturated queue can drop broadcasts but never the notice
//! that explains why the connection is closing.

use std::sync::Arc;

use frames::{Frame, Shape};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::pool::SessionPool;
use crate::services::approval::JoinApprovalGateway;
use crate::services::board::BoardCoordinator;
use crate::shutdown::ShutdownSignal;

// =============================================================================
// SESSION HANDLE
// =============================================================================

/// Coordinator-side view of one registered session.
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    username: String,
    outbound: mpsc::Sender<Frame>,
    close: watch::Sender<Hangup>,
}

/// Close flag carried from the coordinator to a session task.
#[derive(Debug, Clone, Default)]
pub enum Hangup {
    #[default]
    Open,
    /// Flush the queue, send the final frame if there is one, then close.
    Requested(Option<Frame>),
}

impl Hangup {
    #[must_use]
    pub fn is_requested(&self) -> bool {
        matches!(self, Self::Requested(_))
    }

    #[must_use]
    pub fn final_frame(&self) -> Option<&Frame> {
        match self {
            Self::Requested(frame) => frame.as_ref(),
            Self::Open => None,
        }
    }
}

/// Session-side receivers paired with a [`SessionHandle`].
#[derive(Debug)]
pub struct SessionInbox {
    pub id: Uuid,
    pub frames: mpsc::Receiver<Frame>,
    pub closed: watch::Receiver<Hangup>,
}

impl SessionHandle {
    /// Create a handle and its inbox. `capacity` bounds the outbound queue.
    pub fn channel(username: impl Into<String>, capacity: usize) -> (Self, SessionInbox) {
        let id = Uuid::new_v4();
        let (outbound, frames) = mpsc::channel(capacity.max(1));
        let (close, closed) = watch::channel(Hangup::Open);
        (Self { id, username: username.into(), outbound, close }, SessionInbox { id, frames, closed })
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Enqueue without waiting. A full or closed queue drops this one frame.
    pub fn deliver(&self, frame: Frame) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                warn!(username = %self.username, syscall = %frame.syscall, "session: outbound queue full; dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(frame)) => {
                debug!(username = %self.username, syscall = %frame.syscall, "session: outbound queue closed");
                false
            }
        }
    }

    /// Ask the session task to flush its queue and hang up.
    pub fn close(&self) {
        self.close.send_replace(Hangup::Requested(None));
    }

    /// Like [`close`](Self::close), with `notice` sent after the flush. The
    /// notice bypasses the bounded queue. Returns `false` if the session task
    /// is already gone.
    pub fn close_with(&self, notice: Frame) -> bool {
        self.close.send_replace(Hangup::Requested(Some(notice)));
        !self.close.is_closed()
    }
}

// =============================================================================
// SESSION REGISTRY
// =============================================================================

/// Active sessions in join order. Usernames are unique.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Vec<SessionHandle>,
}

impl SessionRegistry {
    #[must_use]
    pub fn contains(&self, username: &str) -> bool {
        self.sessions.iter().any(|s| s.username == username)
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&SessionHandle> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// Append `handle`, or hand it back if its username is already taken.
    pub fn insert(&mut self, handle: SessionHandle) -> Result<(), SessionHandle> {
        if self.contains(&handle.username) {
            return Err(handle);
        }
        self.sessions.push(handle);
        Ok(())
    }

    pub fn remove_id(&mut self, id: Uuid) -> Option<SessionHandle> {
        let index = self.sessions.iter().position(|s| s.id == id)?;
        Some(self.sessions.remove(index))
    }

    pub fn remove_username(&mut self, username: &str) -> Option<SessionHandle> {
        let index = self.sessions.iter().position(|s| s.username == username)?;
        Some(self.sessions.remove(index))
    }

    /// Remove every session, oldest first.
    pub fn drain(&mut self) -> Vec<SessionHandle> {
        std::mem::take(&mut self.sessions)
    }

    #[must_use]
    pub fn usernames(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.username.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionHandle> {
        self.sessions.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// =============================================================================
// BOARD STATE
// =============================================================================

/// Everything guarded by the coordinator lock.
#[derive(Debug, Default)]
pub struct BoardState {
    /// Draw order, oldest first.
    pub shapes: Vec<Shape>,
    pub sessions: SessionRegistry,
    /// Last fan-out sequence stamp handed out.
    pub seq: u64,
    /// Set once shutdown has begun. Registration is refused from then on.
    pub closing: bool,
}

impl BoardState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

// =============================================================================
// APP STATE
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub board: BoardCoordinator,
    pub approvals: JoinApprovalGateway,
    pub shutdown: ShutdownSignal,
    pub pool: Arc<SessionPool>,
}

impl AppState {
    #[must_use]
    pub fn new(config: ServerConfig, approvals: JoinApprovalGateway) -> Self {
        let pool = Arc::new(SessionPool::new(config.max_sessions));
        Self {
            config: Arc::new(config),
            board: BoardCoordinator::new(),
            approvals,
            shutdown: ShutdownSignal::new(),
            pool,
        }
    }

    /// The configured manager username.
    #[must_use]
    pub fn manager(&self) -> &str {
        &self.config.manager
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
