//! Board coordinator: the single authority over shared state.
//!
//! DESIGN
//! ======
//! The shape history and the session registry live together in one
//! [`BoardState`] behind a single async mutex. Every operation takes the lock,
//! mutates, picks its recipients, and enqueues onto their outbound queues
//! before releasing it. Enqueueing never waits (see
//! [`SessionHandle::deliver`]), so a stalled peer cannot hold up the board,
//! and since the enqueue happens under the lock every session observes
//! fan-out frames in the same order the board applied them. Each fan-out
//! frame carries the next board sequence number.
//!
//! Kick and quit notices are handed over with the close request instead of
//! the outbound queue, so they survive a saturated queue and arrive after
//! everything already queued.
//!
//! Mutations from a session id that is no longer registered (kicked, or
//! racing shutdown) are ignored.

use std::sync::Arc;

use frames::{ErrorCode, Frame, Message, Shape};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::state::{BoardState, SessionHandle};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("username already in use: {0}")]
    UsernameTaken(String),
    #[error("server is shutting down")]
    ShutdownInProgress,
}

impl ErrorCode for RegisterError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UsernameTaken(_) => "E_USERNAME_TAKEN",
            Self::ShutdownInProgress => "E_SHUTDOWN_IN_PROGRESS",
        }
    }
}

#[derive(Clone, Default)]
pub struct BoardCoordinator {
    state: Arc<Mutex<BoardState>>,
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

impl BoardCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. On success everyone, the newcomer included, gets
    /// the updated user list, and the newcomer alone gets the current board.
    ///
    /// # Errors
    ///
    /// [`RegisterError::UsernameTaken`] when the name belongs to an active
    /// session, [`RegisterError::ShutdownInProgress`] once shutdown began.
    /// Either way nothing is changed.
    pub async fn register(&self, handle: SessionHandle) -> Result<(), RegisterError> {
        let mut board = self.state.lock().await;
        if board.closing {
            return Err(RegisterError::ShutdownInProgress);
        }

        let id = handle.id();
        let username = handle.username().to_owned();
        if let Err(rejected) = board.sessions.insert(handle) {
            return Err(RegisterError::UsernameTaken(rejected.username().to_owned()));
        }
        info!(%username, session_id = %id, sessions = board.sessions.len(), "board: session registered");

        push_user_list(&mut board);
        if !board.shapes.is_empty() {
            let history = Message::Open { shapes: board.shapes.clone() }.to_frame().with_from(SERVER);
            let frame = history.with_seq(board.next_seq());
            if let Some(session) = board.sessions.get(id) {
                session.deliver(frame);
            }
        }
        Ok(())
    }

    /// Remove a session by id. Returns `false` if it was already gone (kicked
    /// or swept by shutdown); the user list is only rebroadcast on removal.
    pub async fn unregister(&self, id: Uuid) -> bool {
        let mut board = self.state.lock().await;
        let Some(handle) = board.sessions.remove_id(id) else {
            return false;
        };
        info!(username = %handle.username(), session_id = %id, "board: session unregistered");
        push_user_list(&mut board);
        true
    }

    /// Evict `username`: it gets a kick notice, its connection is closed, and
    /// the remaining sessions get the new user list. Unknown names are a no-op.
    pub async fn kick(&self, username: &str) -> bool {
        let mut board = self.state.lock().await;
        let Some(handle) = board.sessions.remove_username(username) else {
            debug!(%username, "board: kick for absent user");
            return false;
        };

        let notice = Message::Kick { username: username.to_owned() }.to_frame().with_from(SERVER);
        let notified = handle.close_with(notice.with_seq(board.next_seq()));
        info!(%username, notified, "board: session kicked");

        push_user_list(&mut board);
        true
    }

    /// Stop admitting sessions, send the quit notice to everyone except
    /// `manager`, and close every connection. Returns how many sessions were
    /// notified. Calling it again is harmless.
    pub async fn shutdown_sessions(&self, manager: &str) -> usize {
        let mut board = self.state.lock().await;
        board.closing = true;

        let sessions = board.sessions.drain();
        if sessions.is_empty() {
            return 0;
        }

        let notice = Message::ServerQuit.to_frame().with_from(SERVER).with_seq(board.next_seq());
        let mut notified = 0;
        for session in &sessions {
            if session.username() == manager {
                session.close();
            } else if session.close_with(notice.clone()) {
                notified += 1;
            }
        }
        info!(notified, closed = sessions.len(), "board: all sessions closed for shutdown");
        notified
    }
}

// =============================================================================
// BOARD OPERATIONS
// =============================================================================

impl BoardCoordinator {
    /// Append a shape and send it to everyone except the sender.
    pub async fn add_shape(&self, shape: Shape, sender: Uuid) -> bool {
        let mut board = self.state.lock().await;
        let Some(from) = sender_name(&board, sender) else {
            return false;
        };
        let frame = Message::Shape(shape.clone()).to_frame().with_from(from);
        board.shapes.push(shape);
        fan_out(&mut board, frame, Some(sender));
        true
    }

    /// Empty the board and send a clear notice to everyone except the sender.
    pub async fn clear_all(&self, sender: Uuid) -> bool {
        let mut board = self.state.lock().await;
        let Some(from) = sender_name(&board, sender) else {
            return false;
        };
        apply_clear(&mut board, from, sender);
        true
    }

    /// Append `shapes` in order and send the resulting board to everyone
    /// except the sender.
    pub async fn replace_shapes(&self, shapes: Vec<Shape>, sender: Uuid) -> bool {
        let mut board = self.state.lock().await;
        let Some(from) = sender_name(&board, sender) else {
            return false;
        };
        apply_replace(&mut board, shapes, from, sender);
        true
    }

    /// Clear then replace in one critical section, so no other mutation can
    /// land between the two. Peers still see a clear notice then the board.
    pub async fn open_board(&self, shapes: Vec<Shape>, sender: Uuid) -> bool {
        let mut board = self.state.lock().await;
        let Some(from) = sender_name(&board, sender) else {
            return false;
        };
        apply_clear(&mut board, from.clone(), sender);
        apply_replace(&mut board, shapes, from, sender);
        true
    }

    /// Send chat text to every session, the originator included.
    pub async fn broadcast_chat(&self, text: &str) {
        let mut board = self.state.lock().await;
        let frame = Message::Chat { text: text.to_owned() }.to_frame();
        fan_out(&mut board, frame, None);
    }

    /// Active usernames in join order.
    pub async fn user_list_snapshot(&self) -> Vec<String> {
        self.state.lock().await.sessions.usernames()
    }

    /// Current board, oldest shape first.
    pub async fn shapes(&self) -> Vec<Shape> {
        self.state.lock().await.shapes.clone()
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// `from` label on frames the board originates itself.
const SERVER: &str = "server";

fn sender_name(board: &BoardState, sender: Uuid) -> Option<String> {
    let name = board.sessions.get(sender).map(|s| s.username().to_owned());
    if name.is_none() {
        debug!(session_id = %sender, "board: ignoring mutation from unregistered session");
    }
    name
}

fn apply_clear(board: &mut BoardState, from: String, sender: Uuid) {
    board.shapes.clear();
    fan_out(board, Message::Clear.to_frame().with_from(from), Some(sender));
}

fn apply_replace(board: &mut BoardState, shapes: Vec<Shape>, from: String, sender: Uuid) {
    board.shapes.extend(shapes);
    let frame = Message::Open { shapes: board.shapes.clone() }.to_frame().with_from(from);
    fan_out(board, frame, Some(sender));
}

fn push_user_list(board: &mut BoardState) {
    let frame = Message::UserList { usernames: board.sessions.usernames() }.to_frame().with_from(SERVER);
    fan_out(board, frame, None);
}

/// Stamp `frame` with the next sequence number and enqueue it for every
/// session except `except`.
fn fan_out(board: &mut BoardState, frame: Frame, except: Option<Uuid>) {
    let frame = frame.with_seq(board.next_seq());
    let mut delivered = 0usize;
    for session in board.sessions.iter().filter(|s| Some(s.id()) != except) {
        if session.deliver(frame.clone()) {
            delivered += 1;
        }
    }
    debug!(syscall = %frame.syscall, seq = ?frame.seq, delivered, "board: fan-out");
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
