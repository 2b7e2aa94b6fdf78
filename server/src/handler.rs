//! Per-connection session handler.
//!
//! DESIGN
//! ======
//! One task per accepted connection. The handler performs the WebSocket
//! handshake, authenticates the username from the first `Join` frame, then
//! runs a select loop over four sources: the coordinator's close signal, the
//! session's outbound queue, pending join approvals, and the socket. It is the
//! only writer to its socket.
//!
//! Join approvals run inside the loop as futures rather than blocking it, so a
//! session waiting on the manager still receives broadcasts and still notices
//! a kick. Dropping the loop drops the pending decision with it.
//!
//! LIFECYCLE
//! =========
//! `Authenticating -> Active -> Closing`. A close signal (kick or shutdown)
//! flushes whatever is already queued, then sends the notice carried by the
//! signal, before the socket is released. The notice never sits in the
//! bounded queue, so a saturated session still learns why it was closed.
//! Closing always unregisters; failures there are only logged.

use std::net::SocketAddr;
use std::time::Duration;

use frames::message::{SYSCALL_JOIN, SYSCALL_KICK, SYSCALL_QUIT};
use frames::{CodecError, ErrorCode, Frame, Message, ProtocolError, decode_frame, decode_text_frame, encode_frame};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::board::RegisterError;
use crate::state::{AppState, Hangup, SessionHandle, SessionInbox};

/// Syscall for error frames not tied to a specific request.
pub const SYSCALL_ERROR: &str = "session:error";

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;
type PendingApprovals = FuturesUnordered<BoxFuture<'static, Frame>>;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticating,
    Active,
    Closing,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection error: {0}")]
    Connection(#[from] tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("unexpected message: {0}")]
    UnexpectedMessage(&'static str),
    #[error("username must not be blank")]
    BlankUsername,
    #[error("username already in use: {0}")]
    DuplicateUsername(String),
    #[error("server is shutting down")]
    ShutdownInProgress,
    #[error("no join received within {0:?}")]
    AuthTimeout(Duration),
    #[error("{0} is reserved for the manager")]
    NotManager(&'static str),
    #[error("connection closed before join")]
    Closed,
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "E_CONNECTION",
            Self::Protocol(e) => e.error_code(),
            Self::Codec(_) => "E_BAD_FRAME",
            Self::UnexpectedMessage(_) => "E_UNEXPECTED_MESSAGE",
            Self::BlankUsername => "E_BLANK_USERNAME",
            Self::DuplicateUsername(_) => "E_USERNAME_TAKEN",
            Self::ShutdownInProgress => "E_SHUTDOWN_IN_PROGRESS",
            Self::AuthTimeout(_) => "E_AUTH_TIMEOUT",
            Self::NotManager(_) => "E_NOT_MANAGER",
            Self::Closed => "E_CLOSED",
        }
    }
}

/// Result of dispatching one inbound frame.
enum Outcome {
    /// Nothing to send back.
    Continue,
    /// Send this frame to the peer only.
    Reply(Frame),
}

// =============================================================================
// ENTRY
// =============================================================================

/// Run one connection to completion. Never returns an error: every failure
/// is confined to this session and logged.
pub async fn handle_connection(app: AppState, stream: TcpStream, peer: SocketAddr) {
    let handshake = tokio::time::timeout(app.config.auth_timeout, tokio_tungstenite::accept_async(stream));
    let ws = match handshake.await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!(%peer, error = %e, "session: websocket handshake failed");
            return;
        }
        Err(_) => {
            warn!(%peer, "session: websocket handshake timed out");
            return;
        }
    };

    let mut handler = SessionHandler::new(app, peer, ws);
    let result = handler.run().await;
    handler.finish(result).await;
}

pub struct SessionHandler {
    app: AppState,
    peer: SocketAddr,
    sink: WsSink,
    source: WsSource,
    lifecycle: SessionState,
    username: Option<String>,
    session_id: Option<Uuid>,
}

impl SessionHandler {
    fn new(app: AppState, peer: SocketAddr, ws: WebSocketStream<TcpStream>) -> Self {
        let (sink, source) = ws.split();
        Self { app, peer, sink, source, lifecycle: SessionState::Authenticating, username: None, session_id: None }
    }

    async fn run(&mut self) -> Result<(), SessionError> {
        let inbox = self.authenticate().await?;
        self.lifecycle = SessionState::Active;
        self.serve(inbox).await
    }

    fn username(&self) -> &str {
        self.username.as_deref().unwrap_or("-")
    }

    fn is_manager(&self) -> bool {
        self.username.as_deref() == Some(self.app.manager())
    }
}

// =============================================================================
// AUTHENTICATING
// =============================================================================

impl SessionHandler {
    async fn authenticate(&mut self) -> Result<SessionInbox, SessionError> {
        let auth_timeout = self.app.config.auth_timeout;
        let shutdown = self.app.shutdown.clone();

        let first = tokio::select! {
            () = shutdown.triggered() => return Err(self.reject(None, SessionError::ShutdownInProgress).await),
            read = tokio::time::timeout(auth_timeout, next_frame(&mut self.source)) => read,
        };
        let frame = match first {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => return Err(SessionError::Closed),
            Ok(Err(e)) => return Err(self.reject(None, e).await),
            Err(_) => return Err(self.reject(None, SessionError::AuthTimeout(auth_timeout)).await),
        };

        let username = match Message::from_frame(&frame) {
            Ok(Message::Join { username }) => username,
            Ok(_) => return Err(self.reject(Some(&frame), SessionError::UnexpectedMessage("expected join")).await),
            Err(e) => return Err(self.reject(Some(&frame), e.into()).await),
        };
        if username.trim().is_empty() {
            return Err(self.reject(Some(&frame), SessionError::BlankUsername).await);
        }

        let (handle, inbox) = SessionHandle::channel(username.clone(), self.app.config.outbound_capacity);
        match self.app.board.register(handle).await {
            Ok(()) => {}
            Err(RegisterError::UsernameTaken(name)) => {
                info!(peer = %self.peer, username = %name, "session: username taken");
                self.send(&Message::UsernameTaken.to_frame()).await?;
                return Err(SessionError::DuplicateUsername(name));
            }
            Err(RegisterError::ShutdownInProgress) => {
                return Err(self.reject(Some(&frame), SessionError::ShutdownInProgress).await);
            }
        }

        info!(peer = %self.peer, %username, session_id = %inbox.id, "session: joined");
        self.username = Some(username);
        self.session_id = Some(inbox.id);
        Ok(inbox)
    }
}

// =============================================================================
// ACTIVE
// =============================================================================

impl SessionHandler {
    async fn serve(&mut self, mut inbox: SessionInbox) -> Result<(), SessionError> {
        let mut approvals = PendingApprovals::new();

        loop {
            tokio::select! {
                biased;
                notice = wait_closed(&mut inbox.closed) => {
                    while let Ok(frame) = inbox.frames.try_recv() {
                        self.send(&frame).await?;
                    }
                    if let Some(notice) = notice {
                        self.send(&notice).await?;
                    }
                    debug!(username = %self.username(), "session: closed by coordinator");
                    return Ok(());
                }
                Some(frame) = inbox.frames.recv() => {
                    self.send(&frame).await?;
                }
                Some(reply) = approvals.next() => {
                    self.send(&reply).await?;
                }
                incoming = next_frame(&mut self.source) => {
                    let frame = match incoming {
                        Ok(Some(frame)) => frame,
                        Ok(None) => return Ok(()),
                        Err(e @ SessionError::Connection(_)) => return Err(e),
                        Err(e) => return Err(self.reject(None, e).await),
                    };
                    match self.dispatch(inbox.id, &frame, &mut approvals).await {
                        Ok(Outcome::Continue) => {}
                        Ok(Outcome::Reply(reply)) => self.send(&reply).await?,
                        Err(e) => return Err(self.reject(Some(&frame), e).await),
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, id: Uuid, frame: &Frame, approvals: &mut PendingApprovals) -> Result<Outcome, SessionError> {
        let message = Message::from_frame(frame)?;
        debug!(username = %self.username(), syscall = %frame.syscall, "session: recv");

        match message {
            Message::Chat { text } => {
                self.app.board.broadcast_chat(&format!("{}: {text}", self.username())).await;
            }
            Message::Shape(shape) => {
                self.app.board.add_shape(shape, id).await;
            }
            Message::Clear => {
                self.app.board.clear_all(id).await;
            }
            Message::Open { shapes } => {
                self.app.board.open_board(shapes, id).await;
            }
            Message::JoinRequest { username } => {
                let gateway = self.app.approvals.clone();
                let request = frame.clone();
                approvals.push(
                    async move {
                        let approved = gateway.decide(&username).await;
                        Message::JoinResponse { approved }.reply_to(&request)
                    }
                    .boxed(),
                );
            }
            Message::Kick { username } => {
                if !self.is_manager() {
                    return Ok(Outcome::Reply(frame.error_from(&SessionError::NotManager(SYSCALL_KICK))));
                }
                self.app.board.kick(&username).await;
            }
            Message::ServerQuit => {
                if !self.is_manager() {
                    return Ok(Outcome::Reply(frame.error_from(&SessionError::NotManager(SYSCALL_QUIT))));
                }
                info!(username = %self.username(), "session: manager requested shutdown");
                self.app.shutdown.trigger();
            }
            other => {
                let reason = if other.is_server_only() { "server-only message" } else { "already joined" };
                return Err(SessionError::UnexpectedMessage(reason));
            }
        }
        Ok(Outcome::Continue)
    }
}

// =============================================================================
// CLOSING / IO
// =============================================================================

impl SessionHandler {
    async fn finish(mut self, result: Result<(), SessionError>) {
        let ended_in = std::mem::replace(&mut self.lifecycle, SessionState::Closing);

        if let Some(id) = self.session_id {
            self.app.board.unregister(id).await;
        }
        if let Err(e) = self.sink.close().await {
            debug!(peer = %self.peer, error = %e, "session: close handshake failed");
        }

        match result {
            Ok(()) => info!(peer = %self.peer, username = %self.username(), ?ended_in, "session: disconnected"),
            Err(e) => warn!(peer = %self.peer, username = %self.username(), ?ended_in, error = %e, "session: ended with error"),
        }
    }

    /// Best-effort error frame to the peer, correlated to `request` when known.
    /// Uncorrelated errors are filed under the join while authenticating.
    async fn reject(&mut self, request: Option<&Frame>, err: SessionError) -> SessionError {
        let frame = match (request, self.lifecycle) {
            (Some(req), _) => req.error_from(&err),
            (None, SessionState::Authenticating) => Frame::error_notice(SYSCALL_JOIN, &err),
            (None, SessionState::Active | SessionState::Closing) => Frame::error_notice(SYSCALL_ERROR, &err),
        };
        if let Err(e) = self.send(&frame).await {
            debug!(peer = %self.peer, error = %e, "session: could not deliver error frame");
        }
        err
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), SessionError> {
        debug!(username = %self.username(), syscall = %frame.syscall, seq = ?frame.seq, "session: send");
        self.sink.send(WsMessage::Binary(encode_frame(frame).into())).await?;
        Ok(())
    }
}

/// Next protocol frame, or `None` on a clean close. Binary frames carry
/// protobuf; text frames carry JSON.
async fn next_frame(source: &mut WsSource) -> Result<Option<Frame>, SessionError> {
    while let Some(message) = source.next().await {
        match message? {
            WsMessage::Binary(bytes) => return Ok(Some(decode_frame(&bytes)?)),
            WsMessage::Text(text) => return Ok(Some(decode_text_frame(text.as_str())?)),
            WsMessage::Close(_) => return Ok(None),
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
        }
    }
    Ok(None)
}

/// Resolve once the coordinator asks this session to hang up, with the
/// notice to send last. A dropped handle counts as a hangup without notice.
async fn wait_closed(closed: &mut watch::Receiver<Hangup>) -> Option<Frame> {
    let hangup = closed.wait_for(Hangup::is_requested).await.ok()?;
    hangup.final_frame().cloned()
}

#[cfg(test)]
#[path = "handler_test.rs"]
mod tests;
