//! Interactive terminal client.
//!
//! One select loop multiplexes terminal input, server frames, and (for the
//! manager) join approval prompts. The client keeps its own mirror of the
//! board: shapes it draws are applied locally because the server never echoes
//! them back, and peers' shapes arrive as notices.

use std::collections::VecDeque;

use frames::message::SYSCALL_JOIN;
use frames::{Color, Frame, Message, Shape, Status, decode_frame, decode_text_frame, encode_frame};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use server::{JoinApprovalGateway, JoinPrompt, JoinPrompts};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::CliError;
use crate::commands::{self, Command, HELP};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    pub username: String,
}

impl Endpoint {
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}:{}/", self.address, self.port)
    }
}

/// Why an interactive session ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Quit,
    ServerQuit,
    Kicked,
    Disconnected,
}

pub enum Role {
    /// The host's own session. Answers join prompts from the local server.
    Manager { approvals: JoinApprovalGateway, prompts: Option<JoinPrompts> },
    Member,
}

// =============================================================================
// BOARD MIRROR
// =============================================================================

/// Local copy of the shared board.
#[derive(Debug, Default)]
pub struct BoardMirror {
    shapes: Vec<Shape>,
}

impl BoardMirror {
    /// Apply a board message. Returns `false` for messages that do not touch
    /// the board.
    pub fn apply(&mut self, message: &Message) -> bool {
        match message {
            Message::Shape(shape) => self.shapes.push(shape.clone()),
            Message::Clear => self.shapes.clear(),
            Message::Open { shapes } => self.shapes.clone_from(shapes),
            _ => return false,
        }
        true
    }

    #[must_use]
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }
}

// =============================================================================
// PROMPT QUEUE
// =============================================================================

/// Join requests waiting for the manager, oldest first.
#[derive(Debug, Default)]
pub struct PromptQueue {
    waiting: VecDeque<JoinPrompt>,
}

impl PromptQueue {
    pub fn push(&mut self, prompt: JoinPrompt) {
        self.waiting.push_back(prompt);
    }

    /// Take the oldest request, or the oldest one from `username`.
    pub fn take(&mut self, username: Option<&str>) -> Option<JoinPrompt> {
        let index = match username {
            None => 0,
            Some(name) => self.waiting.iter().position(|p| p.username == name)?,
        };
        self.waiting.remove(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct Client {
    username: String,
    role: Role,
    sink: SplitSink<WsClient, WsMessage>,
    stream: SplitStream<WsClient>,
    board: BoardMirror,
    users: Vec<String>,
    pen: Color,
    prompts: PromptQueue,
}

impl Client {
    pub async fn connect(endpoint: &Endpoint, role: Role) -> Result<Self, CliError> {
        let url = endpoint.url();
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|source| CliError::Connect { url, source: Box::new(source) })?;
        let (sink, stream) = ws.split();
        Ok(Self {
            username: endpoint.username.clone(),
            role,
            sink,
            stream,
            board: BoardMirror::default(),
            users: Vec::new(),
            pen: Color::BLACK,
            prompts: PromptQueue::default(),
        })
    }

    /// Announce the username. Members also ask the manager to be let in.
    pub async fn join(&mut self) -> Result<(), CliError> {
        self.send(&Message::Join { username: self.username.clone() }).await?;
        if matches!(self.role, Role::Member) {
            self.send(&Message::JoinRequest { username: self.username.clone() }).await?;
        }
        Ok(())
    }

    fn is_manager(&self) -> bool {
        matches!(self.role, Role::Manager { .. })
    }

    pub async fn run_stdin(&mut self) -> Result<SessionEnd, CliError> {
        self.run(BufReader::new(tokio::io::stdin())).await
    }

    /// Drive the session until it ends. End of input counts as `/quit`.
    pub async fn run<R>(&mut self, input: R) -> Result<SessionEnd, CliError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        return self.quit().await;
                    };
                    if let Some(end) = self.on_input(&line).await? {
                        return Ok(end);
                    }
                }
                incoming = self.stream.next() => {
                    let frame = match incoming {
                        Some(Ok(WsMessage::Binary(bytes))) => decode_frame(&bytes)?,
                        Some(Ok(WsMessage::Text(text))) => decode_text_frame(text.as_str())?,
                        Some(Ok(WsMessage::Close(_))) | None => return Ok(SessionEnd::Disconnected),
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(CliError::Ws(Box::new(e))),
                    };
                    if let Some(end) = self.on_frame(&frame)? {
                        return Ok(end);
                    }
                }
                Some(prompt) = next_prompt(&mut self.role) => {
                    println!("{} wants to share your whiteboard. Approve? (/approve or /deny)", prompt.username);
                    self.prompts.push(prompt);
                    if self.prompts.len() > 1 {
                        println!("{} join requests waiting", self.prompts.len());
                    }
                }
                _ = tokio::signal::ctrl_c() => return self.quit().await,
            }
        }
    }

    async fn on_input(&mut self, line: &str) -> Result<Option<SessionEnd>, CliError> {
        let command = match commands::parse(line, self.pen) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(None),
            Err(e) => {
                println!("{e}");
                return Ok(None);
            }
        };

        match command {
            Command::Chat(text) => self.send(&Message::Chat { text }).await?,
            Command::Draw(shape) => self.publish(Message::Shape(shape)).await?,
            Command::Clear => self.publish(Message::Clear).await?,
            Command::Open(shapes) => self.publish(Message::Open { shapes }).await?,
            Command::Pen(color) => {
                self.pen = color;
                println!("pen color is now {color}");
            }
            Command::Users => println!("users: {}", self.users.join(", ")),
            Command::Board => {
                if self.board.shapes().is_empty() {
                    println!("the board is empty");
                }
                for (i, shape) in self.board.shapes().iter().enumerate() {
                    println!("{:>3}. {shape}", i + 1);
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => return self.quit().await.map(Some),
            Command::Kick(username) => {
                if self.is_manager() {
                    self.send(&Message::Kick { username }).await?;
                } else {
                    println!("only the manager can kick users");
                }
            }
            Command::Approve(username) => self.answer(username.as_deref(), true),
            Command::Deny(username) => self.answer(username.as_deref(), false),
        }
        Ok(None)
    }

    fn on_frame(&mut self, frame: &Frame) -> Result<Option<SessionEnd>, CliError> {
        if frame.status == Status::Error {
            let message = frame.error_message().unwrap_or("unknown error").to_owned();
            if frame.syscall == SYSCALL_JOIN {
                return Err(CliError::Refused { syscall: frame.syscall.clone(), message });
            }
            println!("server: {message}");
            return Ok(None);
        }

        let message = match Message::from_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                debug!(syscall = %frame.syscall, error = %e, "client: ignoring frame");
                return Ok(None);
            }
        };
        let from = frame.from.as_deref().unwrap_or("someone");

        if self.board.apply(&message) {
            match &message {
                Message::Shape(shape) => println!("{from} drew {shape}"),
                Message::Clear => println!("{from} cleared the board"),
                _ => println!("{from} opened a board with {} shapes", self.board.shapes().len()),
            }
            return Ok(None);
        }

        match message {
            Message::UsernameTaken => return Err(CliError::UsernameTaken(self.username.clone())),
            Message::UserList { usernames } => {
                println!("users: {}", usernames.join(", "));
                self.users = usernames;
            }
            Message::Chat { text } => println!("{text}"),
            Message::JoinResponse { approved: true } => println!("the manager let you in"),
            Message::JoinResponse { approved: false } => return Err(CliError::Denied),
            Message::Kick { username } if username == self.username => {
                println!("You have been kicked out by the manager.");
                return Ok(Some(SessionEnd::Kicked));
            }
            Message::ServerQuit => {
                println!("The manager has closed the whiteboard.");
                return Ok(Some(SessionEnd::ServerQuit));
            }
            _ => {}
        }
        Ok(None)
    }

    /// Apply a board change locally, then send it.
    async fn publish(&mut self, message: Message) -> Result<(), CliError> {
        self.board.apply(&message);
        self.send(&message).await
    }

    fn answer(&mut self, username: Option<&str>, approved: bool) {
        let Role::Manager { approvals, .. } = &self.role else {
            println!("only the manager can answer join requests");
            return;
        };
        if self.prompts.is_empty() {
            println!("no pending join requests");
            return;
        }
        let Some(prompt) = self.prompts.take(username) else {
            println!("no pending join request from {}", username.unwrap_or_default());
            return;
        };

        if approvals.resolve(prompt.id, approved) {
            println!("{} {}", if approved { "approved" } else { "denied" }, prompt.username);
        } else {
            println!("the request from {} already expired", prompt.username);
        }
    }

    /// The manager's quit closes the whiteboard for everyone.
    async fn quit(&mut self) -> Result<SessionEnd, CliError> {
        if self.is_manager() {
            self.send(&Message::ServerQuit).await?;
        }
        let _ = self.sink.close().await;
        Ok(SessionEnd::Quit)
    }

    async fn send(&mut self, message: &Message) -> Result<(), CliError> {
        let frame = message.to_frame();
        self.sink
            .send(WsMessage::Binary(encode_frame(&frame).into()))
            .await
            .map_err(|e| CliError::Ws(Box::new(e)))
    }
}

async fn next_prompt(role: &mut Role) -> Option<JoinPrompt> {
    match role {
        Role::Manager { prompts: Some(prompts), .. } => prompts.recv().await,
        Role::Manager { prompts: None, .. } | Role::Member => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
