//! Typed protocol catalogue layered over [`Frame`].
//!
//! DESIGN
//! ======
//! Every protocol message maps to exactly one `(syscall, status)` pair. The
//! envelope stays generic so the codec never changes when the catalogue does;
//! this module is the only place that knows payload field names.
//!
//! `JoinResponse` is the one reply in the catalogue: it reuses the
//! `join:request` syscall with `Done` status and points at the request through
//! `parent_id`. Roster updates travel as `session:users`, never as chat text.

use serde_json::{Map, Value};

use crate::shape::Shape;
use crate::{Frame, Status};

pub const SYSCALL_JOIN: &str = "session:join";
pub const SYSCALL_USERNAME_TAKEN: &str = "session:username_taken";
pub const SYSCALL_USERS: &str = "session:users";
pub const SYSCALL_KICK: &str = "session:kick";
pub const SYSCALL_CHAT: &str = "chat:text";
pub const SYSCALL_SHAPE: &str = "board:shape";
pub const SYSCALL_CLEAR: &str = "board:clear";
pub const SYSCALL_OPEN: &str = "board:open";
pub const SYSCALL_JOIN_REQUEST: &str = "join:request";
pub const SYSCALL_QUIT: &str = "server:quit";

/// Failure to interpret a frame as a protocol message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown message {syscall} ({status:?})")]
    Unknown { syscall: String, status: Status },
    #[error("{syscall}: missing field `{field}`")]
    MissingField { syscall: &'static str, field: &'static str },
    #[error("{syscall}: invalid field `{field}`: {source}")]
    InvalidField {
        syscall: &'static str,
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl crate::ErrorCode for ProtocolError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unknown { .. } => "E_UNKNOWN_MESSAGE",
            Self::MissingField { .. } | Self::InvalidField { .. } => "E_BAD_PAYLOAD",
        }
    }
}

/// The protocol catalogue.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// First message on every connection.
    Join { username: String },
    /// The requested username already belongs to an active session.
    UsernameTaken,
    /// Ordered list of active usernames, sent after every join or leave.
    UserList { usernames: Vec<String> },
    /// Chat text. Inbound it is the raw text; outbound the server has
    /// already prefixed the sender (`"alice: hi"`).
    Chat { text: String },
    Shape(Shape),
    Clear,
    /// Replace the board with this ordered list.
    Open { shapes: Vec<Shape> },
    JoinRequest { username: String },
    JoinResponse { approved: bool },
    Kick { username: String },
    ServerQuit,
}

impl Message {
    /// Wire syscall for this message.
    #[must_use]
    pub fn syscall(&self) -> &'static str {
        match self {
            Self::Join { .. } => SYSCALL_JOIN,
            Self::UsernameTaken => SYSCALL_USERNAME_TAKEN,
            Self::UserList { .. } => SYSCALL_USERS,
            Self::Chat { .. } => SYSCALL_CHAT,
            Self::Shape(_) => SYSCALL_SHAPE,
            Self::Clear => SYSCALL_CLEAR,
            Self::Open { .. } => SYSCALL_OPEN,
            Self::JoinRequest { .. } | Self::JoinResponse { .. } => SYSCALL_JOIN_REQUEST,
            Self::Kick { .. } => SYSCALL_KICK,
            Self::ServerQuit => SYSCALL_QUIT,
        }
    }

    /// Messages only the server may originate.
    #[must_use]
    pub fn is_server_only(&self) -> bool {
        matches!(self, Self::UsernameTaken | Self::UserList { .. } | Self::JoinResponse { .. })
    }

    /// Payload fields for this message.
    #[must_use]
    pub fn to_data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        match self {
            Self::Join { username } | Self::JoinRequest { username } | Self::Kick { username } => {
                data.insert("username".into(), Value::String(username.clone()));
            }
            Self::UserList { usernames } => {
                data.insert(
                    "usernames".into(),
                    Value::Array(usernames.iter().cloned().map(Value::String).collect()),
                );
            }
            Self::Chat { text } => {
                data.insert("text".into(), Value::String(text.clone()));
            }
            Self::Shape(shape) => {
                data.insert("shape".into(), serde_json::to_value(shape).unwrap_or_default());
            }
            Self::Open { shapes } => {
                data.insert("shapes".into(), serde_json::to_value(shapes).unwrap_or_default());
            }
            Self::JoinResponse { approved } => {
                data.insert("approved".into(), Value::Bool(*approved));
            }
            Self::UsernameTaken | Self::Clear | Self::ServerQuit => {}
        }
        data
    }

    /// Build a fresh request frame. `JoinResponse` should normally be built
    /// with [`Message::reply_to`] so it correlates to its request.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        let mut frame = Frame::request(self.syscall(), self.to_data());
        if matches!(self, Self::JoinResponse { .. }) {
            frame.status = Status::Done;
        }
        frame
    }

    /// Build a `Done` reply to `req` carrying this message's payload.
    #[must_use]
    pub fn reply_to(&self, req: &Frame) -> Frame {
        let mut frame = req.done_with(self.to_data());
        frame.syscall = self.syscall().to_owned();
        frame
    }

    /// Interpret a frame as a protocol message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] for unknown `(syscall, status)` pairs and for
    /// payloads with missing or mistyped fields. Error frames are never
    /// messages; callers inspect them with [`Frame::error_code`].
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        match (frame.syscall.as_str(), frame.status) {
            (SYSCALL_JOIN, Status::Request) => Ok(Self::Join { username: field(frame, SYSCALL_JOIN, "username")? }),
            (SYSCALL_USERNAME_TAKEN, Status::Request) => Ok(Self::UsernameTaken),
            (SYSCALL_USERS, Status::Request) => Ok(Self::UserList { usernames: field(frame, SYSCALL_USERS, "usernames")? }),
            (SYSCALL_CHAT, Status::Request) => Ok(Self::Chat { text: field(frame, SYSCALL_CHAT, "text")? }),
            (SYSCALL_SHAPE, Status::Request) => Ok(Self::Shape(field(frame, SYSCALL_SHAPE, "shape")?)),
            (SYSCALL_CLEAR, Status::Request) => Ok(Self::Clear),
            (SYSCALL_OPEN, Status::Request) => Ok(Self::Open { shapes: field(frame, SYSCALL_OPEN, "shapes")? }),
            (SYSCALL_JOIN_REQUEST, Status::Request) => {
                Ok(Self::JoinRequest { username: field(frame, SYSCALL_JOIN_REQUEST, "username")? })
            }
            (SYSCALL_JOIN_REQUEST, Status::Done) => {
                Ok(Self::JoinResponse { approved: field(frame, SYSCALL_JOIN_REQUEST, "approved")? })
            }
            (SYSCALL_KICK, Status::Request) => Ok(Self::Kick { username: field(frame, SYSCALL_KICK, "username")? }),
            (SYSCALL_QUIT, Status::Request) => Ok(Self::ServerQuit),
            _ => Err(ProtocolError::Unknown { syscall: frame.syscall.clone(), status: frame.status }),
        }
    }
}

fn field<T: serde::de::DeserializeOwned>(
    frame: &Frame,
    syscall: &'static str,
    name: &'static str,
) -> Result<T, ProtocolError> {
    let Some(value) = frame.field(name) else {
        return Err(ProtocolError::MissingField { syscall, field: name });
    };
    serde_json::from_value(value.clone()).map_err(|source| ProtocolError::InvalidField { syscall, field: name, source })
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
