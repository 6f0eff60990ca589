//! Message protocol definitions
//!
//! Typed views over frames. Requests (`ClientMessage`) and notifications
//! (`ServerMessage`) are separate types even where they share an opcode:
//! MESSAGE (0x12) is `ClientMessage::SendMessage` inbound and
//! `ServerMessage::DeliverMessage` outbound.
//!
//! String fields are `len:1` followed by `len` raw bytes of UTF-8.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::Frame;
use crate::error::{AppError, ProtocolError};

/// Status byte leading every generic response
pub const STATUS_OK: u8 = 0x00;
pub const STATUS_ERROR: u8 = 0x01;

/// Wire opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Join = 0x03,
    Leave = 0x06,
    ListRooms = 0x09,
    ListUsers = 0x0c,
    Nick = 0x0f,
    /// Direct message, both directions
    Message = 0x12,
    Heartbeat = 0x13,
    NoCommand = 0x15,
    /// Generic server response (server → client only)
    Response = 0x9a,
    SortingHat = 0x9b,
}

impl Opcode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x03 => Some(Opcode::Join),
            0x06 => Some(Opcode::Leave),
            0x09 => Some(Opcode::ListRooms),
            0x0c => Some(Opcode::ListUsers),
            0x0f => Some(Opcode::Nick),
            0x12 => Some(Opcode::Message),
            0x13 => Some(Opcode::Heartbeat),
            0x15 => Some(Opcode::NoCommand),
            0x9a => Some(Opcode::Response),
            0x9b => Some(Opcode::SortingHat),
            _ => None,
        }
    }
}

/// Client → Server message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Join (creating if needed) a room
    Join { room: String, password: Bytes },
    /// Leave the current room, or disconnect when not in one
    Leave,
    /// List handles visible to the caller
    ListUsers,
    /// List every existing room
    ListRooms,
    /// Relay a direct message to another handle
    SendMessage { target: String, message: String },
    /// Change handle
    Nick { name: String },
    /// Plain text typed without a command
    NoCommand,
    /// Handshake: ask for a default handle
    SortingHat,
    /// Keep-alive, never answered
    Heartbeat,
}

impl ClientMessage {
    /// Interpret a frame received from a client
    ///
    /// `Ok(None)` means the payload was too short for its declared field
    /// lengths; such frames are dropped without a reply.
    pub fn decode(frame: &Frame) -> Result<Option<Self>, ProtocolError> {
        let Some(opcode) = Opcode::from_u8(frame.opcode) else {
            return Err(ProtocolError::UnknownOpcode(frame.opcode));
        };

        let mut fields = Fields::new(&frame.payload);
        let msg = match opcode {
            Opcode::Join => {
                let Some(room) = fields.str8() else {
                    return Ok(None);
                };
                let Some(password) = fields.str8() else {
                    return Ok(None);
                };
                ClientMessage::Join {
                    room: text(room)?,
                    password: Bytes::copy_from_slice(password),
                }
            }
            Opcode::Leave => ClientMessage::Leave,
            Opcode::ListUsers => ClientMessage::ListUsers,
            Opcode::ListRooms => ClientMessage::ListRooms,
            Opcode::Message => {
                let Some(target) = fields.str8() else {
                    return Ok(None);
                };
                let Some(declared) = fields.u16() else {
                    return Ok(None);
                };
                let body = fields.rest();
                if body.len() > usize::from(u16::MAX) {
                    return Err(ProtocolError::MessageTooLong(body.len()));
                }
                let Some(message) = body.get(..usize::from(declared)) else {
                    return Ok(None);
                };
                ClientMessage::SendMessage {
                    target: text(target)?,
                    message: text(message)?,
                }
            }
            Opcode::Nick => {
                let Some(name) = fields.str8() else {
                    return Ok(None);
                };
                ClientMessage::Nick { name: text(name)? }
            }
            Opcode::NoCommand => ClientMessage::NoCommand,
            Opcode::SortingHat => ClientMessage::SortingHat,
            Opcode::Heartbeat => ClientMessage::Heartbeat,
            Opcode::Response => return Err(ProtocolError::UnknownOpcode(frame.opcode)),
        };

        Ok(Some(msg))
    }
}

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Status 0x00 response with an optional success payload
    Ok { payload: Bytes },
    /// Status 0x01 response with a human-readable message
    Error { message: String },
    /// Direct message delivered to its recipient
    DeliverMessage { sender: String, message: String },
}

impl ServerMessage {
    /// Bare success response
    pub fn ok() -> Self {
        ServerMessage::Ok {
            payload: Bytes::new(),
        }
    }

    /// Success response carrying a handle
    pub fn handle(name: &str) -> Self {
        ServerMessage::Ok {
            payload: Bytes::copy_from_slice(name.as_bytes()),
        }
    }

    /// Success response carrying a sequence of `len:1, name:len` entries
    pub fn name_list<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut payload = BytesMut::new();
        for name in names {
            put_str8(&mut payload, name);
        }
        ServerMessage::Ok {
            payload: payload.freeze(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn into_frame(self) -> Frame {
        match self {
            ServerMessage::Ok { payload } => {
                let mut buf = BytesMut::with_capacity(1 + payload.len());
                buf.put_u8(STATUS_OK);
                buf.put_slice(&payload);
                Frame::new(Opcode::Response as u8, buf.freeze())
            }
            ServerMessage::Error { message } => {
                let mut buf = BytesMut::with_capacity(1 + message.len());
                buf.put_u8(STATUS_ERROR);
                buf.put_slice(message.as_bytes());
                Frame::new(Opcode::Response as u8, buf.freeze())
            }
            ServerMessage::DeliverMessage { sender, message } => {
                let mut buf = BytesMut::with_capacity(3 + sender.len() + message.len());
                put_str8(&mut buf, &sender);
                let body = &message.as_bytes()[..message.len().min(usize::from(u16::MAX))];
                buf.put_u16(body.len() as u16);
                buf.put_slice(body);
                Frame::new(Opcode::Message as u8, buf.freeze())
            }
        }
    }
}

/// Convert AppError to ServerMessage for client notification
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        let message = match &err {
            AppError::NickInUse(name) => format!("The name '{}' is already taken", name),
            AppError::EmptyNick => "Names cannot be empty".to_string(),
            AppError::AlreadyInRoom => "You are already in this room".to_string(),
            AppError::IncorrectPassword => "Incorrect password".to_string(),
            AppError::TargetNotFound(target) => format!("No one named '{}' is connected", target),
            AppError::HandleRequired => "Pick a name before sending messages".to_string(),
            AppError::NotInRoom => "You are not in a room, no one is listening".to_string(),
            // Fatal errors are not typically converted (connection closes)
            _ => "Internal error".to_string(),
        };
        ServerMessage::Error { message }
    }
}

impl ProtocolError {
    /// Reply to flush to the peer before closing, if this violation has one
    pub fn farewell(&self) -> Option<ServerMessage> {
        match self {
            ProtocolError::MessageTooLong(_) => Some(ServerMessage::error("Length limit exceeded.")),
            ProtocolError::FrameTooLarge { opcode, .. } if *opcode == Opcode::Message as u8 => {
                Some(ServerMessage::error("Length limit exceeded."))
            }
            _ => None,
        }
    }
}

fn put_str8(buf: &mut BytesMut, s: &str) {
    let bytes = &s.as_bytes()[..s.len().min(usize::from(u8::MAX))];
    buf.put_u8(bytes.len() as u8);
    buf.put_slice(bytes);
}

fn text(bytes: &[u8]) -> Result<String, ProtocolError> {
    Ok(std::str::from_utf8(bytes)?.to_owned())
}

/// Bounds-checked cursor over a request payload
struct Fields<'a> {
    buf: &'a [u8],
}

impl<'a> Fields<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.buf.len() < n {
            return None;
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Some(head)
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn str8(&mut self) -> Option<&'a [u8]> {
        let len = *self.take(1)?.first()?;
        self.take(usize::from(len))
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }
}
