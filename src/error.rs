//! Error types for the chat server
//!
//! Three tiers, matching how the server reacts:
//! - `ProtocolError`: fatal, the connection is torn down
//! - `AppError`: soft errors answered with a status-0x01 reply, plus internal failures
//! - `SendError`: a session's outbound queue could not take a message

use thiserror::Error;

/// Fatal protocol violations
///
/// Any of these ends the offending connection. Nothing is resynchronized.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame header carried the wrong magic constant
    #[error("bad magic 0x{0:04x}")]
    BadMagic(u16),

    /// Opcode not in the command table
    #[error("unrecognized opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    /// Declared payload length is above the configured ceiling
    #[error("0x{opcode:02x} frame payload of {len} bytes exceeds limit of {limit}")]
    FrameTooLarge { opcode: u8, len: usize, limit: usize },

    /// Direct message body cannot be described by the 2-byte length field
    #[error("message body of {0} bytes exceeds 65535")]
    MessageTooLong(usize),

    /// A length-prefixed text field was not valid UTF-8
    #[error("invalid UTF-8 in text field: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Socket read failed or the stream ended mid-frame
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application-level errors
///
/// Soft variants are converted into `ServerMessage::Error` and leave the
/// connection open with the caller's state unchanged.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Another session already holds the requested handle
    #[error("Nickname in use: {0}")]
    NickInUse(String),

    /// NICK with a zero-length name
    #[error("Empty nickname")]
    EmptyNick,

    /// JOIN targeting the room the caller is already in
    #[error("Already in room")]
    AlreadyInRoom,

    /// JOIN with a password that differs from the room's
    #[error("Incorrect password")]
    IncorrectPassword,

    /// MESSAGE target has no matching session
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// MESSAGE from a session that has no handle yet
    #[error("Handle required")]
    HandleRequired,

    /// Plain text typed outside of any room
    #[error("Not in room")]
    NotInRoom,
}

/// Outbound queue errors
///
/// Occurs when a reply cannot be enqueued for a session.
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection's writer has gone away
    #[error("Channel closed")]
    ChannelClosed,

    /// The peer is not draining its queue fast enough
    #[error("Outbound queue full")]
    QueueFull,
}
