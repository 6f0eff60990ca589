//! Session struct definition
//!
//! Per-connection state held by the server: handle, room and lifecycle,
//! plus the sending side of the connection's outbound queue.

use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::ClientId;

/// Session lifecycle
///
/// `Handshake` on accept, `Connected` after the sorting-hat command,
/// `Closing` once a handler asks for the session to go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshake,
    Connected,
    Closing,
}

/// Connected session
#[derive(Debug)]
pub struct Session {
    /// Unique identifier for this session
    pub id: ClientId,
    /// Peer address
    pub addr: SocketAddr,
    /// Handle (None until sorting-hat or NICK)
    pub handle: Option<String>,
    /// Name of the room this session is in
    pub room: Option<String>,
    /// Lifecycle state
    pub state: SessionState,
    /// Server → connection outbound queue
    pub sender: mpsc::Sender<ServerMessage>,
}

impl Session {
    /// Create a new session in the handshake state
    pub fn new(id: ClientId, addr: SocketAddr, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            addr,
            handle: None,
            room: None,
            state: SessionState::Handshake,
            sender,
        }
    }

    /// Enqueue a message for this session without waiting
    ///
    /// Handlers run on the server task and must never block on a slow peer,
    /// so a full queue is reported instead of awaited.
    pub fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Get the display name for this session
    pub fn display_name(&self) -> &str {
        self.handle.as_deref().unwrap_or("(unnamed)")
    }

    pub fn is_closing(&self) -> bool {
        self.state == SessionState::Closing
    }

    /// Ask for this session to be torn down at the next sweep
    pub fn mark_closing(&mut self) {
        self.state = SessionState::Closing;
    }
}
