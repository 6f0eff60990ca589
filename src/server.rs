//! ChatServer Actor implementation
//!
//! The single owner of all shared state: sessions, the handle index, rooms
//! and the default-handle allocator. Connection tasks forward typed commands
//! over an mpsc channel and every mutation happens here, one command at a time.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{ServerConfig, DEFAULT_SWEEP_INTERVAL};
use crate::error::{AppError, ProtocolError};
use crate::message::ServerMessage;
use crate::nick::NicknameAllocator;
use crate::room::RoomRegistry;
use crate::session::{Session, SessionState};
use crate::types::ClientId;

/// Commands sent from connection handlers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New connection accepted
    Connect {
        client_id: ClientId,
        addr: SocketAddr,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Connection ended; `reason` is set for protocol violations
    Disconnect {
        client_id: ClientId,
        reason: Option<ProtocolError>,
    },
    /// Join (or create) a room
    Join {
        client_id: ClientId,
        room: String,
        password: Bytes,
    },
    /// Leave the current room
    Leave {
        client_id: ClientId,
    },
    /// List visible handles
    ListUsers {
        client_id: ClientId,
    },
    /// List rooms
    ListRooms {
        client_id: ClientId,
    },
    /// Relay a direct message
    SendMessage {
        client_id: ClientId,
        target: String,
        message: String,
    },
    /// Change handle
    Nick {
        client_id: ClientId,
        name: String,
    },
    /// Plain text without a command
    NoCommand {
        client_id: ClientId,
    },
    /// Handshake
    SortingHat {
        client_id: ClientId,
    },
}

/// The main ChatServer actor
pub struct ChatServer {
    /// All sessions, in connection order: ClientId -> Session
    sessions: BTreeMap<ClientId, Session>,
    /// Handle index for uniqueness checks and message routing: handle -> ClientId
    handles: HashMap<String, ClientId>,
    /// All live rooms
    rooms: RoomRegistry,
    /// Default handle allocator
    nicks: NicknameAllocator,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
    /// Upper bound on the time between sweeps
    sweep_interval: Duration,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver
    pub fn new(receiver: mpsc::Receiver<ServerCommand>) -> Self {
        Self {
            sessions: BTreeMap::new(),
            handles: HashMap::new(),
            rooms: RoomRegistry::new(),
            nicks: NicknameAllocator::new(),
            receiver,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_config(receiver: mpsc::Receiver<ServerCommand>, config: &ServerConfig) -> Self {
        Self {
            sweep_interval: config.sweep_interval,
            ..Self::new(receiver)
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Each iteration either handles one command or hits the sweep tick;
    /// closing sessions are torn down after both. Ends when all senders are dropped.
    pub async fn run(mut self) {
        info!("ChatServer started");

        let mut sweep = interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else {
                        break;
                    };
                    self.handle_command(cmd);
                }
                _ = sweep.tick() => {}
            }
            self.sweep_closing();
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command
    pub fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect {
                client_id,
                addr,
                sender,
            } => {
                self.handle_connect(client_id, addr, sender);
            }
            ServerCommand::Disconnect { client_id, reason } => {
                self.handle_disconnect(client_id, reason);
            }
            ServerCommand::Join {
                client_id,
                room,
                password,
            } => {
                self.handle_join(client_id, room, password);
            }
            ServerCommand::Leave { client_id } => {
                self.handle_leave(client_id);
            }
            ServerCommand::ListUsers { client_id } => {
                self.handle_list_users(client_id);
            }
            ServerCommand::ListRooms { client_id } => {
                self.handle_list_rooms(client_id);
            }
            ServerCommand::SendMessage {
                client_id,
                target,
                message,
            } => {
                self.handle_send_message(client_id, target, message);
            }
            ServerCommand::Nick { client_id, name } => {
                self.handle_nick(client_id, name);
            }
            ServerCommand::NoCommand { client_id } => {
                self.handle_no_command(client_id);
            }
            ServerCommand::SortingHat { client_id } => {
                self.handle_sorting_hat(client_id);
            }
        }
    }

    /// Tear down every session marked closing
    pub fn sweep_closing(&mut self) {
        let closing: Vec<ClientId> = self
            .sessions
            .values()
            .filter(|s| s.is_closing())
            .map(|s| s.id)
            .collect();

        for client_id in closing {
            self.teardown(client_id);
        }
    }

    pub fn session(&self, client_id: ClientId) -> Option<&Session> {
        self.sessions.get(&client_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Handle new connection
    fn handle_connect(&mut self, client_id: ClientId, addr: SocketAddr, sender: mpsc::Sender<ServerMessage>) {
        info!("Client {} connected from {}", client_id, addr);
        self.sessions
            .insert(client_id, Session::new(client_id, addr, sender));
        debug!(
            "Total sessions: {}, Total rooms: {}",
            self.sessions.len(),
            self.rooms.len()
        );
    }

    /// Handle connection end or fatal protocol violation
    fn handle_disconnect(&mut self, client_id: ClientId, reason: Option<ProtocolError>) {
        if let Some(reason) = reason {
            warn!("Client {} violated the protocol: {}", client_id, reason);
            if let (Some(farewell), Some(session)) = (reason.farewell(), self.sessions.get(&client_id)) {
                // Queued ahead of the teardown so the writer still flushes it
                let _ = session.send(farewell);
            }
        }

        self.teardown(client_id);
    }

    /// Handle the handshake: give the session a handle and mark it connected
    fn handle_sorting_hat(&mut self, client_id: ClientId) {
        let Some(session) = self.sessions.get_mut(&client_id) else {
            return;
        };

        let handle = match session.handle.clone() {
            Some(handle) => handle,
            None => {
                let handle = self.nicks.assign();
                self.handles.insert(handle.clone(), client_id);
                session.handle = Some(handle.clone());
                handle
            }
        };
        session.state = SessionState::Connected;

        info!("Client {} sorted as '{}'", client_id, handle);
        self.reply(client_id, ServerMessage::handle(&handle));
    }

    /// Handle handle change
    fn handle_nick(&mut self, client_id: ClientId, name: String) {
        if !self.sessions.contains_key(&client_id) {
            return;
        }

        match self.set_handle(client_id, name) {
            Ok(()) => self.reply(client_id, ServerMessage::ok()),
            Err(err) => self.reply(client_id, err.into()),
        }
    }

    fn set_handle(&mut self, client_id: ClientId, name: String) -> Result<(), AppError> {
        if name.is_empty() {
            return Err(AppError::EmptyNick);
        }
        if self.handles.get(&name).is_some_and(|holder| *holder != client_id) {
            return Err(AppError::NickInUse(name));
        }

        let Some(session) = self.sessions.get_mut(&client_id) else {
            return Ok(());
        };
        if session.handle.as_deref() == Some(name.as_str()) {
            return Ok(());
        }

        if let Some(previous) = session.handle.take() {
            self.handles.remove(&previous);
            self.nicks.release(&previous);
        }
        self.nicks.reserve(&name);
        self.handles.insert(name.clone(), client_id);

        info!("Client {} is now known as '{}'", client_id, name);
        session.handle = Some(name);
        Ok(())
    }

    /// Handle room joining
    fn handle_join(&mut self, client_id: ClientId, room: String, password: Bytes) {
        let Some(session) = self.sessions.get_mut(&client_id) else {
            return;
        };

        if room.contains('\0') || password.contains(&0) {
            warn!("Client {} sent a NUL byte in JOIN, closing", client_id);
            session.mark_closing();
            return;
        }

        if session.room.as_deref() == Some(room.as_str()) {
            self.reply(client_id, AppError::AlreadyInRoom.into());
            return;
        }

        if let Err(err) = self.rooms.join(&room, &password, client_id) {
            debug!("Client {} refused entry to '{}': {}", client_id, room, err);
            self.reply(client_id, err.into());
            return;
        }

        if let Some(previous) = session.room.replace(room.clone()) {
            self.rooms.leave(&previous, client_id);
        }

        info!("Client {} joined room '{}'", client_id, room);
        self.reply(client_id, ServerMessage::ok());
    }

    /// Handle room leaving; outside a room this is a disconnect request
    fn handle_leave(&mut self, client_id: ClientId) {
        let Some(session) = self.sessions.get_mut(&client_id) else {
            return;
        };

        match session.room.take() {
            Some(room) => {
                self.rooms.leave(&room, client_id);
                info!("Client {} left room '{}'", client_id, room);
                self.reply(client_id, ServerMessage::ok());
            }
            None => {
                info!("Client {} left with no room, disconnecting", client_id);
                session.mark_closing();
            }
        }
    }

    /// Handle user listing: room-mates inside a room, everyone outside
    fn handle_list_users(&mut self, client_id: ClientId) {
        let Some(session) = self.sessions.get(&client_id) else {
            return;
        };

        let room = session.room.as_deref();
        let msg = ServerMessage::name_list(
            self.sessions
                .values()
                .filter(|other| room.is_none() || other.room.as_deref() == room)
                .filter_map(|other| other.handle.as_deref()),
        );

        self.reply(client_id, msg);
    }

    /// Handle room listing
    fn handle_list_rooms(&mut self, client_id: ClientId) {
        if !self.sessions.contains_key(&client_id) {
            return;
        }

        let msg = ServerMessage::name_list(self.rooms.names());
        self.reply(client_id, msg);
    }

    /// Handle direct message relay
    fn handle_send_message(&mut self, client_id: ClientId, target: String, message: String) {
        let Some(session) = self.sessions.get(&client_id) else {
            return;
        };

        let Some(sender) = session.handle.clone() else {
            self.reply(client_id, AppError::HandleRequired.into());
            return;
        };

        let Some(&recipient) = self.handles.get(&target) else {
            self.reply(client_id, AppError::TargetNotFound(target).into());
            return;
        };

        debug!(
            "Message from '{}' to '{}' ({} bytes)",
            sender,
            target,
            message.len()
        );

        self.reply(recipient, ServerMessage::DeliverMessage { sender, message });
        self.reply(client_id, ServerMessage::ok());
    }

    /// Handle plain text: nothing is relayed, but outside a room no one is listening
    fn handle_no_command(&mut self, client_id: ClientId) {
        let Some(session) = self.sessions.get(&client_id) else {
            return;
        };

        if session.room.is_none() {
            self.reply(client_id, AppError::NotInRoom.into());
        } else {
            self.reply(client_id, ServerMessage::ok());
        }
    }

    /// Helper: Enqueue a message, marking the session closing if it can't keep up
    fn reply(&mut self, client_id: ClientId, msg: ServerMessage) {
        let Some(session) = self.sessions.get_mut(&client_id) else {
            return;
        };

        if let Err(e) = session.send(msg) {
            warn!("Dropping client {}: {}", client_id, e);
            session.mark_closing();
        }
    }

    /// Helper: Remove a session from every index
    ///
    /// Idempotent. Dropping the session drops its outbound sender, which lets
    /// the connection's writer flush what is queued and close the socket.
    fn teardown(&mut self, client_id: ClientId) {
        let Some(session) = self.sessions.remove(&client_id) else {
            return;
        };

        if let Some(room) = &session.room {
            self.rooms.leave(room, client_id);
        }

        if let Some(handle) = &session.handle {
            if self.handles.get(handle) == Some(&client_id) {
                self.handles.remove(handle);
            }
            self.nicks.release(handle);
        }

        info!(
            "Client {} ({}) disconnected",
            client_id,
            session.display_name()
        );
        debug!(
            "Total sessions: {}, Total rooms: {}",
            self.sessions.len(),
            self.rooms.len()
        );
    }
}
