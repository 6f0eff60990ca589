//! Room struct and registry
//!
//! Rooms are created lazily by the first successful join and removed as
//! soon as their last member leaves, so the registry never holds an empty room.

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use bytes::Bytes;
use tracing::debug;

use crate::error::AppError;
use crate::types::ClientId;

/// Named chat room
///
/// Members are client IDs; the sessions themselves are owned by the server.
#[derive(Debug)]
pub struct Room {
    /// Room name (registry key)
    pub name: String,
    /// Opaque password, empty for none
    pub password: Bytes,
    /// Current members
    pub members: HashSet<ClientId>,
    /// Room creation time
    pub created_at: Instant,
}

impl Room {
    /// Create a new, empty room
    pub fn new(name: String, password: Bytes) -> Self {
        Self {
            name,
            password,
            members: HashSet::new(),
            created_at: Instant::now(),
        }
    }

    /// Check whether `password` opens this room
    pub fn admits(&self, password: &[u8]) -> bool {
        self.password.as_ref() == password
    }

    /// Check if a client is in this room
    pub fn contains(&self, client_id: ClientId) -> bool {
        self.members.contains(&client_id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// All live rooms, keyed by name
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: BTreeMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `client_id` to room `name`, creating it with `password` if absent
    ///
    /// Fails without touching the registry when the room exists under a
    /// different password.
    pub fn join(&mut self, name: &str, password: &[u8], client_id: ClientId) -> Result<(), AppError> {
        if let Some(room) = self.rooms.get_mut(name) {
            if !room.admits(password) {
                return Err(AppError::IncorrectPassword);
            }
            room.members.insert(client_id);
            return Ok(());
        }

        let mut room = Room::new(name.to_string(), Bytes::copy_from_slice(password));
        room.members.insert(client_id);
        self.rooms.insert(name.to_string(), room);
        debug!("Room '{}' created", name);
        Ok(())
    }

    /// Remove `client_id` from room `name`
    ///
    /// Returns true if the room was deleted because it became empty.
    pub fn leave(&mut self, name: &str, client_id: ClientId) -> bool {
        let Some(room) = self.rooms.get_mut(name) else {
            return false;
        };

        room.members.remove(&client_id);
        if !room.is_empty() {
            return false;
        }

        if let Some(room) = self.rooms.remove(name) {
            debug!("Room '{}' deleted (empty) after {:?}", name, room.created_at.elapsed());
        }
        true
    }

    pub fn get(&self, name: &str) -> Option<&Room> {
        self.rooms.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rooms.contains_key(name)
    }

    /// Room names in lexicographic order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rooms.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
