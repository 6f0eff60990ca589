//! Basic type definitions for the chat server
//!
//! Provides the `ClientId` newtype used as the key of every session index.

/// Unique client identifier (newtype pattern)
///
/// Issued by a server's `ClientIdGenerator` at accept time, so ordering by
/// `ClientId` is connection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out `ClientId`s in increasing order
///
/// Owned by one accept loop; IDs are unique within that server only.
#[derive(Debug, Default)]
pub struct ClientIdGenerator {
    next: u64,
}

impl ClientIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next client ID
    pub fn next_id(&mut self) -> ClientId {
        let id = ClientId(self.next);
        self.next += 1;
        id
    }
}
