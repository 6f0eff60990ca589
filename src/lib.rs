//! Multi-room Chat Server Library
//!
//! A TCP chat server speaking a length-prefixed binary protocol, using the
//! Actor pattern for state management.
//!
//! # Features
//! - Binary framing: `length:4 | magic:2 | opcode:1 | payload`
//! - Default handles (`rand0`, `rand1`, ...) with lowest-first recycling
//! - Named, optionally password-protected rooms, created on first join
//! - Presence listing for rooms and users
//! - Direct messages between handles
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the central actor owning sessions, rooms and handles
//! - Each connection has a `handler` task that decodes frames into commands
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use roomchat::{serve, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::new(4000);
//!     let listener = TcpListener::bind(config.bind_addr()).await.unwrap();
//!     serve(listener, config, async { let _ = tokio::signal::ctrl_c().await; })
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod listener;
pub mod message;
pub mod nick;
pub mod room;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use codec::{Frame, FrameCodec};
pub use config::ServerConfig;
pub use error::{AppError, ProtocolError, SendError};
pub use handler::handle_connection;
pub use listener::serve;
pub use message::{ClientMessage, Opcode, ServerMessage};
pub use nick::NicknameAllocator;
pub use room::{Room, RoomRegistry};
pub use server::{ChatServer, ServerCommand};
pub use session::{Session, SessionState};
pub use types::{ClientId, ClientIdGenerator};
