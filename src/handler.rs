//! TCP connection handler
//!
//! Handles individual client connections: frame reassembly, decoding into
//! commands for the ChatServer, and flushing the session's outbound queue.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, trace};

use crate::codec::FrameCodec;
use crate::config::ServerConfig;
use crate::error::{AppError, ProtocolError};
use crate::message::{ClientMessage, ServerMessage};
use crate::server::ServerCommand;
use crate::types::ClientId;

/// Handle a new TCP connection
///
/// Registers the session, then runs a read task (bytes -> frames -> commands)
/// and a write task (outbound queue -> frames -> bytes) until either ends.
pub async fn handle_connection(
    stream: TcpStream,
    client_id: ClientId,
    cmd_tx: mpsc::Sender<ServerCommand>,
    config: Arc<ServerConfig>,
) -> Result<(), AppError> {
    let peer_addr = stream.peer_addr()?;
    stream.set_nodelay(true)?;

    debug!("Client {} assigned to {}", client_id, peer_addr);

    let (read_half, write_half) = stream.into_split();

    // Create channel for server -> client messages
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(config.outbound_buffer);

    // Register with ChatServer
    if cmd_tx
        .send(ServerCommand::Connect {
            client_id,
            addr: peer_addr,
            sender: msg_tx,
        })
        .await
        .is_err()
    {
        error!("Failed to register client {} - server closed", client_id);
        return Err(AppError::ChannelSend);
    }

    // Spawn read task (frames -> ServerCommand)
    let cmd_tx_read = cmd_tx.clone();
    let mut frames = FramedRead::new(read_half, FrameCodec::new(config.max_payload_len));
    let mut read_task = tokio::spawn(async move {
        let reason = loop {
            match frames.next().await {
                Some(Ok(frame)) => match ClientMessage::decode(&frame) {
                    Ok(Some(msg)) => {
                        let Some(cmd) = client_message_to_command(client_id, msg) else {
                            trace!("Heartbeat from {}", client_id);
                            continue;
                        };
                        if cmd_tx_read.send(cmd).await.is_err() {
                            debug!("Server closed, ending read task for {}", client_id);
                            return;
                        }
                    }
                    Ok(None) => {
                        debug!(
                            "Dropping truncated 0x{:02x} frame from {}",
                            frame.opcode, client_id
                        );
                    }
                    Err(e) => break Some(e),
                },
                Some(Err(ProtocolError::Io(e))) => {
                    debug!("Read error from {}: {}", client_id, e);
                    break None;
                }
                Some(Err(e)) => break Some(e),
                None => {
                    debug!("Client {} closed the stream", client_id);
                    break None;
                }
            }
        };

        let _ = cmd_tx_read
            .send(ServerCommand::Disconnect { client_id, reason })
            .await;
    });

    // Spawn write task (ServerMessage -> frames)
    let mut sink = FramedWrite::new(write_half, FrameCodec::new(config.max_payload_len));
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            if let Err(e) = sink.send(msg).await {
                debug!("Write to {} failed: {}", client_id, e);
                return;
            }
        }
        // The server dropped the session and everything queued is written
        let _ = sink.close().await;
        debug!("Write task ended for {}", client_id);
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut read_task => {
            // Disconnect is already reported; let queued replies drain
            if timeout(config.flush_timeout, &mut write_task).await.is_err() {
                debug!("Flush timed out for {}", client_id);
                write_task.abort();
            }
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    // Harmless if the session is already gone
    let _ = cmd_tx
        .send(ServerCommand::Disconnect {
            client_id,
            reason: None,
        })
        .await;

    info!("Client {} connection closed", client_id);

    Ok(())
}

/// Convert a ClientMessage to a ServerCommand
///
/// Heartbeats never reach the server.
fn client_message_to_command(client_id: ClientId, msg: ClientMessage) -> Option<ServerCommand> {
    let cmd = match msg {
        ClientMessage::Join { room, password } => ServerCommand::Join {
            client_id,
            room,
            password,
        },
        ClientMessage::Leave => ServerCommand::Leave { client_id },
        ClientMessage::ListUsers => ServerCommand::ListUsers { client_id },
        ClientMessage::ListRooms => ServerCommand::ListRooms { client_id },
        ClientMessage::SendMessage { target, message } => ServerCommand::SendMessage {
            client_id,
            target,
            message,
        },
        ClientMessage::Nick { name } => ServerCommand::Nick { client_id, name },
        ClientMessage::NoCommand => ServerCommand::NoCommand { client_id },
        ClientMessage::SortingHat => ServerCommand::SortingHat { client_id },
        ClientMessage::Heartbeat => return None,
    };
    Some(cmd)
}
