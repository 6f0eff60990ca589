//! Accept loop
//!
//! Owns the listening socket: starts the ChatServer actor and spawns one
//! connection handler per accepted stream until `shutdown` resolves.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::handler::handle_connection;
use crate::server::ChatServer;
use crate::types::ClientIdGenerator;

/// Serve connections from `listener` until `shutdown` completes
///
/// Each call builds its own ChatServer, so independent servers can run side
/// by side in one process.
pub async fn serve(
    listener: TcpListener,
    config: ServerConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<(), AppError> {
    let config = Arc::new(config);

    // Create ChatServer actor channel and start
    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
    let server = ChatServer::with_config(cmd_rx, &config);
    let server_task = tokio::spawn(server.run());

    info!("ChatServer actor started");

    tokio::pin!(shutdown);

    let mut client_ids = ClientIdGenerator::new();

    // Connection accept loop
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down...");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    // Issued here so IDs follow accept order
                    let client_id = client_ids.next_id();
                    info!("New connection from {} as client {}", addr, client_id);
                    let cmd_tx = cmd_tx.clone();
                    let config = Arc::clone(&config);

                    // Spawn handler task for each connection
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, client_id, cmd_tx, config).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    drop(listener);

    // Dropping every session closes their writers and with them the sockets
    server_task.abort();

    Ok(())
}
