//! Multi-room chat server - Entry Point
//!
//! Parses the listen port, binds on all interfaces and serves until Ctrl-C.

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use roomchat::{serve, ServerConfig};

/// Multi-room chat server speaking a length-prefixed binary protocol
#[derive(Parser, Debug)]
#[command(name = "roomchat")]
#[command(version)]
struct Args {
    /// TCP port to listen on (1-65535)
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=roomchat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roomchat=info")),
        )
        .init();

    let config = ServerConfig::new(args.port);
    let addr = config.bind_addr();

    // Start TCP listener
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            return Err(e.into());
        }
    };
    info!("Chat server listening on {}", addr);

    serve(listener, config, shutdown_signal()).await?;

    info!("Listener closed");
    Ok(())
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
