//! Server configuration

use std::time::Duration;

use crate::codec::DEFAULT_MAX_PAYLOAD;

/// Listening host; only the port is configurable
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Channel buffer size for server commands
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

/// Per-session outbound queue depth, in messages
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Interval between sweeps of closing sessions
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// How long a closing connection may spend flushing queued replies
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime settings shared by the listener, the server task and each connection
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub command_buffer: usize,
    pub outbound_buffer: usize,
    pub sweep_interval: Duration,
    pub flush_timeout: Duration,
    /// Largest payload a frame header may declare
    pub max_payload_len: usize,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Address to bind the listener to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", DEFAULT_HOST, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            max_payload_len: DEFAULT_MAX_PAYLOAD,
        }
    }
}
