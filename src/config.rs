//! Server and per-connection tuning knobs.
//!
//! Grounded on the teacher's `src/config.rs` almost verbatim. Dropped `ClientConfig` (client-side
//! connections are a non-goal) and its `ca_file`/`url` plumbing. Added `receive_chunk_size`,
//! `ring_buffer_capacity` and `client_timeout`, which SPEC_FULL §6 calls for but the teacher's
//! config never carried.

use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig as RustlsServerConfig;

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub web_socket_config: WebSocketConfig,
    pub tls_config: Option<Arc<RustlsServerConfig>>,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Largest payload a single frame may carry. Exceeding this aborts the connection with
    /// `Error::MaxFrameSize` and a 1009 close.
    pub max_frame_size: usize,
    /// Largest total payload a (possibly fragmented) message may carry across all its frames.
    pub max_message_size: usize,
    /// Chunk size used when streaming a data frame's payload into the ring buffer backing a
    /// `MessageReader`.
    pub receive_chunk_size: usize,
    /// Capacity of the ring buffer allocated per in-flight message. Bounds how far a slow
    /// `on_message` consumer can let the peer race ahead before backpressure reaches the socket.
    pub ring_buffer_capacity: usize,
    /// How long a connection may sit idle before the server pings it, and how long after that
    /// before it's considered unresponsive and closed with 1008. `None` disables the keepalive
    /// entirely — no ping is ever sent and no idle connection is ever force-closed. See
    /// `ConnectionMachine`.
    pub client_timeout: Option<Duration>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_frame_size: 16 << 20,
            max_message_size: 64 << 20,
            receive_chunk_size: 8 << 10,
            ring_buffer_capacity: 64 << 10,
            client_timeout: Some(Duration::from_secs(60)),
        }
    }
}
