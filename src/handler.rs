//! The callback surface application code implements to react to inbound messages and control
//! frames.
//!
//! Grounded on the Python original's `websocket/client.py`, which registers per-event callbacks
//! via decorators (`@self.message`, `@self.ping`, `@self.pong`, `@self.closed`) with sensible
//! defaults (default `on_ping` replies with a pong; default `on_pong`/`on_closed` are no-ops).
//! Rust has no runtime decorator registration, so the same defaults are expressed as default trait
//! methods instead. `async-trait` keeps the trait object-safe — the server holds one
//! `Arc<dyn ConnectionHandler>` shared across every accepted connection.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::message::MessageReader;
use crate::outbound::OutboundWriter;

#[async_trait]
pub trait ConnectionHandler<W>: Send + Sync + 'static
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Called once the handshake completes and before the connection's frame loop starts. The
    /// `outbound` handle is an owned `Arc`, not a borrow — a handler that needs to reply from
    /// `on_message` (which has no outbound of its own) is expected to keep its own
    /// `peer`-keyed registry populated here, the way an echo or broadcast server would.
    async fn on_connection(&self, _peer: SocketAddr, _outbound: Arc<OutboundWriter<W>>) {}

    /// Called for every inbound Text or Binary message. The reader may still be receiving bytes
    /// when this is invoked — see `MessageReader`.
    async fn on_message(&self, peer: SocketAddr, reader: MessageReader);

    /// Called for an inbound Ping frame. The default behavior replies with a Pong carrying the
    /// same payload, per RFC 6455 §5.5.2.
    async fn on_ping(&self, payload: Vec<u8>, outbound: &OutboundWriter<W>) {
        let _ = outbound.send_pong(payload).await;
    }

    /// Called for an inbound Pong frame. No default behavior.
    async fn on_pong(&self, _payload: Vec<u8>) {}

    /// Called once the connection has closed, whether initiated by the peer or by the server.
    async fn on_closed(&self, _peer: SocketAddr, _code: u16, _reason: String) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        messages: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionHandler<Vec<u8>> for CountingHandler {
        async fn on_message(&self, _peer: SocketAddr, _reader: MessageReader) {
            self.messages.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn default_ping_handler_sends_pong() {
        let handler = CountingHandler { messages: AtomicUsize::new(0) };
        let outbound = Arc::new(OutboundWriter::new(Vec::new(), 1024));
        handler.on_ping(b"hi".to_vec(), &outbound).await;
        let sent = Arc::try_unwrap(outbound).ok().unwrap();
        assert!(!sent.is_closed());
    }
}
