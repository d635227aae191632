//! The TCP/TLS accept loop.
//!
//! Grounded on the teacher's `src/server.rs` (`start_server_with_config`: bind, per-connection
//! `tokio::spawn`, a `TlsAcceptor` branch selected by `ServerConfig::tls_config`) and the Python
//! original's `websocket/server.py::WebsocketServer` (`socket_connect`'s per-client bookkeeping,
//! `disconnect_all(timeout)` broadcasting a close to every live peer before giving up stragglers).
//! The teacher's connection registry is UUID-keyed (`Event::NewClient(uuid, ...)`); this one is
//! keyed by `SocketAddr`, matching the Python original's `self.clients[addr, port]` (SPEC_FULL §5).

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use log::{error, info, warn};
use tokio::io::{split, AsyncRead, AsyncWrite, ReadBuf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_rustls::{server::TlsStream, TlsAcceptor};

use crate::config::ServerConfig;
use crate::connection::ConnectionMachine;
use crate::handler::ConnectionHandler;
use crate::handshake;
use crate::outbound::OutboundWriter;

/// Either side of a plain or TLS-terminated TCP connection, so the rest of the engine can stay
/// generic over one transport type regardless of which listener accepted it.
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Transport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

type PeerWriteHalf = WriteHalf<handshake::HandshakeStream<Transport>>;
type PeerRegistry = Arc<Mutex<HashMap<SocketAddr, Arc<OutboundWriter<PeerWriteHalf>>>>>;

/// A running WebSocket server: owns the listener and the registry of currently-connected peers.
pub struct Server<H> {
    listener: TcpListener,
    config: ServerConfig,
    handler: Arc<H>,
    peers: PeerRegistry,
}

impl<H> Server<H>
where
    H: ConnectionHandler<PeerWriteHalf>,
{
    pub async fn bind(addr: impl Into<SocketAddr>, config: ServerConfig, handler: H) -> io::Result<Self> {
        let listener = TcpListener::bind(addr.into()).await?;
        Ok(Self { listener, config, handler: Arc::new(handler), peers: Arc::new(Mutex::new(HashMap::new())) })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the process is torn down. Each connection runs its handshake and
    /// frame loop on its own task; a handshake or TLS failure is logged and the listener keeps
    /// running.
    pub async fn serve(self) -> io::Result<()> {
        let tls_acceptor = self.config.tls_config.clone().map(TlsAcceptor::from);
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let handler = Arc::clone(&self.handler);
            let config = self.config.web_socket_config.clone();
            let peers = Arc::clone(&self.peers);
            let tls_acceptor = tls_acceptor.clone();

            tokio::spawn(async move {
                let transport = match tls_acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => Transport::Tls(Box::new(tls_stream)),
                        Err(err) => {
                            warn!("TLS handshake failed for {peer}: {err}");
                            return;
                        }
                    },
                    None => Transport::Plain(stream),
                };

                let handshake_timeout = Duration::from_secs(10);
                let handshake_stream = match handshake::accept(transport, handshake_timeout).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!("WebSocket handshake failed for {peer}: {err}");
                        return;
                    }
                };

                info!("accepted connection from {peer}");
                let (read_half, write_half) = split(handshake_stream);
                let machine = ConnectionMachine::new(read_half, write_half, peer, handler, config);
                peers.lock().await.insert(peer, Arc::clone(machine.outbound()));
                machine.run().await;
                peers.lock().await.remove(&peer);
            });
        }
    }

    /// Broadcasts a close to every connected peer, then waits up to `grace_period` for their
    /// frame loops to notice and exit before returning, mirroring the Python original's
    /// `disconnect_all(timeout)`.
    pub async fn shutdown(&self, code: u16, reason: &str, grace_period: Duration) {
        let peers = self.peers.lock().await;
        for (addr, outbound) in peers.iter() {
            if let Err(err) = outbound.close(code, reason).await {
                error!("error closing connection to {addr} during shutdown: {err}");
            }
        }
        drop(peers);
        let _ = timeout(grace_period, async {
            while !self.peers.lock().await.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await;
    }
}
