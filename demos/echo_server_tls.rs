use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use frameloom::{ConnectionHandler, Message, MessageReader, OutboundWriter, Server, ServerConfig};
use log::*;
use pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, private_key};
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;

struct EchoHandler<W> {
    peers: Mutex<HashMap<SocketAddr, Arc<OutboundWriter<W>>>>,
}

impl<W> EchoHandler<W> {
    fn new() -> Self {
        Self { peers: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> ConnectionHandler<W> for EchoHandler<W> {
    async fn on_connection(&self, peer: SocketAddr, outbound: Arc<OutboundWriter<W>>) {
        self.peers.lock().await.insert(peer, outbound);
    }

    async fn on_message(&self, peer: SocketAddr, reader: MessageReader) {
        let message = match Message::from_reader(reader).await {
            Ok(message) => message,
            Err(err) => {
                error!("failed to read message from {peer}: {err}");
                return;
            }
        };
        let outbound = self.peers.lock().await.get(&peer).cloned();
        if let Some(outbound) = outbound {
            let result = match &message {
                Message::Text(text) => outbound.send_text(text).await,
                Message::Binary(data) => outbound.send_binary(data).await,
            };
            if let Err(err) = result {
                error!("failed to echo message back to {peer}: {err}");
            }
        }
    }

    async fn on_closed(&self, peer: SocketAddr, _code: u16, _reason: String) {
        self.peers.lock().await.remove(&peer);
    }
}

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    certs(&mut BufReader::new(File::open(path)?)).collect()
}

fn load_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    private_key(&mut BufReader::new(File::open(path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::Other, "no private key found"))
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let addr: SocketAddr = "127.0.0.1:9002".parse().unwrap();
    let certs = load_certs(Path::new("server.crt"))?;
    let key = load_key(Path::new("server.key"))?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

    let config = ServerConfig { tls_config: Some(Arc::new(tls_config)), ..ServerConfig::default() };
    let server = Server::bind(addr, config, EchoHandler::new()).await?;
    info!("listening on {} (tls)", addr);
    server.serve().await
}
