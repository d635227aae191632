use std::net::SocketAddr;

use async_trait::async_trait;
use frameloom::{ConnectionHandler, Message, MessageReader, Server, ServerConfig};
use log::*;
use tokio::io::AsyncWrite;

/// The minimal handler: log whatever arrives, reply to nothing. Useful as a starting point before
/// adding the bookkeeping a real application needs to send replies (see `echo_server.rs`).
struct LoggingHandler;

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> ConnectionHandler<W> for LoggingHandler {
    async fn on_message(&self, peer: SocketAddr, reader: MessageReader) {
        match Message::from_reader(reader).await {
            Ok(message) => info!("{peer}: {message:?}"),
            Err(err) => error!("{peer}: failed to read message: {err}"),
        }
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
    let server = Server::bind(addr, ServerConfig::default(), LoggingHandler).await?;
    info!("listening on {}", addr);
    server.serve().await
}
