//! An async WebSocket server engine for the Tokio stack.
//!
//! This library implements the server side of the [WebSocket Protocol RFC
//! 6455](https://datatracker.ietf.org/doc/html/rfc6455): handshake, frame parsing and masking,
//! fragmentation and reassembly, control frames, and the close handshake. It does not implement
//! the client side — connecting out to a remote WebSocket server is a non-goal.
//!
//! Applications plug in by implementing [`ConnectionHandler`](handler::ConnectionHandler) and
//! calling [`Server::bind`](server::Server::bind).

mod assembler;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handler;
pub mod handshake;
mod inbound;
pub mod message;
pub mod outbound;
pub mod reasons;
mod ring;
pub mod server;
mod utf8;

pub use config::{ServerConfig, WebSocketConfig};
pub use connection::ConnectionMachine;
pub use error::Error;
pub use handler::ConnectionHandler;
pub use message::{Message, MessageKind, MessageReader};
pub use outbound::OutboundWriter;
pub use server::{Server, Transport};
