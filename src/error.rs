use httparse::Error as HttpParseError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::time::error::Elapsed;

#[derive(Error, Debug)]
pub enum Error {
    #[error("channel communication error")]
    CommunicationError,

    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("IO error: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    // Handshake errors
    #[error("invalid HTTP handshake request method or version")]
    InvalidHTTPHandshake,

    #[error("Connection: Upgrade header missing in the request")]
    NoConnectionHeaderPresent,

    #[error("Upgrade: websocket header missing in the request")]
    NoUpgradeHeaderPresent,

    #[error("Host header missing in the request")]
    NoHostHeaderPresent,

    #[error("Sec-WebSocket-Key header missing in the request")]
    NoSecWebsocketKey,

    #[error("Sec-WebSocket-Version header missing or unsupported")]
    UnsupportedWebsocketVersion,

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: HttpParseError,
    },

    #[error("incomplete HTTP request")]
    IncompleteHTTPRequest,

    #[error("HTTP request exceeded the maximum handshake header size")]
    HandshakeTooLarge,

    // Framing errors
    #[error("RSV bits must be zero, no extension negotiates their use")]
    RSVNotZero,

    #[error("control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("control frame payload exceeds 125 bytes")]
    ControlFramePayloadSize,

    #[error("a client-to-server frame must be masked")]
    UnmaskedClientFrame,

    #[error("max frame size ({0} bytes) exceeded")]
    MaxFrameSize(usize),

    #[error("max message size ({0} bytes) exceeded")]
    MaxMessageSize(usize),

    #[error("invalid opcode")]
    InvalidOpcode,

    // Fragmentation errors
    #[error("continuation frame received with no message in progress")]
    InvalidContinuationFrame,

    #[error("new data frame received while a fragmented message is already in progress")]
    FragmentedInProgress,

    // Close-frame errors
    #[error("invalid close code: {0}")]
    InvalidCloseCode(u16),

    #[error("close frame payload is not valid UTF-8")]
    InvalidCloseReason,

    #[error("invalid frame payload data")]
    InconsistentData,

    #[error("invalid UTF-8 at {start}-{end}")]
    InvalidUtf8 { start: usize, end: usize },

    // Post-close errors
    #[error("control frame received after the server initiated close")]
    PolicyViolation,

    #[error("closing connection in middle of message")]
    ClosingMidMessage,
}
