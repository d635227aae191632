//! The HTTP/1.1 upgrade handshake (RFC 6455 §4.2).
//!
//! Grounded on the teacher's `src/handshake.rs`/`src/request.rs` (bounded buffered header read,
//! SHA-1 + base64 accept-key computation) and the Python original's
//! `websocket/http/handshake.py::Request.validate_websocket_request` for the exact header set a
//! valid upgrade request must carry. The teacher's ad hoc `header_buf.find(SEC_WEBSOCKETS_KEY)`
//! string search is replaced with `httparse::Request` — the teacher already depends on `httparse`,
//! so a real header parser is the idiomatic choice once the dependency is already present.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use base64::prelude::*;
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::timeout;

use crate::error::Error;

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_HEADER_SIZE: usize = 16 * 1024;
const READ_CHUNK: usize = 1024;
const MAX_HEADERS: usize = 32;
const SUPPORTED_VERSION: &str = "13";

/// Performs the server-side opening handshake and hands back a stream primed with any bytes the
/// client pipelined immediately after the handshake (some clients start sending frames without
/// waiting for the 101 response to arrive).
pub async fn accept<S>(mut stream: S, handshake_timeout: Duration) -> Result<HandshakeStream<S>, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (header_bytes, leftover) = read_header_block(&mut stream, handshake_timeout).await?;

    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut header_storage);
    let result = request
        .parse(&header_bytes)
        .map_err(Error::from)
        .and_then(|status| if status.is_partial() { Err(Error::IncompleteHTTPRequest) } else { Ok(()) })
        .and_then(|()| validate_request(&request))
        .and_then(|()| header_value(&request, "sec-websocket-key").ok_or(Error::NoSecWebsocketKey));

    let key = match result {
        Ok(key) => key,
        Err(err) => {
            // Every failure above happens after the header block is fully buffered, so writing a
            // response back on this same stream can't race the client still sending header bytes.
            let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
            let _ = stream.flush().await;
            return Err(err);
        }
    };
    let accept_value = compute_accept_value(key);

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Accept: {accept_value}\r\n\
         \r\n"
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;

    Ok(HandshakeStream { leftover, inner: stream })
}

async fn read_header_block<S: AsyncRead + Unpin>(
    stream: &mut S,
    handshake_timeout: Duration,
) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        if buf.len() > MAX_HEADER_SIZE {
            return Err(Error::HandshakeTooLarge);
        }
        let mut chunk = [0u8; READ_CHUNK];
        let n = timeout(handshake_timeout, stream.read(&mut chunk)).await??;
        if n == 0 {
            return Err(Error::IncompleteHTTPRequest);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_header_terminator(&buf) {
            let leftover = buf[end..].to_vec();
            buf.truncate(end);
            return Ok((buf.to_vec(), leftover));
        }
    }
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

fn validate_request(request: &httparse::Request) -> Result<(), Error> {
    if request.method != Some("GET") {
        return Err(Error::InvalidHTTPHandshake);
    }
    if request.version != Some(1) {
        return Err(Error::InvalidHTTPHandshake);
    }
    if header_value(request, "host").is_none() {
        return Err(Error::NoHostHeaderPresent);
    }
    match header_value(request, "connection") {
        Some(value) if value.to_ascii_lowercase().contains("upgrade") => {}
        _ => return Err(Error::NoConnectionHeaderPresent),
    }
    match header_value(request, "upgrade") {
        Some(value) if value.eq_ignore_ascii_case("websocket") => {}
        _ => return Err(Error::NoUpgradeHeaderPresent),
    }
    match header_value(request, "sec-websocket-version") {
        Some(value) if value == SUPPORTED_VERSION => {}
        _ => return Err(Error::UnsupportedWebsocketVersion),
    }
    Ok(())
}

fn header_value<'a>(request: &'a httparse::Request, name: &str) -> Option<&'a str> {
    request
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .and_then(|h| std::str::from_utf8(h.value).ok())
}

fn compute_accept_value(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

/// Wraps a transport so bytes the client pipelined past the handshake's terminating CRLFCRLF
/// aren't lost once `ConnectionMachine` starts reading frames from the same stream.
pub struct HandshakeStream<S> {
    leftover: Vec<u8>,
    inner: S,
}

impl<S: AsyncRead + Unpin> AsyncRead for HandshakeStream<S> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        if !self.leftover.is_empty() {
            let take = self.leftover.len().min(buf.remaining());
            buf.put_slice(&self.leftover[..take]);
            self.leftover.drain(..take);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for HandshakeStream<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn accepts_a_well_formed_upgrade_request() {
        let (mut client, server) = duplex(4096);
        let request = "GET /chat HTTP/1.1\r\n\
            Host: example.com\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n";
        client.write_all(request.as_bytes()).await.unwrap();

        let _handshake = accept(server, Duration::from_secs(1)).await.unwrap();

        let mut response = vec![0u8; 256];
        let n = client.read(&mut response).await.unwrap();
        let response = String::from_utf8(response[..n].to_vec()).unwrap();
        assert!(response.contains("101 Switching Protocols"));
        assert!(response.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[tokio::test]
    async fn rejects_request_missing_upgrade_header() {
        let (mut client, server) = duplex(4096);
        let request = "GET /chat HTTP/1.1\r\n\
            Host: example.com\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n";
        client.write_all(request.as_bytes()).await.unwrap();

        let err = accept(server, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::NoUpgradeHeaderPresent));

        let mut response = vec![0u8; 256];
        let n = client.read(&mut response).await.unwrap();
        assert!(String::from_utf8(response[..n].to_vec()).unwrap().starts_with("HTTP/1.1 400 Bad Request"));
    }

    #[tokio::test]
    async fn preserves_pipelined_bytes_past_the_handshake() {
        let (mut client, server) = duplex(4096);
        let mut request = b"GET / HTTP/1.1\r\n\
            Host: example.com\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n"
            .to_vec();
        request.extend_from_slice(b"PIPELINED");
        client.write_all(&request).await.unwrap();

        let mut handshake = accept(server, Duration::from_secs(1)).await.unwrap();
        let mut response = vec![0u8; 256];
        client.read(&mut response).await.unwrap();

        let mut buf = [0u8; 9];
        handshake.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PIPELINED");
    }
}
