//! A single-producer single-consumer byte ring buffer backing one in-flight message.
//!
//! Grounded on the Python original's `websocket/stream/buffer.py::Buffer`: a fixed-capacity
//! backing array with independent read/write cursors, a `read_available`/`write_available`
//! invariant, and latchable EOF/exception states. The Python version parks producer and consumer
//! on `asyncio.Event`s; `tokio::sync::Notify` is the natural substitute — it already coalesces
//! redundant wakes and stores a permit when `notify_one` fires ahead of the waiter, so the
//! check-then-wait loop below can't lose a wakeup.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::Error;

/// The exception latched into a `RingBuffer` by `set_exception`. Stored behind an `Arc` so every
/// subsequent read after the first failure observes the same error, mirroring the Python
/// original's `self.exc` being raised repeatedly once set.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RingError {
    #[error("{0}")]
    Latched(#[from] Arc<Error>),

    #[error("incomplete read: needed {needed} bytes, only {available} available before eof")]
    IncompleteRead { needed: usize, available: usize },
}

impl RingError {
    /// Unwraps a latched exception back into an owned `Error`, for callers on the consumer side
    /// that want to propagate it as their own failure rather than keep it behind the `Arc`.
    pub fn into_error(self) -> Error {
        match self {
            RingError::Latched(exc) => match Arc::try_unwrap(exc) {
                Ok(exc) => exc,
                Err(exc) => Error::IOError { source: std::io::Error::new(std::io::ErrorKind::Other, exc.to_string()) },
            },
            RingError::IncompleteRead { .. } => Error::InconsistentData,
        }
    }
}

struct Inner {
    backing: Vec<u8>,
    capacity: usize,
    read_head: usize,
    write_head: usize,
    read_available: usize,
    write_available: usize,
    eof: bool,
    exc: Option<Arc<Error>>,
}

pub struct RingBuffer {
    inner: Mutex<Inner>,
    data_ready: Notify,
    space_ready: Notify,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                backing: vec![0u8; capacity],
                capacity,
                read_head: 0,
                write_head: 0,
                read_available: 0,
                write_available: capacity,
                eof: false,
                exc: None,
            }),
            data_ready: Notify::new(),
            space_ready: Notify::new(),
        }
    }

    /// Writes `data` into the ring, blocking (asynchronously) while there isn't enough free space.
    /// Never partially accepts a write — a write larger than `capacity` can never succeed and
    /// panics, since that can only be a caller bug (the inbound reader always chunks writes to
    /// `capacity` or less).
    pub async fn write(&self, data: &[u8]) {
        assert!(data.len() <= self.capacity(), "write larger than ring capacity");
        if data.is_empty() {
            return;
        }
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.write_available >= data.len() {
                    let capacity = inner.capacity;
                    let write_head = inner.write_head;
                    for (i, byte) in data.iter().enumerate() {
                        inner.backing[(write_head + i) % capacity] = *byte;
                    }
                    inner.write_head = (write_head + data.len()) % capacity;
                    inner.write_available -= data.len();
                    inner.read_available += data.len();
                    break;
                }
            }
            self.space_ready.notified().await;
        }
        self.data_ready.notify_one();
    }

    /// Reads up to `n` bytes into `buf[offset..]`, waiting for at least one byte unless EOF or an
    /// exception has been latched. Returns fewer than `n` bytes at EOF rather than erroring.
    pub async fn read_into(&self, buf: &mut [u8], n: usize, offset: usize) -> Result<usize, RingError> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(exc) = inner.exc.clone() {
                    return Err(RingError::Latched(exc));
                }
                if inner.read_available > 0 || inner.eof {
                    let to_read = n.min(inner.read_available);
                    let capacity = inner.capacity;
                    let read_head = inner.read_head;
                    for i in 0..to_read {
                        buf[offset + i] = inner.backing[(read_head + i) % capacity];
                    }
                    inner.read_head = (read_head + to_read) % capacity;
                    inner.read_available -= to_read;
                    inner.write_available += to_read;
                    drop(inner);
                    if to_read > 0 {
                        self.space_ready.notify_one();
                    }
                    return Ok(to_read);
                }
            }
            self.data_ready.notified().await;
        }
    }

    /// Reads exactly `n` bytes, treating a short read at EOF as an error — mirrors the Python
    /// original's `read_into_exactly` raising `IncompleteReadError`.
    pub async fn read_into_exactly(&self, buf: &mut [u8], n: usize) -> Result<(), RingError> {
        let mut filled = 0;
        while filled < n {
            let read = self.read_into(buf, n - filled, filled).await?;
            if read == 0 {
                return Err(RingError::IncompleteRead { needed: n - filled, available: 0 });
            }
            filled += read;
        }
        Ok(())
    }

    /// Marks the producer side closed. Remaining buffered bytes stay readable; once drained,
    /// reads return `Ok(0)`.
    pub fn feed_eof(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.eof = true;
        inner.write_available = 0;
        drop(inner);
        self.data_ready.notify_one();
    }

    /// Latches an exception that every subsequent (and any currently parked) read observes.
    pub fn set_exception(&self, exc: Error) {
        let mut inner = self.inner.lock().unwrap();
        inner.exc = Some(Arc::new(exc));
        inner.write_available = 0;
        drop(inner);
        self.data_ready.notify_one();
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }

    pub fn at_eof(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.eof && inner.read_available == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let ring = RingBuffer::new(16);
        ring.write(b"hello").await;
        let mut buf = [0u8; 5];
        let n = ring.read_into(&mut buf, 5, 0).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn read_wraps_around_the_backing_array() {
        let ring = RingBuffer::new(4);
        ring.write(b"ab").await;
        let mut drain = [0u8; 2];
        ring.read_into(&mut drain, 2, 0).await.unwrap();
        ring.write(b"cdef").await;
        let mut buf = [0u8; 4];
        ring.read_into_exactly(&mut buf, 4).await.unwrap();
        assert_eq!(&buf, b"cdef");
    }

    #[tokio::test]
    async fn eof_with_no_remaining_bytes_yields_empty_read() {
        let ring = RingBuffer::new(4);
        ring.feed_eof();
        let mut buf = [0u8; 4];
        let n = ring.read_into(&mut buf, 4, 0).await.unwrap();
        assert_eq!(n, 0);
        assert!(ring.at_eof());
    }

    #[tokio::test]
    async fn read_into_exactly_fails_on_short_eof_read() {
        let ring = RingBuffer::new(4);
        ring.write(b"ab").await;
        ring.feed_eof();
        let mut buf = [0u8; 4];
        let err = ring.read_into_exactly(&mut buf, 4).await.unwrap_err();
        assert!(matches!(err, RingError::IncompleteRead { .. }));
    }

    #[tokio::test]
    async fn set_exception_is_observed_by_reads() {
        let ring = RingBuffer::new(4);
        ring.set_exception(Error::InconsistentData);
        let mut buf = [0u8; 4];
        let err = ring.read_into(&mut buf, 4, 0).await.unwrap_err();
        assert!(matches!(err, RingError::Latched(_)));
    }

    #[tokio::test]
    async fn writer_blocks_until_reader_frees_space() {
        let ring = Arc::new(RingBuffer::new(4));
        ring.write(b"abcd").await;

        let writer = Arc::clone(&ring);
        let handle = tokio::spawn(async move {
            writer.write(b"ef").await;
        });

        tokio::task::yield_now().await;
        let mut buf = [0u8; 2];
        ring.read_into_exactly(&mut buf, 2).await.unwrap();
        handle.await.unwrap();

        let mut rest = [0u8; 4];
        ring.read_into_exactly(&mut rest, 4).await.unwrap();
        assert_eq!(&rest, b"cdef");
    }
}
