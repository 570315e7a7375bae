//! Byte streams connecting pipeline stages and sessions.
//!
//! [`pipe`] creates a bounded in-memory byte pipe with backpressure: the
//! writer blocks when the buffer is full, the reader blocks when it is
//! empty, closing the writer signals EOF, and dropping every reader turns
//! further writes into broken-pipe errors. Capacity defaults to 64KB to
//! match OS pipe buffers.
//!
//! [`Streams`] is the `(in, out, err)` triad a session or pipeline stage
//! owns. Handles are cheap clones so the triad can be snapshotted at
//! pipeline entry and restored on exit.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Notify;

/// Default pipe capacity (matches the Linux kernel pipe default).
pub const PIPE_BUFFER_SIZE: usize = 64 * 1024;

struct PipeInner {
    buffer: VecDeque<u8>,
    capacity: usize,
    writer_closed: bool,
    readers: usize,
}

struct PipeShared {
    inner: Mutex<PipeInner>,
    /// Notified when data arrives, space frees up, or an end closes.
    notify: Notify,
}

impl PipeShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, PipeInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Writing end of a pipe. Clones share the same pipe.
#[derive(Clone)]
pub struct PipeWriter {
    shared: Arc<PipeShared>,
}

/// Reading end of a pipe. Clones share the same pipe.
pub struct PipeReader {
    shared: Arc<PipeShared>,
}

/// Create a bounded pipe pair with the given capacity.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(PipeShared {
        inner: Mutex::new(PipeInner {
            buffer: VecDeque::with_capacity(capacity.min(8192)),
            capacity: capacity.max(1),
            writer_closed: false,
            readers: 1,
        }),
        notify: Notify::new(),
    });
    (
        PipeWriter {
            shared: Arc::clone(&shared),
        },
        PipeReader { shared },
    )
}

/// Create a pipe pair with the default 64KB capacity.
pub fn pipe_default() -> (PipeWriter, PipeReader) {
    pipe(PIPE_BUFFER_SIZE)
}

impl PipeWriter {
    /// Write as much of `data` as fits, waiting for space when the buffer
    /// is full. Returns the number of bytes accepted.
    pub async fn write(&self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.shared.lock();
                if inner.readers == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "pipe reader closed",
                    ));
                }
                if inner.writer_closed {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "pipe writer closed",
                    ));
                }
                let available = inner.capacity.saturating_sub(inner.buffer.len());
                if available > 0 {
                    let n = data.len().min(available);
                    inner.buffer.extend(&data[..n]);
                    self.shared.notify.notify_waiters();
                    return Ok(n);
                }
            }
            notified.await;
        }
    }

    /// Write all of `data`, waiting for space as needed.
    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < data.len() {
            written += self.write(&data[written..]).await?;
        }
        Ok(())
    }

    /// Close the writing end, signalling EOF to the reader.
    pub fn close(&self) {
        let mut inner = self.shared.lock();
        inner.writer_closed = true;
        self.shared.notify.notify_waiters();
    }
}

impl PipeReader {
    /// Read available bytes into `buf`, waiting when the pipe is empty.
    /// Returns 0 at EOF (writer closed and buffer drained).
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.shared.lock();
                if !inner.buffer.is_empty() {
                    let n = buf.len().min(inner.buffer.len());
                    for slot in buf.iter_mut().take(n) {
                        // The length check above guarantees n elements.
                        *slot = inner.buffer.pop_front().unwrap_or(0);
                    }
                    self.shared.notify.notify_waiters();
                    return Ok(n);
                }
                if inner.writer_closed {
                    return Ok(0);
                }
            }
            notified.await;
        }
    }

    /// Read until EOF.
    pub async fn read_to_end(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Read until EOF and decode lossily.
    pub async fn read_to_string(&self) -> io::Result<String> {
        let bytes = self.read_to_end().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Clone for PipeReader {
    fn clone(&self) -> Self {
        self.shared.lock().readers += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        inner.readers = inner.readers.saturating_sub(1);
        if inner.readers == 0 {
            self.shared.notify.notify_waiters();
        }
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter").finish()
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader").finish()
    }
}

/// A shared growable byte buffer used to capture output.
#[derive(Clone, Default, Debug)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, data: &[u8]) {
        self.bytes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(data);
    }

    /// Snapshot of the captured bytes.
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Captured bytes decoded lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    /// Drain the buffer, returning its text.
    pub fn take_text(&self) -> String {
        let mut bytes = self.bytes.lock().unwrap_or_else(|e| e.into_inner());
        let text = String::from_utf8_lossy(&bytes).into_owned();
        bytes.clear();
        text
    }
}

/// An input byte source for a session or stage.
#[derive(Clone, Debug)]
pub enum InStream {
    /// Always at EOF.
    Null,
    /// The process standard input.
    Stdin,
    /// A fixed byte buffer, read once front to back.
    Bytes(Arc<Mutex<io::Cursor<Vec<u8>>>>),
    /// The reading end of an inter-stage pipe.
    Pipe(PipeReader),
}

impl InStream {
    /// Seed an input stream from a byte vector.
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        InStream::Bytes(Arc::new(Mutex::new(io::Cursor::new(data.into()))))
    }

    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            InStream::Null => Ok(0),
            InStream::Stdin => tokio::io::stdin().read(buf).await,
            InStream::Bytes(cursor) => {
                let mut cursor = cursor.lock().unwrap_or_else(|e| e.into_inner());
                io::Read::read(&mut *cursor, buf)
            }
            InStream::Pipe(reader) => reader.read(buf).await,
        }
    }

    /// Read the remaining input and decode lossily.
    pub async fn read_to_string(&self) -> io::Result<String> {
        let mut out = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

/// An output byte sink for a session or stage.
#[derive(Clone, Debug)]
pub enum OutStream {
    /// Discards everything.
    Null,
    /// The process standard output.
    Stdout,
    /// The process standard error.
    Stderr,
    /// A shared capture buffer.
    Buffer(SharedBuffer),
    /// The writing end of an inter-stage pipe.
    Pipe(PipeWriter),
}

impl OutStream {
    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        match self {
            OutStream::Null => Ok(()),
            OutStream::Stdout => {
                let mut out = tokio::io::stdout();
                out.write_all(data).await?;
                out.flush().await
            }
            OutStream::Stderr => {
                let mut err = tokio::io::stderr();
                err.write_all(data).await?;
                err.flush().await
            }
            OutStream::Buffer(buffer) => {
                buffer.push(data);
                Ok(())
            }
            OutStream::Pipe(writer) => writer.write_all(data).await,
        }
    }

    /// Write text followed by a newline.
    pub async fn write_line(&self, text: &str) -> io::Result<()> {
        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');
        self.write_all(&line).await
    }

    /// Close pipe sinks, signalling EOF downstream. No-op for other sinks.
    pub fn close(&self) {
        if let OutStream::Pipe(writer) = self {
            writer.close();
        }
    }
}

/// The `(in, out, err)` stream triad.
#[derive(Clone, Debug)]
pub struct Streams {
    pub input: InStream,
    pub out: OutStream,
    pub err: OutStream,
}

impl Streams {
    /// The process's own stdio.
    pub fn host() -> Self {
        Self {
            input: InStream::Stdin,
            out: OutStream::Stdout,
            err: OutStream::Stderr,
        }
    }

    /// Discard everything, read nothing.
    pub fn null() -> Self {
        Self {
            input: InStream::Null,
            out: OutStream::Null,
            err: OutStream::Null,
        }
    }

    /// Capture out and err into shared buffers; input starts at EOF.
    /// Returns the triad and the two capture buffers.
    pub fn capture() -> (Self, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::new();
        let err = SharedBuffer::new();
        let streams = Self {
            input: InStream::Null,
            out: OutStream::Buffer(out.clone()),
            err: OutStream::Buffer(err.clone()),
        };
        (streams, out, err)
    }
}
