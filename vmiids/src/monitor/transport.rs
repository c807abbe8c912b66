//! Byte-stream access to the monitor console.
//!
//! `StreamConsole` pumps the read half of any stream into a channel from a
//! dedicated reader thread, so `read_until` can wait with a deadline no matter
//! whether the endpoint is a character device, a unix socket or TCP.

use std::{
    fs::OpenOptions,
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
    thread,
    time::{Duration, Instant},
};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use thiserror::Error;

use crate::config::ConsoleEndpoint;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("console I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("console closed by peer")]
    Closed,

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("console endpoint {0:?} is not supported on this platform")]
    Unsupported(ConsoleEndpoint),
}

/// A duplex byte channel to the hypervisor's monitor.
pub trait ConsoleTransport: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Block until `marker` has been received, returning every byte up to and
    /// including it. Bytes after the marker stay buffered for the next call.
    fn read_until(&mut self, marker: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError>;
}

/// Console over any `Read`/`Write` pair.
pub struct StreamConsole {
    writer: Box<dyn Write + Send>,
    chunks: Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    closer: Option<Box<dyn FnOnce() + Send>>,
}

impl StreamConsole {
    /// Wrap a reader/writer pair; `reader` is moved onto its own thread.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (tx, rx) = channel::unbounded();
        thread::Builder::new()
            .name("console-reader".into())
            .spawn(move || pump(reader, tx))
            .map(|_| ())
            .unwrap_or_else(|e| log::error!("cannot spawn console reader: {e}"));

        Self { writer: Box::new(writer), chunks: rx, pending: Vec::new(), closer: None }
    }

    /// Open the configured endpoint.
    pub fn open(endpoint: &ConsoleEndpoint) -> Result<Self, TransportError> {
        match endpoint {
            ConsoleEndpoint::Device(path) => {
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                let reader = file.try_clone()?;
                log::info!("monitor console opened on {}", path.display());
                Ok(Self::new(reader, file))
            }
            #[cfg(unix)]
            ConsoleEndpoint::Unix(path) => {
                let stream = UnixStream::connect(path)?;
                log::info!("monitor console connected to unix:{}", path.display());
                Self::from_unix(stream)
            }
            ConsoleEndpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr)?;
                stream.set_nodelay(true)?;
                log::info!("monitor console connected to tcp:{addr}");
                Self::from_tcp(stream)
            }
            #[allow(unreachable_patterns)]
            other => Err(TransportError::Unsupported(other.clone())),
        }
    }

    #[cfg(unix)]
    pub fn from_unix(stream: UnixStream) -> Result<Self, TransportError> {
        let reader = stream.try_clone()?;
        let control = stream.try_clone()?;
        let mut console = Self::new(reader, stream);
        console.closer = Some(Box::new(move || {
            let _ = control.shutdown(Shutdown::Both);
        }));
        Ok(console)
    }

    pub fn from_tcp(stream: TcpStream) -> Result<Self, TransportError> {
        let reader = stream.try_clone()?;
        let control = stream.try_clone()?;
        let mut console = Self::new(reader, stream);
        console.closer = Some(Box::new(move || {
            let _ = control.shutdown(Shutdown::Both);
        }));
        Ok(console)
    }
}

impl ConsoleTransport for StreamConsole {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    fn read_until(&mut self, marker: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(end) = find(&self.pending, marker) {
                return Ok(self.pending.drain(..end + marker.len()).collect());
            }
            match self.chunks.recv_deadline(deadline) {
                Ok(Ok(chunk)) => self.pending.extend_from_slice(&chunk),
                Ok(Err(e)) => return Err(TransportError::Io(e)),
                Err(RecvTimeoutError::Timeout) => return Err(TransportError::Timeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Closed),
            }
        }
    }
}

impl Drop for StreamConsole {
    fn drop(&mut self) {
        if let Some(close) = self.closer.take() {
            close();
        }
    }
}

/// Reader thread body: forward chunks until EOF, an error, or the console is dropped.
fn pump<R: Read>(mut reader: R, tx: channel::Sender<io::Result<Vec<u8>>>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(Ok(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
    log::debug!("console reader exiting");
}

/// Position of the first occurrence of `needle` in `haystack`.
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
