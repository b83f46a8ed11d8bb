//! # Transport Abstraction
//!
//! A minimal, blocking interface for moving bytes between the client and a
//! remote executor.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: a transport knows nothing about frames, opcodes, or
//!   registration state. It moves opaque buffers.
//! - **Stream, not datagram**: `recv` hands back whatever bytes are
//!   available; framing is the codec's job.
//! - **Orderly teardown**: `shutdown` releases the write side so the far
//!   end observes end-of-stream, and reaps any owned child process.

use std::ffi::OsStr;
use std::io::Read;
use std::io::Write;
use std::net::Shutdown;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::process::Child;
use std::process::ChildStdin;
use std::process::ChildStdout;
use std::process::Command;
use std::process::Stdio;

#[derive(Debug)]
pub enum Error {
    /// The peer is gone or the stream was closed under us.
    ConnectionLost(String),
    /// The command vector could not be spawned.
    Spawn(String),
    /// Generic I/O failure.
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            Self::Spawn(msg) => write!(f, "spawn failed: {}", msg),
            Self::Io(msg) => write!(f, "i/o error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A blocking duplex byte stream.
///
/// Object-safe so the client can own `Box<dyn Transport>` regardless of
/// how the stream was obtained.
pub trait Transport: Send {
    /// Writes the whole payload.
    fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Reads whatever is available into `buf`; `Ok(0)` means end of
    /// stream.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Releases the write side so the far end sees end-of-stream, then
    /// waits for any owned child process to exit.
    fn shutdown(&mut self) -> Result<()>;
}

/// A spawned subprocess speaking the protocol on its stdin/stdout.
///
/// Covers both local children and remote-shell invocations — `ssh host
/// farrun` is just another command vector.
pub struct ChildTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
}

impl ChildTransport {
    /// Spawns an explicit command vector: program plus arguments.
    pub fn spawn<S: AsRef<OsStr>>(argv: &[S]) -> Result<Self> {
        let (program, rest) = argv
            .split_first()
            .ok_or_else(|| Error::Spawn("empty command vector".into()))?;
        let mut child = Command::new(program)
            .args(rest)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Spawn(e.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn("child stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn("child stdout not piped".into()))?;
        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout,
        })
    }
}

impl Transport for ChildTransport {
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::ConnectionLost("write side already released".into()))?;
        stdin.write_all(payload)?;
        stdin.flush()?;
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stdout.read(buf)?)
    }

    fn shutdown(&mut self) -> Result<()> {
        // Dropping stdin closes the pipe; the executor treats that as QUIT.
        // Waiting afterwards is what keeps the child from going zombie.
        self.stdin.take();
        self.child.wait()?;
        Ok(())
    }
}

/// A TCP connection to a named endpoint.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn connect(endpoint: impl ToSocketAddrs) -> Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(endpoint)?,
        })
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.stream.write_all(payload)?;
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stream.read(buf)?)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown(Shutdown::Write)?;
        Ok(())
    }
}

/// Caller-supplied raw read/write primitives.
pub struct IoTransport<R, W> {
    reader: R,
    writer: Option<W>,
}

impl<R, W> IoTransport<R, W>
where
    R: Read + Send,
    W: Write + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer: Some(writer),
        }
    }
}

impl<R, W> Transport for IoTransport<R, W>
where
    R: Read + Send,
    W: Write + Send,
{
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::ConnectionLost("write side already released".into()))?;
        writer.write_all(payload)?;
        writer.flush()?;
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.reader.read(buf)?)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.writer.take();
        Ok(())
    }
}
