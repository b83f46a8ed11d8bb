//! In-memory connected transport pair.
//!
//! Either end speaks `Transport`; an end can also be split into blocking
//! `Read`/`Write` halves to host an in-process executor. This is the
//! loopback surface the integration suites are built on, and it is public
//! because embedding an executor in the same process is a legitimate
//! deployment of its own.

use std::io;
use std::io::Read;
use std::io::Write;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::Sender;

use crate::transport;
use crate::transport::Transport;

/// One end of an in-memory duplex stream.
pub struct DuplexStream {
    tx: Option<Sender<Vec<u8>>>,
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

/// Creates a connected pair; bytes sent on one end arrive on the other.
pub fn pair() -> (DuplexStream, DuplexStream) {
    let (tx_a, rx_a) = mpsc::channel();
    let (tx_b, rx_b) = mpsc::channel();
    let a = DuplexStream {
        tx: Some(tx_a),
        rx: rx_b,
        pending: Vec::new(),
    };
    let b = DuplexStream {
        tx: Some(tx_b),
        rx: rx_a,
        pending: Vec::new(),
    };
    (a, b)
}

impl DuplexStream {
    /// Splits this end into read/write halves, the shape
    /// `Executor::serve` wants.
    pub fn split(self) -> (DuplexReader, DuplexWriter) {
        (
            DuplexReader {
                rx: self.rx,
                pending: self.pending,
            },
            DuplexWriter { tx: self.tx },
        )
    }
}

impl Transport for DuplexStream {
    fn send(&mut self, payload: &[u8]) -> transport::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| transport::Error::ConnectionLost("write side already released".into()))?;
        tx.send(payload.to_vec())
            .map_err(|_| transport::Error::ConnectionLost("peer hung up".into()))
    }

    fn recv(&mut self, buf: &mut [u8]) -> transport::Result<usize> {
        Ok(read_chunked(&mut self.pending, &self.rx, buf))
    }

    fn shutdown(&mut self) -> transport::Result<()> {
        self.tx.take();
        Ok(())
    }
}

/// Read half of a split end.
pub struct DuplexReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for DuplexReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(read_chunked(&mut self.pending, &self.rx, buf))
    }
}

/// Write half of a split end.
pub struct DuplexWriter {
    tx: Option<Sender<Vec<u8>>>,
}

impl Write for DuplexWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.tx {
            Some(tx) if tx.send(buf.to_vec()).is_ok() => Ok(buf.len()),
            _ => Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer hung up")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Copies buffered bytes out, blocking on the channel only when the local
/// stash is empty. Returns 0 at end-of-stream: every sender dropped and
/// nothing left buffered.
fn read_chunked(pending: &mut Vec<u8>, rx: &Receiver<Vec<u8>>, buf: &mut [u8]) -> usize {
    while pending.is_empty() {
        match rx.recv() {
            Ok(chunk) => *pending = chunk,
            Err(_) => return 0,
        }
    }
    let n = pending.len().min(buf.len());
    buf[..n].copy_from_slice(&pending[..n]);
    pending.drain(..n);
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_cross_between_ends() {
        let (mut a, mut b) = pair();
        a.send(b"hello").unwrap();
        let mut buf = [0u8; 16];
        let n = b.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn shutdown_surfaces_as_end_of_stream() {
        let (mut a, mut b) = pair();
        a.send(b"bye").unwrap();
        a.shutdown().unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(b.recv(&mut buf).unwrap(), 3);
        assert_eq!(b.recv(&mut buf).unwrap(), 0);
    }

    #[test]
    fn split_halves_carry_traffic() {
        let (mut a, b) = pair();
        let (mut reader, mut writer) = b.split();

        a.send(b"ping").unwrap();
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        writer.write_all(b"pong").unwrap();
        let n = a.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");
    }
}
