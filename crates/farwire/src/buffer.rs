//! Receive-side frame buffer.

use crate::decode::decode;
use crate::types::Error;
use crate::types::Message;
use crate::types::Result;

/// Growable receive buffer that yields complete messages as bytes arrive.
///
/// Consumed bytes are dropped lazily: compaction runs once the dead prefix
/// outgrows the live remainder, so steady traffic does not shift the buffer
/// on every frame.
#[derive(Debug, Default)]
pub struct WireBuffer {
    data: Vec<u8>,
    start: usize,
}

impl WireBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Bytes received but not yet consumed.
    pub fn len(&self) -> usize {
        self.data.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..]
    }

    /// Drops `n` leading unconsumed bytes (preamble handling).
    pub fn consume(&mut self, n: usize) {
        self.start += n.min(self.len());
        self.maybe_compact();
    }

    /// Decodes and consumes the next complete message, if one is present.
    ///
    /// `Ok(None)` means more bytes are needed. Any framing error other than
    /// `Incomplete` is passed through and is fatal to the stream.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        match decode(self.as_slice()) {
            Ok((message, consumed)) => {
                self.start += consumed;
                self.maybe_compact();
                Ok(Some(message))
            }
            Err(Error::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn maybe_compact(&mut self) {
        if self.start > self.data.len() - self.start {
            self.data.drain(..self.start);
            self.start = 0;
        }
    }
}
