//! # farwire
//!
//! The farrun wire protocol: a compact, self-describing framing format for
//! request/response messages over any byte stream.
//!
//! ## Invariants
//!
//! - **Binary safety**: argument payloads are length-prefixed, never
//!   delimiter-scanned, so any byte value may appear inside them.
//! - **Restartable decoding**: `decode` on a strict prefix of a valid frame
//!   reports `Error::Incomplete` and consumes nothing; the caller buffers
//!   more bytes and retries.
//! - **Fail-fast framing**: a count or length line that completes as
//!   something other than a plain decimal is fatal, not retryable.

pub mod buffer;
pub mod decode;
pub mod encode;
pub mod types;

pub use types::Error;
pub use types::Message;
pub use types::Opcode;
pub use types::Result;
pub use types::BOOTSTRAP;

pub use buffer::WireBuffer;
pub use decode::decode;
pub use encode::encode;

#[cfg(test)]
mod tests;
