//! # farlink
//!
//! The local half of the farrun system: blocking transports, the RPC
//! client with its connection-scoped registration ledger, and the library
//! bundle interface with the packaged example libraries.

pub mod client;
pub mod duplex;
pub mod handle;
pub mod library;
pub mod libs;
pub mod transport;

pub use client::Client;
pub use handle::StoredHandle;
pub use library::LibraryBundle;
pub use library::LibraryResolver;
pub use library::StaticResolver;
pub use transport::Transport;
