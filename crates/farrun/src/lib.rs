//! # farrun
//!
//! The remote half of the farrun system: a single-threaded executor that
//! turns one duplex byte stream into an RPC session, compiling and running
//! caller-supplied WebAssembly procedures on demand.
//!
//! The executor owns its registries outright — stored procedures, the set
//! of initialized namespaces, the engine's execution context — so multiple
//! executors in one process share nothing.

pub mod engine;
pub mod executor;

pub use engine::TaskEngine;
pub use executor::Executor;
