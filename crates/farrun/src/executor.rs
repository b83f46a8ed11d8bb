//! # Remote Executor
//!
//! The dispatch loop that turns one duplex byte stream into an RPC
//! session: await one frame, dispatch on its opcode, write exactly one
//! response, repeat until QUIT or end-of-stream.
//!
//! ## Invariants
//!
//! - Exactly one response per request, written only after the request
//!   frame was fully consumed — a DIED response never desynchronizes the
//!   stream.
//! - A namespace initializer that has run is never re-run for the life of
//!   the executor, whatever later batches do.
//! - Registries are instance state; two executors in one process share
//!   nothing.

use std::collections::HashMap;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;

use tracing::debug;
use tracing::warn;

use farwire::BOOTSTRAP;
use farwire::Message;
use farwire::Opcode;
use farwire::WireBuffer;

use crate::engine;
use crate::engine::Proc;
use crate::engine::TaskEngine;

#[derive(Debug)]
pub enum Error {
    /// The stream opened with something other than the bootstrap preamble.
    BadBootstrap,
    /// The stream closed in the middle of a frame or the preamble.
    TruncatedStream,
    /// Unrecoverable framing failure.
    Frame(farwire::Error),
    /// Transport-level I/O failure.
    Io(std::io::Error),
    /// The task engine could not be constructed.
    Engine(engine::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadBootstrap => write!(f, "stream did not begin with the bootstrap preamble"),
            Self::TruncatedStream => write!(f, "stream closed mid-frame"),
            Self::Frame(e) => write!(f, "framing error: {}", e),
            Self::Io(e) => write!(f, "i/o error: {}", e),
            Self::Engine(e) => write!(f, "engine error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<farwire::Error> for Error {
    fn from(e: farwire::Error) -> Self {
        Self::Frame(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// What one dispatched request asks of the loop.
enum Step {
    Reply(Message),
    Quit,
}

/// One RPC session's worth of state: the engine, the flat stored-procedure
/// registry, and the set of namespaces whose initializer has run.
pub struct Executor {
    engine: TaskEngine,
    procs: HashMap<String, Proc>,
    initialized: HashSet<String>,
}

impl Executor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            engine: TaskEngine::new().map_err(Error::Engine)?,
            procs: HashMap::new(),
            initialized: HashSet::new(),
        })
    }

    /// Serves one session: consumes the bootstrap preamble, then loops
    /// until an explicit QUIT or the peer closes its write side (treated
    /// identically).
    pub fn serve<R: Read, W: Write>(&mut self, mut reader: R, mut writer: W) -> Result<()> {
        let mut rx = WireBuffer::new();
        await_bootstrap(&mut reader, &mut rx)?;

        loop {
            let message = match rx.next_message()? {
                Some(message) => message,
                None => {
                    if fill(&mut reader, &mut rx)? {
                        continue;
                    }
                    if rx.is_empty() {
                        // End-of-stream between frames is an implicit QUIT.
                        debug!("peer closed stream, session over");
                        return Ok(());
                    }
                    return Err(Error::TruncatedStream);
                }
            };

            match self.dispatch(message) {
                Step::Reply(reply) => {
                    writer.write_all(&farwire::encode(&reply))?;
                    writer.flush()?;
                }
                Step::Quit => {
                    debug!("explicit QUIT, session over");
                    return Ok(());
                }
            }
        }
    }

    fn dispatch(&mut self, message: Message) -> Step {
        debug!(op = %String::from_utf8_lossy(message.token()), args = message.args().len(), "dispatch");
        match message.opcode() {
            Some(Opcode::Eval) => Step::Reply(self.on_eval(message.into_args())),
            Some(Opcode::Store) => Step::Reply(self.on_store(message.into_args())),
            Some(Opcode::StorePkg) => Step::Reply(self.on_store_pkg(message.into_args())),
            Some(Opcode::Call) => Step::Reply(self.on_call(message.into_args())),
            Some(Opcode::Quit) => Step::Quit,
            // Response opcodes are no more meaningful as requests than a
            // token we have never heard of.
            Some(Opcode::Returned) | Some(Opcode::Ok) | Some(Opcode::Died) | None => {
                warn!(token = %String::from_utf8_lossy(message.token()), "unknown message");
                Step::Reply(died("unknown message"))
            }
        }
    }

    fn on_eval(&mut self, mut args: Vec<Vec<u8>>) -> Message {
        if args.is_empty() {
            return died("EVAL needs a code argument");
        }
        let code = args.remove(0);
        let proc = match self.engine.compile(&code) {
            Ok(proc) => proc,
            Err(e) => return died(&e.to_string()),
        };
        match self.engine.invoke(&proc, &args) {
            Ok(results) => Message::new(Opcode::Returned, results),
            Err(e) => died(&e.to_string()),
        }
    }

    fn on_store(&mut self, args: Vec<Vec<u8>>) -> Message {
        match self.compile_pairs(&args) {
            Ok(batch) => {
                self.commit(batch);
                Message::new(Opcode::Ok, Vec::new())
            }
            Err(reply) => reply,
        }
    }

    fn on_store_pkg(&mut self, mut args: Vec<Vec<u8>>) -> Message {
        if args.len() < 2 {
            return died("STOREPKG needs a namespace and an initializer");
        }
        let pairs = args.split_off(2);
        let init = args.pop().unwrap_or_default();
        let namespace = match String::from_utf8(args.pop().unwrap_or_default()) {
            Ok(ns) if !ns.is_empty() => ns,
            _ => return died("bad namespace name"),
        };

        if !self.initialized.contains(&namespace) {
            if !init.is_empty() {
                let proc = match self.engine.compile(&init) {
                    Ok(proc) => proc,
                    Err(engine::Error::Compile(msg)) => {
                        return died(&format!("while compiling namespace '{}': {}", namespace, msg));
                    }
                    Err(e) => return died(&e.to_string()),
                };
                if let Err(e) = self.engine.invoke(&proc, &[]) {
                    // The initializer never completed; the namespace stays
                    // uninitialized so a later attempt may retry it.
                    return died(&e.to_string());
                }
            }
            debug!(%namespace, "namespace initialized");
            self.initialized.insert(namespace);
        }

        match self.compile_pairs(&pairs) {
            Ok(batch) => {
                self.commit(batch);
                Message::new(Opcode::Ok, Vec::new())
            }
            Err(reply) => reply,
        }
    }

    fn on_call(&mut self, mut args: Vec<Vec<u8>>) -> Message {
        if args.is_empty() {
            return died("CALL needs a procedure name");
        }
        let name = args.remove(0);
        let name = String::from_utf8_lossy(&name);
        let Some(proc) = self.procs.get(name.as_ref()) else {
            return died(&format!("no such stored procedure '{}'", name));
        };
        match self.engine.invoke(proc, &args) {
            Ok(results) => Message::new(Opcode::Returned, results),
            Err(e) => died(&e.to_string()),
        }
    }

    /// Compiles name/code pairs without touching the registry, so a
    /// failing batch commits nothing.
    fn compile_pairs(
        &mut self,
        pairs: &[Vec<u8>],
    ) -> std::result::Result<Vec<(String, Proc)>, Message> {
        if pairs.len() % 2 != 0 {
            return Err(died("odd name/code pair count"));
        }
        let mut batch = Vec::with_capacity(pairs.len() / 2);
        for pair in pairs.chunks_exact(2) {
            let name = match std::str::from_utf8(&pair[0]) {
                Ok(name) if !name.is_empty() => name.to_string(),
                _ => return Err(died("bad procedure name")),
            };
            match self.engine.compile(&pair[1]) {
                Ok(proc) => batch.push((name, proc)),
                Err(engine::Error::Compile(msg)) => {
                    return Err(died(&format!("while compiling '{}': {}", name, msg)));
                }
                Err(e) => return Err(died(&e.to_string())),
            }
        }
        Ok(batch)
    }

    /// Re-registering a name silently replaces it (idempotent re-store).
    fn commit(&mut self, batch: Vec<(String, Proc)>) {
        for (name, proc) in batch {
            self.procs.insert(name, proc);
        }
    }
}

fn died(diagnostic: &str) -> Message {
    Message::new(Opcode::Died, vec![diagnostic.as_bytes().to_vec()])
}

/// Reads and verifies the connection preamble. Short reads are compared as
/// they arrive so a wrong peer fails fast instead of blocking for the
/// whole preamble length.
fn await_bootstrap<R: Read>(reader: &mut R, rx: &mut WireBuffer) -> Result<()> {
    loop {
        let have = rx.as_slice();
        if have.len() >= BOOTSTRAP.len() {
            break;
        }
        if !BOOTSTRAP.starts_with(have) {
            return Err(Error::BadBootstrap);
        }
        if !fill(reader, rx)? {
            return Err(Error::TruncatedStream);
        }
    }
    if &rx.as_slice()[..BOOTSTRAP.len()] != BOOTSTRAP {
        return Err(Error::BadBootstrap);
    }
    rx.consume(BOOTSTRAP.len());
    Ok(())
}

/// Pulls one chunk off the stream into the buffer; `false` at end-of-stream.
fn fill<R: Read>(reader: &mut R, rx: &mut WireBuffer) -> Result<bool> {
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(false),
            Ok(n) => {
                rx.extend(&chunk[..n]);
                return Ok(true);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
