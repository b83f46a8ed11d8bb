//! # RPC Client
//!
//! The local half of a farrun session. Owns the transport, writes the
//! bootstrap preamble on construction, then issues strictly one request at
//! a time, blocking until the matching response frame decodes.
//!
//! ## Invariants
//!
//! - The registration ledger changes only after a remote OK; a DIED batch
//!   leaves it untouched.
//! - Local pre-checks (duplicate store, calling an unregistered name) fail
//!   without writing a byte to the transport.
//! - A DIED response leaves the connection fully usable; framing and
//!   transport failures do not.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::net::ToSocketAddrs;

use tracing::debug;

use farwire::BOOTSTRAP;
use farwire::Message;
use farwire::Opcode;
use farwire::WireBuffer;
use farwire::encode;

use crate::handle::StoredHandle;
use crate::library;
use crate::library::LibraryResolver;
use crate::transport;
use crate::transport::ChildTransport;
use crate::transport::TcpTransport;
use crate::transport::Transport;

#[derive(Debug)]
pub enum Error {
    /// The remote executor answered DIED. Recoverable: the connection
    /// remains usable.
    Remote(String),
    /// The response was not a frame this client understands. Fatal.
    Protocol(String),
    /// Framing failure on received bytes. Fatal.
    Frame(farwire::Error),
    /// Transport failure. Fatal.
    Transport(transport::Error),
    /// The stream ended before a full response arrived. Fatal.
    Disconnected,
    /// The name is already registered on this connection.
    DuplicateStored(String),
    /// The name was never registered on this connection.
    NotStored(String),
    /// Library resolution or selection failure.
    Library(library::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(msg) => write!(f, "remote failure: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            Self::Frame(e) => write!(f, "framing error: {}", e),
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::Disconnected => write!(f, "stream closed before a response arrived"),
            Self::DuplicateStored(name) => write!(f, "duplicate stored function '{}'", name),
            Self::NotStored(name) => {
                write!(f, "no stored function '{}' on this connection", name)
            }
            Self::Library(e) => write!(f, "library error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<farwire::Error> for Error {
    fn from(e: farwire::Error) -> Self {
        Self::Frame(e)
    }
}

impl From<library::Error> for Error {
    fn from(e: library::Error) -> Self {
        Self::Library(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Namespace used for plain STORE registrations in the ledger.
const DEFAULT_NAMESPACE: &str = "";

/// One connection to one remote executor.
pub struct Client {
    transport: Box<dyn Transport>,
    rx: WireBuffer,
    /// `(namespace, name)` pairs confirmed registered on the remote side.
    stored: HashSet<(String, String)>,
    /// Namespaces whose initializer this connection has already shipped.
    loaded: HashSet<String>,
    closed: bool,
}

impl Client {
    /// Takes an established transport and immediately writes the bootstrap
    /// preamble. Fire-and-forget: no acknowledgement is expected.
    pub fn new(mut transport: Box<dyn Transport>) -> Result<Self> {
        transport.send(BOOTSTRAP)?;
        Ok(Self {
            transport,
            rx: WireBuffer::new(),
            stored: HashSet::new(),
            loaded: HashSet::new(),
            closed: false,
        })
    }

    /// Spawns a command vector and connects over its stdio.
    pub fn spawn<S: AsRef<OsStr>>(argv: &[S]) -> Result<Self> {
        Self::new(Box::new(ChildTransport::spawn(argv)?))
    }

    /// Connects to a named TCP endpoint.
    pub fn connect(endpoint: impl ToSocketAddrs) -> Result<Self> {
        Self::new(Box::new(TcpTransport::connect(endpoint)?))
    }

    /// Compiles and runs `code` remotely; the full emitted result list.
    pub fn eval(&mut self, code: &str, params: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        debug!(code_bytes = code.len(), params = params.len(), "eval");
        let mut args = Vec::with_capacity(params.len() + 1);
        args.push(code.as_bytes().to_vec());
        args.extend(params.iter().map(|p| p.to_vec()));
        let response = self.round_trip(&Message::new(Opcode::Eval, args))?;
        expect_returned(response)
    }

    /// First result only; the rest are discarded.
    pub fn eval_one(&mut self, code: &str, params: &[&[u8]]) -> Result<Option<Vec<u8>>> {
        Ok(self.eval(code, params)?.into_iter().next())
    }

    /// Registers a batch of name/source pairs remotely.
    ///
    /// A name already in the ledger fails here, locally, before anything
    /// is sent: the remote outcome (a DIED batch) would be strictly worse.
    pub fn store(&mut self, pairs: &[(&str, &str)]) -> Result<()> {
        for (name, _) in pairs {
            if self.is_stored(name) {
                return Err(Error::DuplicateStored((*name).to_string()));
            }
        }
        debug!(count = pairs.len(), "store");
        let mut args = Vec::with_capacity(pairs.len() * 2);
        for (name, code) in pairs {
            args.push(name.as_bytes().to_vec());
            args.push(code.as_bytes().to_vec());
        }
        let response = self.round_trip(&Message::new(Opcode::Store, args))?;
        expect_ok(response)?;
        for (name, _) in pairs {
            self.stored
                .insert((DEFAULT_NAMESPACE.to_string(), (*name).to_string()));
        }
        Ok(())
    }

    /// Invokes a stored procedure; the full emitted result list.
    pub fn call(&mut self, name: &str, params: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        if !self.is_stored(name) {
            return Err(Error::NotStored(name.to_string()));
        }
        debug!(%name, params = params.len(), "call");
        let mut args = Vec::with_capacity(params.len() + 1);
        args.push(name.as_bytes().to_vec());
        args.extend(params.iter().map(|p| p.to_vec()));
        let response = self.round_trip(&Message::new(Opcode::Call, args))?;
        expect_returned(response)
    }

    /// First result only; the rest are discarded.
    pub fn call_one(&mut self, name: &str, params: &[&[u8]]) -> Result<Option<Vec<u8>>> {
        Ok(self.call(name, params)?.into_iter().next())
    }

    /// Stores `code` under `name` and returns a handle that forwards
    /// invocation back through this client.
    pub fn bind(&mut self, name: &str, code: &str) -> Result<StoredHandle> {
        self.store(&[(name, code)])?;
        Ok(StoredHandle::new(name))
    }

    /// Loads a library bundle (all of it, or only `requested` names) into
    /// its namespace on the remote side.
    ///
    /// Reloading is idempotent: the initializer is never re-sent, names
    /// the ledger already holds never go back on the wire, and a load with
    /// nothing left to say is free of any round trip.
    pub fn use_library(
        &mut self,
        resolver: &dyn LibraryResolver,
        name: &str,
        requested: &[&str],
    ) -> Result<()> {
        let bundle = library::select(resolver.resolve(name)?, requested)?;
        let namespace = bundle.classname.clone();
        let reloading = self.loaded.contains(&namespace);

        let init = if reloading { None } else { bundle.init.clone() };
        let fresh: Vec<(String, String)> = bundle
            .functions
            .iter()
            .filter(|(n, _)| !self.stored.contains(&(namespace.clone(), n.clone())))
            .cloned()
            .collect();

        if fresh.is_empty() && init.is_none() {
            debug!(%namespace, "library already loaded, nothing to send");
            self.loaded.insert(namespace);
            return Ok(());
        }

        debug!(%namespace, fresh = fresh.len(), init = init.is_some(), "use_library");
        let mut args = Vec::with_capacity(fresh.len() * 2 + 2);
        args.push(namespace.as_bytes().to_vec());
        args.push(init.unwrap_or_default().into_bytes());
        for (fname, code) in &fresh {
            args.push(fname.as_bytes().to_vec());
            args.push(code.as_bytes().to_vec());
        }
        let response = self.round_trip(&Message::new(Opcode::StorePkg, args))?;
        expect_ok(response)?;

        self.loaded.insert(namespace.clone());
        for (fname, _) in fresh {
            self.stored.insert((namespace.clone(), fname));
        }
        Ok(())
    }

    /// Sends QUIT and releases the transport, waiting for any spawned
    /// process to exit.
    pub fn close(mut self) -> Result<()> {
        self.shutdown_inner()
    }

    /// The remote registry is flat, so a name matches under any namespace.
    fn is_stored(&self, name: &str) -> bool {
        self.stored.iter().any(|(_, n)| n == name)
    }

    fn round_trip(&mut self, request: &Message) -> Result<Message> {
        self.transport.send(&encode(request))?;
        self.read_response()
    }

    fn read_response(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = self.rx.next_message()? {
                return Ok(message);
            }
            let mut chunk = [0u8; 4096];
            let n = self.transport.recv(&mut chunk)?;
            if n == 0 {
                return Err(Error::Disconnected);
            }
            self.rx.extend(&chunk[..n]);
        }
    }

    fn shutdown_inner(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.transport
            .send(&encode(&Message::new(Opcode::Quit, Vec::new())))?;
        self.transport.shutdown()?;
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Best effort; errors here have nowhere to go.
        let _ = self.shutdown_inner();
    }
}

/// RETURNED gives its args back; DIED is a remote failure; anything else
/// is a protocol violation and fatal.
fn expect_returned(response: Message) -> Result<Vec<Vec<u8>>> {
    match response.opcode() {
        Some(Opcode::Returned) => Ok(response.into_args()),
        Some(Opcode::Died) => Err(Error::Remote(diagnostic(&response))),
        _ => Err(Error::Protocol(format!(
            "expected RETURNED or DIED, got '{}'",
            String::from_utf8_lossy(response.token())
        ))),
    }
}

fn expect_ok(response: Message) -> Result<()> {
    match response.opcode() {
        Some(Opcode::Ok) => Ok(()),
        Some(Opcode::Died) => Err(Error::Remote(diagnostic(&response))),
        _ => Err(Error::Protocol(format!(
            "expected OK or DIED, got '{}'",
            String::from_utf8_lossy(response.token())
        ))),
    }
}

fn diagnostic(response: &Message) -> String {
    response
        .args()
        .first()
        .map(|d| String::from_utf8_lossy(d).into_owned())
        .unwrap_or_else(|| "remote died without a diagnostic".to_string())
}
