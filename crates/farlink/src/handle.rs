//! Capability handle returned by `Client::bind`.

use crate::client;
use crate::client::Client;

/// A local stand-in for a stored remote procedure.
///
/// Invoking it forwards through the client that registered it; nothing is
/// injected into any namespace, local or remote. The handle is inert data,
/// so it stays valid (and cheap to clone) for the life of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredHandle {
    name: String,
}

impl StoredHandle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Forwards `params` to `client.call` under this handle's name.
    pub fn invoke(&self, client: &mut Client, params: &[&[u8]]) -> client::Result<Vec<Vec<u8>>> {
        client.call(&self.name, params)
    }
}
