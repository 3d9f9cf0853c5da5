//! Socket identifiers and the per-process socket registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tracing::debug;
use url::Url;

use crate::error::SocketError;
use crate::http_client::HttpClient;
use crate::socket::HttpSocket;

/// Opaque server-assigned connection identifier.
///
/// Assigned during session establishment, which happens out of band for
/// this crate, and echoed in every POST body as `id=<...>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketId(String);

impl SocketId {
    /// Wrap a server-assigned identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SocketId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Factory and registry for HTTP messaging sockets.
///
/// Owns the HTTP backend shared by every socket it creates and tracks the
/// sockets that are still open; a socket removes itself on close. The
/// inbound XML parsing every socket relies on lives in [`crate::wire`] and
/// is hardened there: no external entity, DTD, or schema is ever fetched.
pub struct HttpSocketContext<C: HttpClient> {
    client: C,
    sockets: Mutex<BTreeMap<SocketId, HttpSocket<C>>>,
}

impl<C: HttpClient> HttpSocketContext<C> {
    /// Create a context around an HTTP backend.
    #[must_use]
    pub fn new(client: C) -> Arc<Self> {
        Arc::new(Self {
            client,
            sockets: Mutex::new(BTreeMap::new()),
        })
    }

    pub(crate) fn client(&self) -> &C {
        &self.client
    }

    /// Create and register a socket for an established session.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::DuplicateSocket`] when `id` is already
    /// registered.
    pub fn socket(
        self: &Arc<Self>,
        id: SocketId,
        connect_time: SystemTime,
        endpoint: Url,
    ) -> Result<HttpSocket<C>, SocketError> {
        let mut sockets = self.sockets.lock().unwrap();
        if sockets.contains_key(&id) {
            return Err(SocketError::DuplicateSocket { id });
        }
        debug!(%id, endpoint = endpoint.as_str(), "registering socket");
        let socket = HttpSocket::new(self, id.clone(), connect_time, endpoint);
        sockets.insert(id, socket.clone());
        Ok(socket)
    }

    /// Look up a registered socket.
    #[must_use]
    pub fn get(&self, id: &SocketId) -> Option<HttpSocket<C>> {
        self.sockets.lock().unwrap().get(id).cloned()
    }

    /// Number of sockets currently registered.
    #[must_use]
    pub fn socket_count(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    pub(crate) fn remove(&self, id: &SocketId) {
        if self.sockets.lock().unwrap().remove(id).is_some() {
            debug!(%id, "deregistered socket");
        }
    }

    /// Close every registered socket.
    pub fn close(&self) {
        let sockets: Vec<HttpSocket<C>> =
            self.sockets.lock().unwrap().values().cloned().collect();
        for socket in sockets {
            socket.close();
        }
    }
}

impl<C: HttpClient> fmt::Debug for HttpSocketContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSocketContext")
            .field("sockets", &self.socket_count())
            .finish_non_exhaustive()
    }
}
