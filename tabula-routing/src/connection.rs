//! Connection seams to the transport layer.
//!
//! The routing core never speaks the storage wire protocol. It only needs to
//! build a session to an endpoint, run its handshake, and hand the result to
//! request routers. Request verbs (put, get, traverse) live on the concrete
//! connection type.

use tabula_core::Endpoint;

use crate::error::ConnectError;

/// An initialized session to one tablet or name server.
///
/// Implementations must be `Send + Sync`: a single connection is shared by
/// every routing thread that loads it from a [`ClientHandle`](crate::ClientHandle).
pub trait Connection: Send + Sync + 'static {
    /// The logical server name this session was opened for.
    fn name(&self) -> &str;

    /// The real endpoint this session is connected to.
    fn endpoint(&self) -> &Endpoint;

    /// Releases transport resources early.
    ///
    /// Called when the owning name is removed from a registry. A superseded
    /// connection is not closed by its handle; it is dropped once the last
    /// in-flight reader releases it.
    fn close(&self) {}
}

/// Builds connections and runs their initialization handshake.
///
/// `connect` may block on network I/O, bounded by the connector's own
/// timeout. The registry never calls it while holding its structural lock.
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced.
    type Conn: Connection;

    /// Opens and initializes a session for `name` at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a `ConnectError` if the endpoint refuses, the handshake fails,
    /// or the connector's timeout elapses.
    fn connect(&self, name: &str, endpoint: &Endpoint) -> Result<Self::Conn, ConnectError>;
}
