//! Client handle - a hot-swappable connection bound to one server name.
//!
//! Partition routes hold handles, not connections. When a name moves to a
//! new endpoint the handle publishes a fresh connection and every route that
//! shares the handle sees it on its next `get`, without being rebuilt.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tabula_core::Endpoint;
use tracing::{debug, warn};

use crate::connection::{Connection, Connector};
use crate::error::{RoutingError, RoutingResult};

/// A named, atomically replaceable connection.
///
/// A handle always holds an initialized connection: it is only constructed
/// from one, and a failed update leaves the published connection in place.
pub struct ClientHandle<C> {
    name: String,
    conn: ArcSwap<C>,
}

impl<C: Connection> ClientHandle<C> {
    /// Creates a handle publishing an already-initialized connection.
    #[must_use]
    pub fn new(name: impl Into<String>, conn: Arc<C>) -> Self {
        Self {
            name: name.into(),
            conn: ArcSwap::new(conn),
        }
    }

    /// Returns the server name this handle is bound to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the currently published connection.
    #[must_use]
    pub fn get(&self) -> Arc<C> {
        self.conn.load_full()
    }

    /// Returns the endpoint of the currently published connection.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        self.conn.load().endpoint().clone()
    }

    /// Connects to `endpoint` and publishes the new connection.
    ///
    /// The handshake runs before anything is published, so readers keep
    /// using the previous connection until the new one is ready.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::SessionInit` if the connector fails. The
    /// previously published connection is left untouched.
    pub fn update<K>(&self, connector: &K, endpoint: &Endpoint) -> RoutingResult<()>
    where
        K: Connector<Conn = C>,
    {
        let conn = connector.connect(&self.name, endpoint).map_err(|source| {
            warn!(name = %self.name, %endpoint, error = %source, "session init failed, keeping previous connection");
            RoutingError::SessionInit {
                name: self.name.clone(),
                endpoint: endpoint.clone(),
                source,
            }
        })?;

        let previous = self.publish(Arc::new(conn));
        debug!(
            name = %self.name,
            from = %previous.endpoint(),
            to = %endpoint,
            "published new connection"
        );
        Ok(())
    }

    /// Publishes a pre-built connection and returns the one it replaced.
    ///
    /// The superseded connection is not closed: in-flight readers may still
    /// hold it. It is released when the last reference is dropped.
    pub fn publish(&self, conn: Arc<C>) -> Arc<C> {
        self.conn.swap(conn)
    }
}

impl<C: Connection> fmt::Debug for ClientHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("name", &self.name)
            .field("endpoint", self.conn.load().endpoint())
            .finish()
    }
}
