//! Registry - process-wide server name → connection map.
//!
//! The registry resolves logical server names to live connections and keeps
//! them current as the coordination service reports topology changes.
//!
//! # Locking
//!
//! One structural lock guards the two maps (name → addresses, name →
//! handle). It is held only to look up, insert or erase shared references.
//! Handshakes run outside it: a reconcile reads what it needs, releases the
//! lock, connects, and takes the lock again only to publish the result.
//! Swapping a handle's connection needs no structural lock at all.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tabula_core::Endpoint;
use tracing::{debug, info, warn};

use crate::client_handle::ClientHandle;
use crate::config::RegistryConfig;
use crate::connection::{Connection, Connector};
use crate::error::{RoutingError, RoutingResult};
use crate::resolver::{IdentityResolver, Resolver};

/// Addresses known for one server name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddrs {
    /// Internal endpoint used for routing.
    pub real: Endpoint,
    /// Externally-facing endpoint, if the server advertises one.
    pub external: Option<Endpoint>,
}

struct Maps<C> {
    addrs: HashMap<String, ServerAddrs>,
    clients: HashMap<String, Arc<ClientHandle<C>>>,
}

/// What a single reconcile entry did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Applied,
    Unchanged,
}

/// What `insert` does when the name was registered while connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnConflict {
    /// Keep the registered connection and close the new one.
    Keep,
    /// Publish the new connection into the registered handle.
    Replace,
}

/// Per-name outcome of a `reconcile`, `refresh` or `install` batch.
#[derive(Debug, Default)]
#[must_use]
pub struct ReconcileReport {
    /// Names whose connection was created or replaced.
    pub applied: Vec<String>,
    /// Names already connected to the requested endpoint.
    pub unchanged: Vec<String>,
    /// Names that failed, with the reason. Their previous state is intact.
    pub failed: Vec<(String, RoutingError)>,
}

impl ReconcileReport {
    fn record(&mut self, name: &str, result: RoutingResult<Outcome>) {
        match result {
            Ok(Outcome::Applied) => self.applied.push(name.to_string()),
            Ok(Outcome::Unchanged) => self.unchanged.push(name.to_string()),
            Err(e) => self.failed.push((name.to_string(), e)),
        }
    }

    /// Returns true if no entry failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Returns the number of entries in the batch.
    #[must_use]
    pub fn total(&self) -> usize {
        self.applied.len() + self.unchanged.len() + self.failed.len()
    }

    /// Collapses the report into a single result.
    ///
    /// # Errors
    /// Returns `RoutingError::PartialBatch` if any entry failed.
    pub fn into_result(self) -> RoutingResult<()> {
        if self.failed.is_empty() {
            Ok(())
        } else {
            Err(RoutingError::PartialBatch {
                failed: self.failed.len(),
                total: self.total(),
            })
        }
    }
}

/// Name → connection registry shared by every table in the process.
pub struct Registry<K: Connector> {
    connector: K,
    resolver: Arc<dyn Resolver>,
    config: RegistryConfig,
    maps: Mutex<Maps<K::Conn>>,
}

impl<K: Connector> Registry<K> {
    /// Creates a registry.
    ///
    /// # Errors
    /// Returns `RoutingError::Config` if the configuration is invalid.
    pub fn new(
        connector: K,
        resolver: Arc<dyn Resolver>,
        config: RegistryConfig,
    ) -> RoutingResult<Self> {
        config.validate()?;
        Ok(Self {
            connector,
            resolver,
            config,
            maps: Mutex::new(Maps {
                addrs: HashMap::new(),
                clients: HashMap::new(),
            }),
        })
    }

    /// Creates a registry with no name aliases and default configuration.
    #[must_use]
    pub fn with_connector(connector: K) -> Self {
        Self {
            connector,
            resolver: Arc::new(IdentityResolver),
            config: RegistryConfig::default(),
            maps: Mutex::new(Maps {
                addrs: HashMap::new(),
                clients: HashMap::new(),
            }),
        }
    }

    /// Returns the connector used for new sessions.
    #[must_use]
    pub const fn connector(&self) -> &K {
        &self.connector
    }

    /// Returns the handle registered for `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<ClientHandle<K::Conn>>> {
        self.maps.lock().clients.get(name).cloned()
    }

    /// Returns the real endpoint last recorded for `name`.
    #[must_use]
    pub fn endpoint(&self, name: &str) -> Option<Endpoint> {
        self.maps.lock().addrs.get(name).map(|a| a.real.clone())
    }

    /// Returns the external endpoint recorded for `name`.
    #[must_use]
    pub fn external_endpoint(&self, name: &str) -> Option<Endpoint> {
        self.maps.lock().addrs.get(name).and_then(|a| a.external.clone())
    }

    /// Returns both addresses recorded for `name`.
    #[must_use]
    pub fn addrs(&self, name: &str) -> Option<ServerAddrs> {
        self.maps.lock().addrs.get(name).cloned()
    }

    /// Records the externally-facing endpoint for a registered name.
    ///
    /// # Errors
    /// Returns `RoutingError::UnknownName` if `name` is not registered.
    pub fn set_external_endpoint(&self, name: &str, endpoint: Endpoint) -> RoutingResult<()> {
        let mut maps = self.maps.lock();
        let addrs = maps
            .addrs
            .get_mut(name)
            .ok_or_else(|| RoutingError::UnknownName {
                name: name.to_string(),
            })?;
        addrs.external = Some(endpoint);
        Ok(())
    }

    /// Returns all registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.maps.lock().clients.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of registered names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.maps.lock().clients.len()
    }

    /// Returns true if no names are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.maps.lock().clients.is_empty()
    }

    /// Resolves a logical name to the endpoint that should serve it.
    ///
    /// A published alias wins; with none, the name is its own endpoint.
    ///
    /// # Errors
    /// Returns `RoutingError::InvalidEndpoint` if the name is empty.
    pub fn resolve_endpoint(&self, name: &str) -> RoutingResult<Endpoint> {
        match self.resolver.resolve(name) {
            Some(endpoint) => Ok(endpoint),
            None => Endpoint::new(name).map_err(|source| RoutingError::InvalidEndpoint {
                name: name.to_string(),
                source,
            }),
        }
    }

    /// Returns the handle for `name`, connecting on first resolution.
    ///
    /// # Errors
    /// Returns an error if the name cannot be resolved, the registry is full,
    /// or the handshake fails.
    pub fn resolve(&self, name: &str) -> RoutingResult<Arc<ClientHandle<K::Conn>>> {
        if let Some(handle) = self.lookup(name) {
            return Ok(handle);
        }
        let endpoint = self.resolve_endpoint(name)?;
        self.admit(name)?;
        let conn = self.connect(name, &endpoint)?;
        self.insert(name, Arc::new(conn), OnConflict::Keep)
    }

    /// Brings every listed name in line with its endpoint.
    ///
    /// Entries are independent: a failing handshake is recorded in the report
    /// and the batch continues. A failed name keeps its previous connection;
    /// unlisted names are untouched.
    pub fn reconcile<I, N, E>(&self, endpoints: I) -> ReconcileReport
    where
        I: IntoIterator<Item = (N, E)>,
        N: AsRef<str>,
        E: AsRef<str>,
    {
        let mut report = ReconcileReport::default();
        for (name, endpoint) in endpoints {
            let name = name.as_ref();
            let result = Endpoint::new(endpoint.as_ref())
                .map_err(|source| RoutingError::InvalidEndpoint {
                    name: name.to_string(),
                    source,
                })
                .and_then(|endpoint| self.reconcile_one(name, endpoint));
            report.record(name, result);
        }
        Self::log_report("reconcile", &report);
        report
    }

    /// Resolves each name through the resolver and reconciles the result.
    ///
    /// The external endpoint is taken from the resolver for every name that
    /// ends up registered; a withdrawn one is cleared.
    pub fn refresh<I, N>(&self, names: I) -> ReconcileReport
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        let mut report = ReconcileReport::default();
        for name in names {
            let name = name.as_ref();
            let result = self
                .resolve_endpoint(name)
                .and_then(|endpoint| self.reconcile_one(name, endpoint));
            if result.is_ok() {
                self.record_external(name, self.resolver.resolve_external(name));
            }
            report.record(name, result);
        }
        Self::log_report("refresh", &report);
        report
    }

    /// Publishes pre-built, initialized connections without a handshake.
    ///
    /// Existing handles are updated in place; unknown names get new handles.
    /// An entry fails if its connection is bound to another name or the name
    /// limit is reached.
    pub fn install<I, N>(&self, connections: I) -> ReconcileReport
    where
        I: IntoIterator<Item = (N, Arc<K::Conn>)>,
        N: AsRef<str>,
    {
        let mut report = ReconcileReport::default();
        for (name, conn) in connections {
            let name = name.as_ref();
            if conn.name() != name {
                warn!(name, actual = conn.name(), "connection installed under wrong name");
                report.record(
                    name,
                    Err(RoutingError::NameMismatch {
                        name: name.to_string(),
                        actual: conn.name().to_string(),
                    }),
                );
                continue;
            }
            let result = match self.lookup(name) {
                Some(handle) => {
                    let endpoint = conn.endpoint().clone();
                    drop(handle.publish(conn));
                    self.record_endpoint(name, endpoint);
                    Ok(Outcome::Applied)
                }
                None => self
                    .admit(name)
                    .and_then(|()| self.insert(name, conn, OnConflict::Replace))
                    .map(|_| Outcome::Applied),
            };
            report.record(name, result);
        }
        Self::log_report("install", &report);
        report
    }

    /// Erases `name` and closes its current connection.
    ///
    /// Routes still holding the handle keep it alive, with a closed
    /// connection, until they are rebuilt.
    pub fn remove(&self, name: &str) -> Option<Arc<ClientHandle<K::Conn>>> {
        let handle = {
            let mut maps = self.maps.lock();
            maps.addrs.remove(name);
            maps.clients.remove(name)
        }?;
        handle.get().close();
        info!(name, "removed server from registry");
        Some(handle)
    }

    fn reconcile_one(&self, name: &str, endpoint: Endpoint) -> RoutingResult<Outcome> {
        if let Some(handle) = self.lookup(name) {
            if self.config.skip_unchanged && handle.endpoint() == endpoint {
                debug!(name, %endpoint, "endpoint unchanged, keeping connection");
                return Ok(Outcome::Unchanged);
            }
            handle.update(&self.connector, &endpoint)?;
            self.record_endpoint(name, handle.endpoint());
            info!(name, %endpoint, "server moved to new endpoint");
            return Ok(Outcome::Applied);
        }

        self.admit(name)?;
        let conn = self.connect(name, &endpoint)?;
        self.insert(name, Arc::new(conn), OnConflict::Replace)?;
        Ok(Outcome::Applied)
    }

    fn connect(&self, name: &str, endpoint: &Endpoint) -> RoutingResult<K::Conn> {
        self.connector.connect(name, endpoint).map_err(|source| {
            warn!(name, %endpoint, error = %source, "session init failed");
            RoutingError::SessionInit {
                name: name.to_string(),
                endpoint: endpoint.clone(),
                source,
            }
        })
    }

    /// Rejects a new name once the registry is full.
    fn admit(&self, name: &str) -> RoutingResult<()> {
        let maps = self.maps.lock();
        Self::check_capacity(&maps, name, self.config.max_names)
    }

    fn check_capacity(maps: &Maps<K::Conn>, name: &str, max_names: u32) -> RoutingResult<()> {
        let count = maps.clients.len();
        if !maps.clients.contains_key(name) && count >= max_names as usize {
            return Err(RoutingError::Core(tabula_core::Error::LimitExceeded {
                limit: "max_names",
                max: u64::from(max_names),
                actual: count as u64 + 1,
            }));
        }
        Ok(())
    }

    /// Publishes a freshly connected session under `name`.
    ///
    /// If another thread registered the name while this one was connecting,
    /// `on_conflict` decides whose connection the handle keeps. A lazy
    /// resolution must not overwrite a reconcile that finished first.
    fn insert(
        &self,
        name: &str,
        conn: Arc<K::Conn>,
        on_conflict: OnConflict,
    ) -> RoutingResult<Arc<ClientHandle<K::Conn>>> {
        let endpoint = conn.endpoint().clone();
        let mut maps = self.maps.lock();

        if let Some(handle) = maps.clients.get(name).cloned() {
            match on_conflict {
                OnConflict::Keep => {
                    drop(maps);
                    conn.close();
                    debug!(name, %endpoint, "name registered concurrently, dropping new session");
                }
                OnConflict::Replace => {
                    let superseded = handle.publish(conn);
                    Self::set_real(&mut maps, name, endpoint);
                    drop(maps);
                    drop(superseded);
                    debug!(name, "replaced concurrently registered connection");
                }
            }
            return Ok(handle);
        }

        Self::check_capacity(&maps, name, self.config.max_names)?;
        let handle = Arc::new(ClientHandle::new(name, conn));
        maps.clients.insert(name.to_string(), Arc::clone(&handle));
        Self::set_real(&mut maps, name, endpoint.clone());
        drop(maps);

        info!(name, %endpoint, "registered new server");
        Ok(handle)
    }

    fn record_endpoint(&self, name: &str, endpoint: Endpoint) {
        let mut maps = self.maps.lock();
        // A concurrent remove wins.
        if maps.clients.contains_key(name) {
            Self::set_real(&mut maps, name, endpoint);
        }
    }

    fn record_external(&self, name: &str, external: Option<Endpoint>) {
        if let Some(addrs) = self.maps.lock().addrs.get_mut(name) {
            addrs.external = external;
        }
    }

    fn set_real(maps: &mut Maps<K::Conn>, name: &str, endpoint: Endpoint) {
        match maps.addrs.get_mut(name) {
            Some(addrs) => addrs.real = endpoint,
            None => {
                maps.addrs.insert(
                    name.to_string(),
                    ServerAddrs {
                        real: endpoint,
                        external: None,
                    },
                );
            }
        }
    }

    fn log_report(operation: &'static str, report: &ReconcileReport) {
        if report.is_complete() {
            debug!(
                operation,
                applied = report.applied.len(),
                unchanged = report.unchanged.len(),
                "batch applied"
            );
        } else {
            warn!(
                operation,
                applied = report.applied.len(),
                unchanged = report.unchanged.len(),
                failed = report.failed.len(),
                "batch partially applied"
            );
        }
    }
}

impl<K: Connector> fmt::Debug for Registry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
