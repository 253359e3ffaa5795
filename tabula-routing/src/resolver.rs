//! Name resolution - logical server names to real endpoints.
//!
//! Servers register under a stable name; the coordination service publishes
//! the address currently serving each name. A resolver is the registry's
//! view of those publications. The coordination service's own storage layout
//! stays behind this trait.

use std::collections::HashMap;

use parking_lot::RwLock;
use tabula_core::Endpoint;

/// Source of published name aliases.
pub trait Resolver: Send + Sync {
    /// Returns the real endpoint currently published for `name`, if any.
    fn resolve(&self, name: &str) -> Option<Endpoint>;

    /// Returns the externally-facing endpoint advertised for `name`, if any.
    ///
    /// This address class is tracked for clients outside the cluster network
    /// and is never used for routing.
    fn resolve_external(&self, _name: &str) -> Option<Endpoint> {
        None
    }
}

/// Resolver with no aliases: every name is its own endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl Resolver for IdentityResolver {
    fn resolve(&self, _name: &str) -> Option<Endpoint> {
        None
    }
}

#[derive(Debug, Default)]
struct Aliases {
    real: HashMap<String, Endpoint>,
    external: HashMap<String, Endpoint>,
}

/// Resolver backed by an in-process alias table.
///
/// A discovery watcher updates it as notifications arrive; the registry reads
/// it on `refresh`.
#[derive(Debug, Default)]
pub struct StaticResolver {
    aliases: RwLock<Aliases>,
}

impl StaticResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the real endpoint for `name`, returning the previous one.
    pub fn set(&self, name: impl Into<String>, endpoint: Endpoint) -> Option<Endpoint> {
        self.aliases.write().real.insert(name.into(), endpoint)
    }

    /// Publishes the external endpoint for `name`, returning the previous one.
    pub fn set_external(&self, name: impl Into<String>, endpoint: Endpoint) -> Option<Endpoint> {
        self.aliases.write().external.insert(name.into(), endpoint)
    }

    /// Withdraws every alias for `name`.
    pub fn remove(&self, name: &str) {
        let mut aliases = self.aliases.write();
        aliases.real.remove(name);
        aliases.external.remove(name);
    }

    /// Withdraws only the external endpoint for `name`, returning it.
    pub fn remove_external(&self, name: &str) -> Option<Endpoint> {
        self.aliases.write().external.remove(name)
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, name: &str) -> Option<Endpoint> {
        self.aliases.read().real.get(name).cloned()
    }

    fn resolve_external(&self, name: &str) -> Option<Endpoint> {
        self.aliases.read().external.get(name).cloned()
    }
}
