//! Catalog - table id → table route, over one shared registry.
//!
//! Discovery publishes partition descriptions tagged with a table id; the
//! catalog forwards each one to the table it belongs to. The table set itself
//! is an immutable map published through `ArcSwap`: creating or dropping a
//! table copies the map and swaps it in, so routing lookups never lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tabula_core::{PartitionId, TableId};
use tracing::info;

use crate::config::TableRouteConfig;
use crate::connection::Connector;
use crate::error::{RoutingError, RoutingResult};
use crate::registry::Registry;
use crate::table_route::{PartitionDesc, TableRoute};

type Tables<C> = HashMap<TableId, Arc<TableRoute<C>>>;

/// Every table route known to this process.
pub struct Catalog<K: Connector> {
    registry: Arc<Registry<K>>,
    config: TableRouteConfig,
    tables: ArcSwap<Tables<K::Conn>>,
}

impl<K: Connector> Catalog<K> {
    /// Creates an empty catalog over `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry<K>>, config: TableRouteConfig) -> Self {
        Self {
            registry,
            config,
            tables: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Returns the shared registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry<K>> {
        &self.registry
    }

    /// Builds and publishes a table route.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::TableExists` if the id is taken, or any error
    /// from [`TableRoute::new`].
    pub fn create_table(
        &self,
        table_id: TableId,
        partition_count: u32,
        descs: &[PartitionDesc],
    ) -> RoutingResult<Arc<TableRoute<K::Conn>>> {
        if self.tables.load().contains_key(&table_id) {
            return Err(RoutingError::TableExists { table_id });
        }

        let table = Arc::new(TableRoute::new(
            table_id,
            partition_count,
            descs,
            self.registry.as_ref(),
            self.config.clone(),
        )?);

        let mut exists = false;
        self.tables.rcu(|tables| {
            exists = tables.contains_key(&table_id);
            let mut next = Tables::clone(tables);
            if !exists {
                next.insert(table_id, Arc::clone(&table));
            }
            next
        });
        if exists {
            return Err(RoutingError::TableExists { table_id });
        }

        info!(table = %table_id, partitions = partition_count, "table added to catalog");
        Ok(table)
    }

    /// Returns the route for `table_id`.
    #[must_use]
    pub fn table(&self, table_id: TableId) -> Option<Arc<TableRoute<K::Conn>>> {
        self.tables.load().get(&table_id).cloned()
    }

    /// Removes a table. Readers holding its route keep using it.
    pub fn drop_table(&self, table_id: TableId) -> bool {
        let mut removed = false;
        self.tables.rcu(|tables| {
            removed = tables.contains_key(&table_id);
            let mut next = Tables::clone(tables);
            next.remove(&table_id);
            next
        });
        if removed {
            info!(table = %table_id, "table dropped from catalog");
        }
        removed
    }

    /// Applies a partition description to its table.
    ///
    /// Returns whether the partition's slot was replaced.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::UnknownTable` if the table is not in the
    /// catalog, or any error from [`TableRoute::update`].
    pub fn apply(&self, desc: &PartitionDesc) -> RoutingResult<bool> {
        let table = self.table(desc.table_id).ok_or(RoutingError::UnknownTable {
            table_id: desc.table_id,
        })?;
        table.update(desc, self.registry.as_ref())
    }

    /// Returns the leader connection for a table partition.
    #[must_use]
    pub fn leader_for(&self, table_id: TableId, pid: PartitionId) -> Option<Arc<K::Conn>> {
        self.table(table_id)?.leader_for(pid)
    }

    /// Returns a follower connection for a table partition.
    #[must_use]
    pub fn follower_for(&self, table_id: TableId, pid: PartitionId) -> Option<Arc<K::Conn>> {
        self.table(table_id)?.follower_for(pid)
    }

    /// Returns all table ids, sorted.
    #[must_use]
    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<_> = self.tables.load().keys().copied().collect();
        ids.sort();
        ids
    }
}

impl<K: Connector> fmt::Debug for Catalog<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("tables", &self.table_ids())
            .finish_non_exhaustive()
    }
}
