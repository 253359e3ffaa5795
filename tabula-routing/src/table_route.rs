//! Table route - partition-indexed slots of partition routes.
//!
//! The slot array is sized once, from the table's partition count. Each slot
//! is swapped independently: a reconfiguration builds a complete new
//! `PartitionRoute` and replaces the slot in one atomic store. Readers see the
//! old route or the new one, never a mix, and a route replaced while in use
//! stays alive until its last reader drops it.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tabula_core::{PartitionId, TableId};
use tracing::{debug, info, warn};

use crate::client_handle::ClientHandle;
use crate::config::TableRouteConfig;
use crate::connection::{Connection, Connector};
use crate::error::{RoutingError, RoutingResult};
use crate::partition_route::PartitionRoute;
use crate::registry::Registry;

/// Odd constant used to spread a table seed across partitions.
const SEED_SPREAD: u64 = 0x9E37_79B9_7F4A_7C15;

/// One partition's replica placement, as published by the name server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDesc {
    /// The table this partition belongs to.
    pub table_id: TableId,
    /// The partition id.
    pub pid: PartitionId,
    /// Server name of the leader.
    pub leader: String,
    /// Server names of the followers, in placement order.
    pub followers: Vec<String>,
}

impl PartitionDesc {
    /// Creates a description with no followers.
    #[must_use]
    pub fn new(table_id: TableId, pid: PartitionId, leader: impl Into<String>) -> Self {
        Self {
            table_id,
            pid,
            leader: leader.into(),
            followers: Vec::new(),
        }
    }

    /// Sets the follower names.
    #[must_use]
    pub fn with_followers<I, S>(mut self, followers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.followers = followers.into_iter().map(Into::into).collect();
        self
    }
}

/// Routing table for one table's partitions.
pub struct TableRoute<C> {
    table_id: TableId,
    config: TableRouteConfig,
    slots: Box<[ArcSwapOption<PartitionRoute<C>>]>,
}

impl<C: Connection> TableRoute<C> {
    /// Builds a table route from partition descriptions.
    ///
    /// Names are resolved through the registry, connecting on first use. A
    /// partition whose leader cannot be resolved starts unroutable; it
    /// becomes routable on a later successful `update`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or partition count is invalid,
    /// or a description names another table, an out-of-range partition, or
    /// too many followers.
    pub fn new<K>(
        table_id: TableId,
        partition_count: u32,
        descs: &[PartitionDesc],
        registry: &Registry<K>,
        config: TableRouteConfig,
    ) -> RoutingResult<Self>
    where
        K: Connector<Conn = C>,
    {
        config.validate()?;
        config.limits.check_partition_count(partition_count)?;

        let slots = (0..partition_count).map(|_| ArcSwapOption::empty()).collect();
        let table = Self {
            table_id,
            config,
            slots,
        };

        for desc in descs {
            let slot = table.check_desc(desc)?;
            match table.build(desc, registry) {
                Ok(route) => slot.store(Some(Arc::new(route))),
                Err(e) => {
                    warn!(table = %table_id, pid = %desc.pid, error = %e, "partition unroutable at build");
                }
            }
        }

        info!(
            table = %table_id,
            partitions = partition_count,
            routable = table.routable_count(),
            "built table route"
        );
        Ok(table)
    }

    /// Returns the table id.
    #[must_use]
    pub const fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Returns the fixed partition count.
    #[must_use]
    pub fn partition_count(&self) -> u32 {
        // Bounded by `Limits::partitions_max` at construction.
        u32::try_from(self.slots.len()).unwrap_or(u32::MAX)
    }

    /// Returns the number of partitions that currently have a route.
    #[must_use]
    pub fn routable_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.load().is_some()).count()
    }

    /// Returns the current route for `pid`.
    ///
    /// `None` means the partition is out of range or temporarily unroutable.
    #[must_use]
    pub fn entry(&self, pid: PartitionId) -> Option<Arc<PartitionRoute<C>>> {
        pid.as_index()
            .and_then(|idx| self.slots.get(idx))
            .and_then(|slot| slot.load_full())
    }

    /// Returns the leader connection for `pid`.
    #[must_use]
    pub fn leader_for(&self, pid: PartitionId) -> Option<Arc<C>> {
        self.entry(pid).map(|route| route.leader())
    }

    /// Returns a follower connection for `pid` (the leader if it has none).
    #[must_use]
    pub fn follower_for(&self, pid: PartitionId) -> Option<Arc<C>> {
        self.entry(pid).map(|route| route.follower())
    }

    /// Rebuilds one partition's route and swaps it into its slot.
    ///
    /// Returns `Ok(false)` if the slot already holds a route over exactly the
    /// resolved handles; nothing is swapped in that case.
    ///
    /// # Errors
    ///
    /// Returns an error if the description names another table or an
    /// out-of-range partition, has too many followers, or its leader cannot be
    /// resolved. The slot is left untouched on error.
    pub fn update<K>(&self, desc: &PartitionDesc, registry: &Registry<K>) -> RoutingResult<bool>
    where
        K: Connector<Conn = C>,
    {
        let slot = self.check_desc(desc)?;
        let (leader, followers) = self.resolve_handles(desc, registry)?;

        if let Some(current) = slot.load_full() {
            if current.has_handles(&leader, &followers) {
                debug!(table = %self.table_id, pid = %desc.pid, "partition route unchanged");
                return Ok(false);
            }
        }

        let route = self.route_from(desc.pid, leader, followers);
        slot.store(Some(Arc::new(route)));
        info!(
            table = %self.table_id,
            pid = %desc.pid,
            leader = %desc.leader,
            followers = desc.followers.len(),
            "replaced partition route"
        );
        Ok(true)
    }

    /// Empties the slot for `pid`, returning the route it held.
    ///
    /// # Errors
    /// Returns `RoutingError::PartitionOutOfRange` for an invalid `pid`.
    pub fn clear(&self, pid: PartitionId) -> RoutingResult<Option<Arc<PartitionRoute<C>>>> {
        let previous = self.slot(pid)?.swap(None);
        if previous.is_some() {
            info!(table = %self.table_id, %pid, "partition marked unroutable");
        }
        Ok(previous)
    }

    fn slot(&self, pid: PartitionId) -> RoutingResult<&ArcSwapOption<PartitionRoute<C>>> {
        pid.as_index()
            .and_then(|idx| self.slots.get(idx))
            .ok_or_else(|| RoutingError::PartitionOutOfRange {
                table_id: self.table_id,
                pid,
                partition_count: self.partition_count(),
            })
    }

    fn check_desc(&self, desc: &PartitionDesc) -> RoutingResult<&ArcSwapOption<PartitionRoute<C>>> {
        if desc.table_id != self.table_id {
            return Err(RoutingError::TableMismatch {
                expected: self.table_id,
                actual: desc.table_id,
            });
        }
        self.config.limits.check_follower_count(desc.followers.len())?;
        self.slot(desc.pid)
    }

    fn build<K>(&self, desc: &PartitionDesc, registry: &Registry<K>) -> RoutingResult<PartitionRoute<C>>
    where
        K: Connector<Conn = C>,
    {
        let (leader, followers) = self.resolve_handles(desc, registry)?;
        Ok(self.route_from(desc.pid, leader, followers))
    }

    /// Resolves the leader (required) and followers (best effort).
    #[allow(clippy::type_complexity)]
    fn resolve_handles<K>(
        &self,
        desc: &PartitionDesc,
        registry: &Registry<K>,
    ) -> RoutingResult<(Arc<ClientHandle<C>>, Vec<Arc<ClientHandle<C>>>)>
    where
        K: Connector<Conn = C>,
    {
        let leader = registry.resolve(&desc.leader)?;
        let followers = desc
            .followers
            .iter()
            .filter_map(|name| match registry.resolve(name) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!(table = %self.table_id, pid = %desc.pid, follower = %name, error = %e, "skipping unresolvable follower");
                    None
                }
            })
            .collect();
        Ok((leader, followers))
    }

    fn route_from(
        &self,
        pid: PartitionId,
        leader: Arc<ClientHandle<C>>,
        followers: Vec<Arc<ClientHandle<C>>>,
    ) -> PartitionRoute<C> {
        match self.config.follower_seed {
            Some(seed) => {
                let seed = seed ^ pid.get().wrapping_add(1).wrapping_mul(SEED_SPREAD);
                PartitionRoute::with_seed(pid, leader, followers, seed)
            }
            None => PartitionRoute::new(pid, leader, followers),
        }
    }
}

impl<C: Connection> fmt::Debug for TableRoute<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableRoute")
            .field("table_id", &self.table_id)
            .field("partitions", &self.slots.len())
            .field("routable", &self.routable_count())
            .finish()
    }
}
