//! Simulated tablet cluster for routing integration tests.
//!
//! Tablets live in memory, keyed by the endpoint they listen on. Each tablet
//! holds replicas of `(table, partition)` pairs; exactly one replica per
//! partition is the leader and accepts writes. Writes reach followers only
//! when the test calls [`SimulatedCluster::replicate`], which makes
//! replication lag observable.
//!
//! # Fault injection
//!
//! - `crash` / `restart`: the tablet refuses new sessions and fails requests
//!   on existing ones, and replication to it is held back.
//! - `reject_handshakes`: new sessions fail the handshake while existing
//!   sessions keep working.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tabula_core::{Endpoint, PartitionId, TableId};
use tabula_routing::{ConnectError, Connection, Connector};
use thiserror::Error;
use tracing::{debug, trace};

/// One stored version of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Row key.
    pub key: String,
    /// Version timestamp.
    pub ts: u64,
    /// Stored value.
    pub value: String,
}

/// Errors returned by tablet requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TabletError {
    /// The session was closed by its owner.
    #[error("session to {endpoint} is closed")]
    Closed {
        /// Tablet endpoint.
        endpoint: String,
    },
    /// The tablet is down.
    #[error("tablet {endpoint} is unreachable")]
    Unreachable {
        /// Tablet endpoint.
        endpoint: String,
    },
    /// The tablet holds no replica of the partition.
    #[error("tablet {endpoint} does not serve {table_id}/{pid}")]
    NotServing {
        /// Tablet endpoint.
        endpoint: String,
        /// Table id.
        table_id: TableId,
        /// Partition id.
        pid: PartitionId,
    },
    /// The tablet holds a follower replica and cannot accept writes.
    #[error("tablet {endpoint} does not lead {table_id}/{pid}")]
    NotLeader {
        /// Tablet endpoint.
        endpoint: String,
        /// Table id.
        table_id: TableId,
        /// Partition id.
        pid: PartitionId,
    },
}

type PartitionKey = (TableId, PartitionId);

#[derive(Debug, Default)]
struct Replica {
    leader: bool,
    /// key -> ts -> value.
    rows: BTreeMap<String, BTreeMap<u64, String>>,
}

impl Replica {
    fn apply(&mut self, row: Row) {
        self.rows.entry(row.key).or_default().insert(row.ts, row.value);
    }
}

#[derive(Debug, Default)]
struct Tablet {
    replicas: BTreeMap<PartitionKey, Replica>,
}

/// A write waiting to be shipped to one follower.
#[derive(Debug)]
struct Delivery {
    target: String,
    partition: PartitionKey,
    row: Row,
}

#[derive(Debug, Default)]
struct ClusterState {
    tablets: BTreeMap<String, Tablet>,
    down: BTreeSet<String>,
    reject_handshakes: BTreeSet<String>,
    pending: Vec<Delivery>,
    sessions_opened: u64,
}

impl ClusterState {
    fn check_up(&self, endpoint: &str) -> Result<(), TabletError> {
        if self.down.contains(endpoint) || !self.tablets.contains_key(endpoint) {
            return Err(TabletError::Unreachable {
                endpoint: endpoint.to_string(),
            });
        }
        Ok(())
    }
}

type SharedClusterState = Arc<Mutex<ClusterState>>;

/// In-memory tablet cluster.
#[derive(Debug, Clone, Default)]
pub struct SimulatedCluster {
    state: SharedClusterState,
}

impl SimulatedCluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a tablet listening on `endpoint`.
    pub fn add_tablet(&self, endpoint: &str) {
        self.state
            .lock()
            .tablets
            .entry(endpoint.to_string())
            .or_default();
    }

    /// Places a partition's replicas: `leader` takes writes, `followers`
    /// receive them on replication. Replicas elsewhere lose leadership.
    ///
    /// # Panics
    ///
    /// Panics if any endpoint has no tablet.
    pub fn assign(&self, table_id: TableId, pid: PartitionId, leader: &str, followers: &[&str]) {
        let mut state = self.state.lock();
        let key = (table_id, pid);

        for tablet in state.tablets.values_mut() {
            if let Some(replica) = tablet.replicas.get_mut(&key) {
                replica.leader = false;
            }
        }
        for (endpoint, is_leader) in std::iter::once((leader, true))
            .chain(followers.iter().map(|f| (*f, false)))
        {
            let tablet = state
                .tablets
                .get_mut(endpoint)
                .unwrap_or_else(|| panic!("no tablet at {endpoint}"));
            tablet.replicas.entry(key).or_default().leader = is_leader;
        }
        debug!(table = %table_id, pid = %pid, leader, ?followers, "assigned partition");
    }

    /// Takes a tablet down.
    pub fn crash(&self, endpoint: &str) {
        self.state.lock().down.insert(endpoint.to_string());
    }

    /// Brings a crashed tablet back.
    pub fn restart(&self, endpoint: &str) {
        self.state.lock().down.remove(endpoint);
    }

    /// Makes new sessions to `endpoint` fail the handshake.
    pub fn reject_handshakes(&self, endpoint: &str) {
        self.state.lock().reject_handshakes.insert(endpoint.to_string());
    }

    /// Lets new sessions to `endpoint` through again.
    pub fn accept_handshakes(&self, endpoint: &str) {
        self.state.lock().reject_handshakes.remove(endpoint);
    }

    /// Ships pending writes to their followers.
    ///
    /// Writes bound for a crashed tablet stay queued. Returns the number of
    /// writes delivered.
    pub fn replicate(&self) -> usize {
        let mut state = self.state.lock();
        let pending = std::mem::take(&mut state.pending);
        let mut delivered = 0;

        for delivery in pending {
            if state.down.contains(&delivery.target) {
                state.pending.push(delivery);
                continue;
            }
            if let Some(replica) = state
                .tablets
                .get_mut(&delivery.target)
                .and_then(|t| t.replicas.get_mut(&delivery.partition))
            {
                replica.apply(delivery.row);
                delivered += 1;
            }
        }
        trace!(delivered, held = state.pending.len(), "replication round");
        delivered
    }

    /// Returns the number of writes waiting for replication.
    #[must_use]
    pub fn pending_replication(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns the number of sessions successfully opened.
    #[must_use]
    pub fn sessions_opened(&self) -> u64 {
        self.state.lock().sessions_opened
    }

    /// Returns a connector opening sessions against this cluster.
    #[must_use]
    pub fn connector(&self) -> SimulatedConnector {
        SimulatedConnector {
            state: Arc::clone(&self.state),
        }
    }
}

/// A session to one simulated tablet.
pub struct TabletConn {
    name: String,
    endpoint: Endpoint,
    state: SharedClusterState,
    closed: AtomicBool,
}

impl TabletConn {
    /// Writes one version of `key` to the partition's leader replica.
    ///
    /// # Errors
    ///
    /// Fails if the session is closed, the tablet is down, or it does not
    /// lead the partition.
    pub fn put(
        &self,
        table_id: TableId,
        pid: PartitionId,
        key: &str,
        ts: u64,
        value: &str,
    ) -> Result<(), TabletError> {
        self.check_open()?;
        let mut state = self.state.lock();
        let endpoint = self.endpoint.as_str();
        state.check_up(endpoint)?;

        let partition = (table_id, pid);
        let row = Row {
            key: key.to_string(),
            ts,
            value: value.to_string(),
        };

        let replica = state
            .tablets
            .get_mut(endpoint)
            .and_then(|t| t.replicas.get_mut(&partition))
            .ok_or_else(|| self.not_serving(table_id, pid))?;
        if !replica.leader {
            return Err(TabletError::NotLeader {
                endpoint: endpoint.to_string(),
                table_id,
                pid,
            });
        }
        replica.apply(row.clone());

        let targets: Vec<String> = state
            .tablets
            .iter()
            .filter(|(ep, t)| ep.as_str() != endpoint && t.replicas.contains_key(&partition))
            .map(|(ep, _)| ep.clone())
            .collect();
        for target in targets {
            state.pending.push(Delivery {
                target,
                partition,
                row: row.clone(),
            });
        }
        Ok(())
    }

    /// Returns every stored version in the partition, by key then newest
    /// timestamp first.
    ///
    /// # Errors
    ///
    /// Fails if the session is closed, the tablet is down, or it holds no
    /// replica of the partition.
    pub fn traverse(&self, table_id: TableId, pid: PartitionId) -> Result<Vec<Row>, TabletError> {
        self.check_open()?;
        let state = self.state.lock();
        let endpoint = self.endpoint.as_str();
        state.check_up(endpoint)?;

        let replica = state
            .tablets
            .get(endpoint)
            .and_then(|t| t.replicas.get(&(table_id, pid)))
            .ok_or_else(|| self.not_serving(table_id, pid))?;

        Ok(replica
            .rows
            .iter()
            .flat_map(|(key, versions)| {
                versions.iter().rev().map(move |(ts, value)| Row {
                    key: key.clone(),
                    ts: *ts,
                    value: value.clone(),
                })
            })
            .collect())
    }

    /// Returns true once the session was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<(), TabletError> {
        if self.is_closed() {
            return Err(TabletError::Closed {
                endpoint: self.endpoint.to_string(),
            });
        }
        Ok(())
    }

    fn not_serving(&self, table_id: TableId, pid: PartitionId) -> TabletError {
        TabletError::NotServing {
            endpoint: self.endpoint.to_string(),
            table_id,
            pid,
        }
    }
}

impl Connection for TabletConn {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for TabletConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabletConn")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Opens sessions against a [`SimulatedCluster`].
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    state: SharedClusterState,
}

impl Connector for SimulatedConnector {
    type Conn = TabletConn;

    fn connect(&self, name: &str, endpoint: &Endpoint) -> Result<TabletConn, ConnectError> {
        let mut state = self.state.lock();
        if state.check_up(endpoint.as_str()).is_err() {
            return Err(ConnectError::Refused {
                endpoint: endpoint.to_string(),
            });
        }
        if state.reject_handshakes.contains(endpoint.as_str()) {
            return Err(ConnectError::Handshake {
                endpoint: endpoint.to_string(),
                message: "session rejected".to_string(),
            });
        }
        state.sessions_opened += 1;

        Ok(TabletConn {
            name: name.to_string(),
            endpoint: endpoint.clone(),
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        })
    }
}
