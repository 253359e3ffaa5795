//! Routing error types.
//!
//! Lookups on the read path never fail: an unknown name or an unroutable
//! partition is an empty `Option`. The errors here are returned by the
//! mutation entry points (`reconcile`, `install`, table `update`) and by
//! the connector seam.

use tabula_core::{Endpoint, PartitionId, TableId};
use thiserror::Error;

use crate::config::ConfigError;

/// Result type for routing operations.
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Errors reported by a `Connector` while opening a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The peer refused the connection.
    #[error("connection refused by {endpoint}")]
    Refused {
        /// The endpoint that refused.
        endpoint: String,
    },

    /// The connection was established but initialization failed.
    #[error("handshake with {endpoint} failed: {message}")]
    Handshake {
        /// The endpoint being initialized.
        endpoint: String,
        /// Error message.
        message: String,
    },
}

/// Errors from registry, table and catalog mutations.
#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    /// No handle is registered under this name.
    #[error("unknown server name: {name}")]
    UnknownName {
        /// The name that was not found.
        name: String,
    },

    /// A name resolved to an endpoint that failed validation.
    #[error("invalid endpoint for {name}: {source}")]
    InvalidEndpoint {
        /// The server name.
        name: String,
        /// Why the endpoint was rejected.
        #[source]
        source: tabula_core::Error,
    },

    /// Opening or initializing a session failed. The previous connection,
    /// if any, is still published.
    #[error("session init failed for {name} at {endpoint}: {source}")]
    SessionInit {
        /// The server name.
        name: String,
        /// The endpoint that was attempted.
        endpoint: Endpoint,
        /// The connector's error.
        #[source]
        source: ConnectError,
    },

    /// Some entries of a reconcile batch failed; the rest were applied.
    #[error("reconcile partially failed: {failed} of {total} names")]
    PartialBatch {
        /// Number of names that failed.
        failed: usize,
        /// Number of names in the batch.
        total: usize,
    },

    /// A partition id does not fit the table's slot array.
    #[error("{pid} out of range for {table_id} with {partition_count} partitions")]
    PartitionOutOfRange {
        /// The table.
        table_id: TableId,
        /// The offending partition id.
        pid: PartitionId,
        /// The table's fixed partition count.
        partition_count: u32,
    },

    /// A partition description was applied to the wrong table.
    #[error("description for {actual} applied to {expected}")]
    TableMismatch {
        /// The table receiving the description.
        expected: TableId,
        /// The table named by the description.
        actual: TableId,
    },

    /// A pre-built connection was installed under another name.
    #[error("connection for {actual} installed under name {name}")]
    NameMismatch {
        /// The name it was installed under.
        name: String,
        /// The name the connection is bound to.
        actual: String,
    },

    /// The catalog holds no table with this id.
    #[error("unknown table: {table_id}")]
    UnknownTable {
        /// The table id.
        table_id: TableId,
    },

    /// The catalog already holds a table with this id.
    #[error("table already exists: {table_id}")]
    TableExists {
        /// The table id.
        table_id: TableId,
    },

    /// A core limit or argument check failed.
    #[error(transparent)]
    Core(#[from] tabula_core::Error),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
