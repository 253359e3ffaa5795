//! Tabula Routing - client-side partition and replica routing.
//!
//! This crate maps `(table, partition)` to a live connection on the tablet
//! server that should serve the request: the leader for writes, a random
//! follower for reads. Topology changes published by the coordination
//! service are applied without blocking readers.
//!
//! # Design
//!
//! - **Handles, not connections**: routes hold a [`ClientHandle`] whose
//!   connection is swapped atomically when a server moves.
//! - **Immutable routes**: a [`PartitionRoute`] never changes; a topology
//!   change builds a new one and swaps it into the [`TableRoute`] slot.
//! - **One structural lock**: only the [`Registry`] maps are locked, and
//!   never across a handshake.
//! - **Explicit limits**: partition, follower and name counts are bounded.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod catalog;
mod client_handle;
mod config;
mod connection;
mod error;
mod partition_route;
mod registry;
mod resolver;
mod table_route;

#[cfg(test)]
mod test_util;

pub use catalog::Catalog;
pub use client_handle::ClientHandle;
pub use config::{ConfigError, RegistryConfig, TableRouteConfig};
pub use connection::{Connection, Connector};
pub use error::{ConnectError, RoutingError, RoutingResult};
pub use partition_route::PartitionRoute;
pub use registry::{ReconcileReport, Registry, ServerAddrs};
pub use resolver::{IdentityResolver, Resolver, StaticResolver};
pub use table_route::{PartitionDesc, TableRoute};
