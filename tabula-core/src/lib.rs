//! Tabula Core - Strongly-typed identifiers and limits for Tabula.
//!
//! This crate provides the small vocabulary shared by the routing layer and
//! its collaborators: table and partition identifiers, validated network
//! endpoints, and the explicit bounds placed on routing state.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: Prevent mixing up `TableId` with `PartitionId`
//! - **Validated values**: An `Endpoint` is never empty
//! - **Explicit limits**: Every table and registry has a bounded maximum
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod endpoint;
mod error;
mod limits;
mod types;

pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use limits::Limits;
pub use types::{PartitionId, TableId};
