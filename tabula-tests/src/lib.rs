//! Tabula Tests - integration tests for client-side routing.
//!
//! This crate drives the routing crate against an in-memory tablet cluster.
//! Tests are organized by scope:
//!
//! ## Test Organization
//!
//! **Integration Tests** (`*_tests.rs`):
//! - `routing_tests`: registry, tables and catalog against simulated tablets
//! - `scenario_tests`: concurrency properties under topology churn
//!
//! **Support Modules**:
//! - `simulated_tablet`: in-memory tablets, replication and fault injection
//! - `properties`: property checkers (follower uniformity, monotonic reads)
//! - `scenarios`: reusable cluster layouts and the routing fixture
//!
//! ## Naming Conventions
//!
//! - Integration tests: `test_<component>_<scenario>`
//! - Unit tests: Inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod properties;
pub mod scenarios;
pub mod simulated_tablet;

#[cfg(test)]
mod routing_tests;
