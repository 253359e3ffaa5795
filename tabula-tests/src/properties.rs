//! Property definitions and checkers for routing tests.
//!
//! Properties are invariants that must hold however topology changes
//! interleave with reads. Each checker returns the violations it found so a
//! test can report all of them at once.

use std::collections::BTreeMap;
use std::fmt;

use tabula_core::{Endpoint, PartitionId};
use tabula_routing::{Connection, PartitionDesc, PartitionRoute, TableRoute};

// ============================================================================
// Property Violation Types
// ============================================================================

/// A violation of a routing property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyViolation {
    /// A follower was drawn too rarely or too often.
    NonUniformFollower {
        /// Follower name.
        follower: String,
        /// Times it was drawn.
        drawn: u64,
        /// Expected draws under a uniform choice.
        expected: u64,
    },
    /// A follower read landed on the leader although followers exist.
    LeaderDrawnAsFollower {
        /// Leader name.
        leader: String,
    },
    /// A reader observed an endpoint that was never published.
    UnpublishedEndpoint {
        /// The endpoint observed.
        observed: Endpoint,
    },
    /// A reader observed an older endpoint after a newer one.
    ReadRegressed {
        /// Position of the newer endpoint in publish order.
        previous: usize,
        /// Position of the endpoint observed afterwards.
        observed: usize,
    },
    /// A partition's route does not match its description.
    RouteMismatch {
        /// Partition id.
        pid: PartitionId,
        /// Expected leader then followers.
        expected: Vec<String>,
        /// Routed leader then followers; empty if the slot is empty.
        actual: Vec<String>,
    },
}

impl fmt::Display for PropertyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonUniformFollower {
                follower,
                drawn,
                expected,
            } => write!(f, "follower {follower} drawn {drawn} times, expected ~{expected}"),
            Self::LeaderDrawnAsFollower { leader } => {
                write!(f, "leader {leader} served a follower read")
            }
            Self::UnpublishedEndpoint { observed } => {
                write!(f, "observed endpoint {observed} was never published")
            }
            Self::ReadRegressed { previous, observed } => {
                write!(f, "read regressed from publish #{previous} to #{observed}")
            }
            Self::RouteMismatch {
                pid,
                expected,
                actual,
            } => write!(f, "partition {pid} routes to {actual:?}, expected {expected:?}"),
        }
    }
}

// ============================================================================
// Follower Distribution
// ============================================================================

/// Draws `draws` followers from `route` and checks the choice is uniform.
///
/// Each follower must be drawn within `tolerance` (a fraction, e.g. `0.15`)
/// of `draws / followers`. With no followers nothing is checked.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn check_follower_distribution<C: Connection>(
    route: &PartitionRoute<C>,
    draws: u64,
    tolerance: f64,
) -> Vec<PropertyViolation> {
    let followers: Vec<&str> = route.follower_handles().iter().map(|h| h.name()).collect();
    if followers.is_empty() {
        return Vec::new();
    }

    let mut counts: BTreeMap<String, u64> = followers.iter().map(|f| ((*f).to_string(), 0)).collect();
    let leader = route.leader_handle().name();
    let mut violations = Vec::new();

    for _ in 0..draws {
        let conn = route.follower();
        match counts.get_mut(conn.name()) {
            Some(count) => *count += 1,
            None if conn.name() == leader => {
                violations.push(PropertyViolation::LeaderDrawnAsFollower {
                    leader: leader.to_string(),
                });
            }
            None => {}
        }
    }

    let expected = draws / followers.len() as u64;
    let slack = (expected as f64 * tolerance) as u64;
    for (follower, drawn) in counts {
        if drawn.abs_diff(expected) > slack {
            violations.push(PropertyViolation::NonUniformFollower {
                follower,
                drawn,
                expected,
            });
        }
    }
    violations
}

// ============================================================================
// Handle Linearizability
// ============================================================================

/// Checks one reader's observations against a single writer's publish order.
///
/// Every observed endpoint must have been published, and a reader must never
/// observe an endpoint published before one it already saw.
#[must_use]
pub fn check_monotonic_reads(published: &[Endpoint], observed: &[Endpoint]) -> Vec<PropertyViolation> {
    let position: BTreeMap<&Endpoint, usize> =
        published.iter().enumerate().map(|(i, ep)| (ep, i)).collect();
    let mut violations = Vec::new();
    let mut latest = 0;

    for endpoint in observed {
        match position.get(endpoint) {
            Some(&idx) if idx < latest => violations.push(PropertyViolation::ReadRegressed {
                previous: latest,
                observed: idx,
            }),
            Some(&idx) => latest = idx,
            None => violations.push(PropertyViolation::UnpublishedEndpoint {
                observed: endpoint.clone(),
            }),
        }
    }
    violations
}

// ============================================================================
// Route Placement
// ============================================================================

/// Checks that each description's partition routes to exactly its names.
///
/// Follower order matters, as it does for the route itself.
#[must_use]
pub fn check_routes_match<C: Connection>(
    table: &TableRoute<C>,
    descs: &[PartitionDesc],
) -> Vec<PropertyViolation> {
    descs
        .iter()
        .filter_map(|desc| {
            let expected: Vec<String> = std::iter::once(desc.leader.clone())
                .chain(desc.followers.iter().cloned())
                .collect();
            let actual: Vec<String> = table
                .entry(desc.pid)
                .map(|route| {
                    std::iter::once(route.leader_handle().name().to_string())
                        .chain(route.follower_handles().iter().map(|h| h.name().to_string()))
                        .collect()
                })
                .unwrap_or_default();

            (expected != actual).then_some(PropertyViolation::RouteMismatch {
                pid: desc.pid,
                expected,
                actual,
            })
        })
        .collect()
}
