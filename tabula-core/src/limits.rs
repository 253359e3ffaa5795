//! Routing limits and configuration bounds.
//!
//! Following TigerStyle: put limits on everything.
//! Every slot array and name map has an explicit maximum size.

/// Bounds on routing state.
///
/// Defaults are sized for a single client process talking to one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of partitions in one table.
    pub partitions_max: u32,
    /// Maximum number of followers per partition.
    pub followers_max: u32,
    /// Maximum number of distinct server names held by a registry.
    pub names_max: u32,
}

impl Limits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // Tables: 8k partitions, 16 replicas besides the leader.
            partitions_max: 8192,
            followers_max: 16,
            // Registry: 64k tablets/name servers.
            names_max: 65_536,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if `partitions_max` or `names_max` is zero.
    pub const fn validate(&self) -> crate::Result<()> {
        if let Err(e) = self.validate_table() {
            return Err(e);
        }

        if self.names_max == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "names_max",
                reason: "must be positive",
            });
        }

        Ok(())
    }

    /// Validates the limits a table route uses.
    ///
    /// `followers_max` may be zero: a table can be leader-only.
    ///
    /// # Errors
    /// Returns an error if `partitions_max` is zero.
    pub const fn validate_table(&self) -> crate::Result<()> {
        if self.partitions_max == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "partitions_max",
                reason: "must be positive",
            });
        }
        Ok(())
    }

    /// Checks a partition count against `partitions_max`.
    ///
    /// # Errors
    /// Returns an error if `count` is zero or exceeds the maximum.
    pub const fn check_partition_count(&self, count: u32) -> crate::Result<()> {
        if count == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "partition_count",
                reason: "must be positive",
            });
        }
        if count > self.partitions_max {
            return Err(crate::Error::LimitExceeded {
                limit: "partitions_max",
                max: self.partitions_max as u64,
                actual: count as u64,
            });
        }
        Ok(())
    }

    /// Checks a follower count against `followers_max`.
    ///
    /// # Errors
    /// Returns an error if `count` exceeds the maximum.
    pub fn check_follower_count(&self, count: usize) -> crate::Result<()> {
        let actual = u64::try_from(count).unwrap_or(u64::MAX);
        if actual > u64::from(self.followers_max) {
            return Err(crate::Error::LimitExceeded {
                limit: "followers_max",
                max: u64::from(self.followers_max),
                actual,
            });
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}
