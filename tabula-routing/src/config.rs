//! Routing configuration.

use tabula_core::Limits;
use thiserror::Error;

/// Configuration for a [`Registry`](crate::Registry).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of server names the registry will hold.
    pub max_names: u32,
    /// Skip reconnecting when a reconcile repeats a name's current endpoint.
    pub skip_unchanged: bool,
}

impl RegistryConfig {
    /// Sets the name limit.
    #[must_use]
    pub const fn with_max_names(mut self, max_names: u32) -> Self {
        self.max_names = max_names;
        self
    }

    /// Reconnect on every reconcile, even when the endpoint is unchanged.
    #[must_use]
    pub const fn always_reconnect(mut self) -> Self {
        self.skip_unchanged = false;
        self
    }

    /// Creates a configuration for testing (small name limit).
    #[must_use]
    pub fn for_testing() -> Self {
        Self::default().with_max_names(64)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if `max_names` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_names == 0 {
            return Err(ConfigError::InvalidRegistry {
                message: "max_names must be positive".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_names: Limits::new().names_max,
            skip_unchanged: true,
        }
    }
}

/// Configuration for a [`TableRoute`](crate::TableRoute).
#[derive(Debug, Clone, Default)]
pub struct TableRouteConfig {
    /// Partition and follower bounds.
    pub limits: Limits,
    /// Seed for follower selection. `None` seeds each entry from entropy.
    pub follower_seed: Option<u64>,
}

impl TableRouteConfig {
    /// Sets the limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Makes follower selection deterministic.
    #[must_use]
    pub const fn with_follower_seed(mut self, seed: u64) -> Self {
        self.follower_seed = Some(seed);
        self
    }

    /// Creates a configuration for testing (fixed seed).
    #[must_use]
    pub fn for_testing() -> Self {
        Self::default().with_follower_seed(0x7AB1_E5EE_D000_0001)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if `partitions_max` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits
            .validate_table()
            .map_err(|e| ConfigError::InvalidLimits {
                message: e.to_string(),
            })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Invalid registry configuration.
    #[error("invalid registry config: {message}")]
    InvalidRegistry {
        /// Error description.
        message: String,
    },
    /// Invalid limits.
    #[error("invalid limits: {message}")]
    InvalidLimits {
        /// Error description.
        message: String,
    },
}
