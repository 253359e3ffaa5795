//! Reusable test scenarios for routing tests.
//!
//! Scenarios bundle a simulated cluster with a registry and catalog wired the
//! way a client process would wire them, so tests only describe topology
//! changes and faults.

use std::sync::Arc;

use tabula_core::{Endpoint, PartitionId, TableId};
use tabula_routing::{
    Catalog, PartitionDesc, Registry, RegistryConfig, Resolver, StaticResolver, TableRouteConfig,
};

use crate::simulated_tablet::{SimulatedCluster, SimulatedConnector};

/// Standard cluster layouts.
pub mod clusters {
    /// Three tablets: logical name, real endpoint, external endpoint.
    pub const THREE_TABLETS: &[(&str, &str, &str)] = &[
        ("tb1", "127.0.0.1:9831", "127.0.0.1:8881"),
        ("tb2", "127.0.0.1:9931", "127.0.0.1:8882"),
        ("tb3", "127.0.0.1:10031", "127.0.0.1:8883"),
    ];

    /// Spare endpoint a tablet can move to.
    pub const SPARE_ENDPOINT: &str = "127.0.0.1:10131";
}

/// Seeds for reproducible testing.
pub mod seeds {
    /// Follower-selection seeds used across property tests.
    pub const REGRESSION_SEEDS: &[u64] = &[42, 12345, 0xDEAD_BEEF, 999, 7777, 0x1337, 1, 0];
}

/// A client process attached to a simulated tablet cluster.
#[derive(Debug)]
pub struct RoutingFixture {
    /// The simulated servers.
    pub cluster: SimulatedCluster,
    /// Alias table published by the coordination service.
    pub resolver: Arc<StaticResolver>,
    /// Process-wide registry.
    pub registry: Arc<Registry<SimulatedConnector>>,
    /// Tables routed by this process.
    pub catalog: Catalog<SimulatedConnector>,
}

impl RoutingFixture {
    /// Starts every tablet in `layout`, publishes its aliases, and refreshes
    /// the registry from them.
    ///
    /// # Panics
    ///
    /// Panics if the registry cannot be created or the initial refresh fails.
    #[must_use]
    pub fn start(layout: &[(&str, &str, &str)]) -> Self {
        Self::start_with(layout, RegistryConfig::for_testing(), TableRouteConfig::for_testing())
    }

    /// Like [`RoutingFixture::start`] with explicit configuration.
    ///
    /// # Panics
    ///
    /// Panics if the registry cannot be created or the initial refresh fails.
    #[must_use]
    pub fn start_with(
        layout: &[(&str, &str, &str)],
        registry_config: RegistryConfig,
        table_config: TableRouteConfig,
    ) -> Self {
        let cluster = SimulatedCluster::new();
        let resolver = Arc::new(StaticResolver::new());

        for &(name, real, external) in layout {
            cluster.add_tablet(real);
            resolver.set(name, endpoint(real));
            resolver.set_external(name, endpoint(external));
        }

        let aliases: Arc<dyn Resolver> = resolver.clone();
        let registry = Arc::new(
            Registry::new(cluster.connector(), aliases, registry_config)
                .expect("valid registry config"),
        );
        registry
            .refresh(layout.iter().map(|(name, _, _)| *name))
            .into_result()
            .expect("initial refresh");

        let catalog = Catalog::new(Arc::clone(&registry), table_config);
        Self {
            cluster,
            resolver,
            registry,
            catalog,
        }
    }

    /// Creates a table and places every described partition on the cluster.
    ///
    /// Names in the descriptions are resolved to endpoints through the
    /// resolver, so the cluster and the routes agree on placement.
    ///
    /// # Panics
    ///
    /// Panics if a name has no published alias or the table cannot be created.
    pub fn create_table(&self, table_id: TableId, partition_count: u32, descs: &[PartitionDesc]) {
        for desc in descs {
            self.place(desc);
        }
        self.catalog
            .create_table(table_id, partition_count, descs)
            .expect("create table");
    }

    /// Moves a partition's replicas on the cluster and applies the change to
    /// the routes.
    ///
    /// # Panics
    ///
    /// Panics if a name has no published alias or the update fails.
    pub fn move_partition(&self, desc: &PartitionDesc) {
        self.place(desc);
        self.catalog.apply(desc).expect("apply partition");
    }

    /// Publishes a new real endpoint for `name`, starts a tablet there, and
    /// refreshes the registry.
    ///
    /// # Panics
    ///
    /// Panics if the refresh fails.
    pub fn relocate(&self, name: &str, real: &str) {
        self.cluster.add_tablet(real);
        self.resolver.set(name, endpoint(real));
        self.registry
            .refresh([name])
            .into_result()
            .expect("refresh after relocation");
    }

    fn place(&self, desc: &PartitionDesc) {
        let leader = self.real(&desc.leader);
        let followers: Vec<String> = desc.followers.iter().map(|f| self.real(f)).collect();
        let followers: Vec<&str> = followers.iter().map(String::as_str).collect();
        self.cluster.assign(desc.table_id, desc.pid, &leader, &followers);
    }

    fn real(&self, name: &str) -> String {
        self.resolver
            .resolve(name)
            .unwrap_or_else(|| panic!("no alias published for {name}"))
            .to_string()
    }
}

/// Describes partition `pid` of `table` led by `leader`.
#[must_use]
pub fn partition(table: u64, pid: u64, leader: &str, followers: &[&str]) -> PartitionDesc {
    PartitionDesc::new(TableId::new(table), PartitionId::new(pid), leader)
        .with_followers(followers.iter().copied())
}

/// Parses a test endpoint.
///
/// # Panics
///
/// Panics on an empty endpoint.
#[must_use]
pub fn endpoint(s: &str) -> Endpoint {
    Endpoint::new(s).expect("valid endpoint")
}

/// Installs a `tracing` subscriber honoring `RUST_LOG`, once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
