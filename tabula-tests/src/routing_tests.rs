//! Routing integration tests.
//!
//! These tests verify the registry, table routes and catalog against the
//! simulated tablet cluster: writes reach leaders, reads reach followers, and
//! topology changes are picked up without rebuilding what did not change.

// Test-specific lint allowances - these are less critical in test code.
#![allow(clippy::too_many_lines)] // Test functions can be longer for clarity
#![allow(clippy::significant_drop_tightening)] // Test code clarity > drop optimization

use std::sync::Arc;

use tabula_core::{PartitionId, TableId};
use tabula_routing::{
    Connection, IdentityResolver, Registry, RegistryConfig, Resolver, RoutingError,
    StaticResolver,
};

use crate::scenarios::clusters::{SPARE_ENDPOINT, THREE_TABLETS};
use crate::scenarios::{endpoint, init_tracing, partition, RoutingFixture};
use crate::simulated_tablet::{SimulatedCluster, TabletError};

const TID: TableId = TableId::new(1);
const PID: PartitionId = PartitionId::new(0);

fn fixture_with_partition(leader: &str, followers: &[&str]) -> RoutingFixture {
    init_tracing();
    let fixture = RoutingFixture::start(THREE_TABLETS);
    fixture.create_table(TID, 1, &[partition(1, 0, leader, followers)]);
    fixture
}

#[test]
fn test_routing_leader_write_follower_read() {
    let fixture = fixture_with_partition("tb1", &["tb2"]);

    let leader = fixture.catalog.leader_for(TID, PID).unwrap();
    assert_eq!(leader.name(), "tb1");
    leader.put(TID, PID, "1", 1, "a").unwrap();

    assert_eq!(fixture.cluster.replicate(), 1);

    let follower = fixture.catalog.follower_for(TID, PID).unwrap();
    assert_eq!(follower.name(), "tb2");
    let rows = follower.traverse(TID, PID).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, "1");
    assert_eq!(rows[0].ts, 1);
    assert_eq!(rows[0].value, "a");
}

#[test]
fn test_routing_follower_read_lags_until_replication() {
    let fixture = fixture_with_partition("tb1", &["tb2", "tb3"]);

    let leader = fixture.catalog.leader_for(TID, PID).unwrap();
    leader.put(TID, PID, "k", 1, "v1").unwrap();
    leader.put(TID, PID, "k", 2, "v2").unwrap();

    // Nothing shipped yet.
    let follower = fixture.catalog.follower_for(TID, PID).unwrap();
    assert!(follower.traverse(TID, PID).unwrap().is_empty());
    assert_eq!(fixture.cluster.pending_replication(), 4);

    assert_eq!(fixture.cluster.replicate(), 4);
    for _ in 0..8 {
        let rows = fixture
            .catalog
            .follower_for(TID, PID)
            .unwrap()
            .traverse(TID, PID)
            .unwrap();
        let versions: Vec<u64> = rows.iter().map(|r| r.ts).collect();
        assert_eq!(versions, vec![2, 1]);
    }
}

#[test]
fn test_routing_writes_to_follower_are_rejected() {
    let fixture = fixture_with_partition("tb1", &["tb2"]);

    let follower = fixture.catalog.follower_for(TID, PID).unwrap();
    let err = follower.put(TID, PID, "1", 1, "a").unwrap_err();
    assert!(matches!(err, TabletError::NotLeader { .. }));
}

#[test]
fn test_routing_leader_without_followers_serves_reads() {
    let fixture = fixture_with_partition("tb3", &[]);

    let leader = fixture.catalog.leader_for(TID, PID).unwrap();
    leader.put(TID, PID, "1", 1, "a").unwrap();

    // Reads fall back to the leader.
    let reader = fixture.catalog.follower_for(TID, PID).unwrap();
    assert_eq!(reader.name(), "tb3");
    assert_eq!(reader.traverse(TID, PID).unwrap().len(), 1);
}

#[test]
fn test_routing_leader_failover() {
    let fixture = fixture_with_partition("tb1", &["tb2"]);
    let before = fixture.catalog.table(TID).unwrap().entry(PID).unwrap();

    fixture.move_partition(&partition(1, 0, "tb2", &["tb1"]));

    let leader = fixture.catalog.leader_for(TID, PID).unwrap();
    assert_eq!(leader.name(), "tb2");
    leader.put(TID, PID, "1", 1, "a").unwrap();

    // A reader still holding the old route sees the old, consistent
    // topology; its writes are refused by the demoted tablet.
    assert_eq!(before.leader().name(), "tb1");
    let err = before.leader().put(TID, PID, "2", 1, "b").unwrap_err();
    assert!(matches!(err, TabletError::NotLeader { .. }));
}

#[test]
fn test_routing_unchanged_placement_keeps_route() {
    let fixture = fixture_with_partition("tb1", &["tb2", "tb3"]);
    let before = fixture.catalog.table(TID).unwrap().entry(PID).unwrap();
    let sessions = fixture.cluster.sessions_opened();

    let replaced = fixture
        .catalog
        .apply(&partition(1, 0, "tb1", &["tb2", "tb3"]))
        .unwrap();

    assert!(!replaced);
    let after = fixture.catalog.table(TID).unwrap().entry(PID).unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(fixture.cluster.sessions_opened(), sessions);
}

#[test]
fn test_routing_name_indirection() {
    init_tracing();
    let cluster = SimulatedCluster::new();
    cluster.add_tablet("127.0.0.1:9631");
    cluster.add_tablet("127.0.0.1:9632");

    let resolver = Arc::new(StaticResolver::new());
    resolver.set("ns1", endpoint("127.0.0.1:9631"));
    let registry = Registry::new(
        cluster.connector(),
        Arc::clone(&resolver) as Arc<dyn Resolver>,
        RegistryConfig::default(),
    )
    .unwrap();

    registry.refresh(["ns1"]).into_result().unwrap();
    let held = registry.lookup("ns1").unwrap();
    assert_eq!(held.get().endpoint(), &endpoint("127.0.0.1:9631"));
    assert_eq!(registry.endpoint("ns1"), Some(endpoint("127.0.0.1:9631")));

    // The alias moves; the holder observes it without looking up again.
    resolver.set("ns1", endpoint("127.0.0.1:9632"));
    registry.refresh(["ns1"]).into_result().unwrap();
    assert_eq!(held.get().endpoint(), &endpoint("127.0.0.1:9632"));
    assert_eq!(held.get().name(), "ns1");
    assert!(Arc::ptr_eq(&held, &registry.lookup("ns1").unwrap()));
}

#[test]
fn test_routing_name_is_its_own_endpoint_without_alias() {
    let cluster = SimulatedCluster::new();
    cluster.add_tablet("127.0.0.1:9831");
    let registry = Registry::new(
        cluster.connector(),
        Arc::new(IdentityResolver),
        RegistryConfig::default(),
    )
    .unwrap();

    let handle = registry.resolve("127.0.0.1:9831").unwrap();
    assert_eq!(handle.endpoint(), endpoint("127.0.0.1:9831"));

    // Unknown endpoints are refused by the connector.
    let err = registry.resolve("127.0.0.1:1").unwrap_err();
    assert!(matches!(err, RoutingError::SessionInit { .. }));
    assert!(registry.lookup("127.0.0.1:1").is_none());
}

#[test]
fn test_routing_external_endpoints_tracked_separately() {
    init_tracing();
    let fixture = RoutingFixture::start(THREE_TABLETS);

    for &(name, real, external) in THREE_TABLETS {
        assert_eq!(fixture.registry.endpoint(name), Some(endpoint(real)));
        assert_eq!(fixture.registry.external_endpoint(name), Some(endpoint(external)));
    }

    // Moving the real endpoint leaves the external one alone.
    fixture.relocate("tb1", SPARE_ENDPOINT);
    assert_eq!(fixture.registry.endpoint("tb1"), Some(endpoint(SPARE_ENDPOINT)));
    assert_eq!(
        fixture.registry.external_endpoint("tb1"),
        Some(endpoint("127.0.0.1:8881"))
    );

    // Routing never goes through the external class.
    let handle = fixture.registry.lookup("tb1").unwrap();
    assert_eq!(handle.endpoint(), endpoint(SPARE_ENDPOINT));
}

#[test]
fn test_routing_partial_batch_applies_the_rest() {
    let fixture = fixture_with_partition("tb1", &["tb2"]);
    fixture.cluster.add_tablet(SPARE_ENDPOINT);
    fixture.cluster.add_tablet("127.0.0.1:10231");
    fixture.cluster.crash("127.0.0.1:10231");

    let report = fixture.registry.reconcile([
        ("tb1", SPARE_ENDPOINT),
        ("tb2", "127.0.0.1:10231"),
        ("tb3", "127.0.0.1:10031"),
    ]);

    assert_eq!(report.applied, vec!["tb1".to_string()]);
    assert_eq!(report.unchanged, vec!["tb3".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "tb2");
    assert!(matches!(
        report.into_result(),
        Err(RoutingError::PartialBatch { failed: 1, total: 3 })
    ));

    // The failed name keeps serving from where it was.
    let tb2 = fixture.registry.lookup("tb2").unwrap();
    assert_eq!(tb2.endpoint(), endpoint("127.0.0.1:9931"));
    assert_eq!(fixture.registry.endpoint("tb2"), Some(endpoint("127.0.0.1:9931")));
    assert!(tb2.get().traverse(TID, PID).is_ok());
}

#[test]
fn test_routing_handshake_rejection_keeps_old_session() {
    let fixture = fixture_with_partition("tb1", &["tb2"]);
    fixture.cluster.add_tablet(SPARE_ENDPOINT);
    fixture.cluster.reject_handshakes(SPARE_ENDPOINT);

    let old = fixture.registry.lookup("tb1").unwrap().get();
    let report = fixture.registry.reconcile([("tb1", SPARE_ENDPOINT)]);

    assert!(!report.is_complete());
    let (_, err) = &report.failed[0];
    assert!(matches!(err, RoutingError::SessionInit { .. }));

    let current = fixture.catalog.leader_for(TID, PID).unwrap();
    assert!(Arc::ptr_eq(&old, &current));
    current.put(TID, PID, "1", 1, "a").unwrap();
}

#[test]
fn test_routing_repeated_refresh_opens_no_sessions() {
    init_tracing();
    let fixture = RoutingFixture::start(THREE_TABLETS);
    let sessions = fixture.cluster.sessions_opened();
    assert_eq!(sessions, 3);

    for _ in 0..5 {
        let report = fixture.registry.refresh(["tb1", "tb2", "tb3"]);
        assert_eq!(report.unchanged.len(), 3);
    }
    assert_eq!(fixture.cluster.sessions_opened(), sessions);
}

#[test]
fn test_routing_remove_closes_session() {
    let fixture = fixture_with_partition("tb1", &["tb3"]);
    let follower = fixture.catalog.follower_for(TID, PID).unwrap();

    let removed = fixture.registry.remove("tb3").unwrap();
    assert_eq!(removed.name(), "tb3");
    assert!(fixture.registry.lookup("tb3").is_none());

    // The route still holds the handle; its session is closed.
    assert!(follower.is_closed());
    let err = follower.traverse(TID, PID).unwrap_err();
    assert!(matches!(err, TabletError::Closed { .. }));

    // Re-applying the placement registers the name again and rebuilds.
    assert!(fixture
        .catalog
        .apply(&partition(1, 0, "tb1", &["tb3"]))
        .unwrap());
    let follower = fixture.catalog.follower_for(TID, PID).unwrap();
    assert!(!follower.is_closed());
    assert!(follower.traverse(TID, PID).is_ok());
}

#[test]
fn test_routing_crashed_leader_at_build_recovers() {
    init_tracing();
    let fixture = RoutingFixture::start(THREE_TABLETS);
    let desc = partition(1, 0, "tb4", &["tb2"]);

    // No alias and no tablet for tb4: the partition starts unroutable.
    fixture.catalog.create_table(TID, 2, &[desc]).unwrap();
    assert!(fixture.catalog.leader_for(TID, PID).is_none());
    assert_eq!(fixture.catalog.table(TID).unwrap().routable_count(), 0);

    fixture.cluster.add_tablet(SPARE_ENDPOINT);
    fixture.resolver.set("tb4", endpoint(SPARE_ENDPOINT));
    fixture.move_partition(&partition(1, 0, "tb4", &["tb2"]));

    let leader = fixture.catalog.leader_for(TID, PID).unwrap();
    assert_eq!(leader.name(), "tb4");
    leader.put(TID, PID, "1", 1, "a").unwrap();
}

#[test]
fn test_routing_tables_share_sessions() {
    init_tracing();
    let fixture = RoutingFixture::start(THREE_TABLETS);
    fixture.create_table(TableId::new(1), 1, &[partition(1, 0, "tb1", &["tb2"])]);
    fixture.create_table(TableId::new(2), 1, &[partition(2, 0, "tb1", &["tb3"])]);

    let a = fixture.catalog.leader_for(TableId::new(1), PID).unwrap();
    let b = fixture.catalog.leader_for(TableId::new(2), PID).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(fixture.cluster.sessions_opened(), 3);
    assert_eq!(fixture.catalog.table_ids(), vec![TableId::new(1), TableId::new(2)]);
}
