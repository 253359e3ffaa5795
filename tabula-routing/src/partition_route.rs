//! Partition route - an immutable leader/follower snapshot for one partition.
//!
//! A route is built once per topology change and never mutated. Replacing
//! the topology means building a new route and swapping it into the table
//! slot; readers holding the old route keep a consistent replica set.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tabula_core::PartitionId;

use crate::client_handle::ClientHandle;
use crate::connection::Connection;

/// Leader and ordered followers serving one partition.
pub struct PartitionRoute<C> {
    pid: PartitionId,
    leader: Arc<ClientHandle<C>>,
    followers: Vec<Arc<ClientHandle<C>>>,
    /// Guards only the draw in `follower()`.
    rng: Mutex<StdRng>,
}

impl<C: Connection> PartitionRoute<C> {
    /// Creates a route with an entropy-seeded follower generator.
    #[must_use]
    pub fn new(
        pid: PartitionId,
        leader: Arc<ClientHandle<C>>,
        followers: Vec<Arc<ClientHandle<C>>>,
    ) -> Self {
        Self::from_rng(pid, leader, followers, StdRng::from_entropy())
    }

    /// Creates a route with a deterministic follower generator.
    #[must_use]
    pub fn with_seed(
        pid: PartitionId,
        leader: Arc<ClientHandle<C>>,
        followers: Vec<Arc<ClientHandle<C>>>,
        seed: u64,
    ) -> Self {
        Self::from_rng(pid, leader, followers, StdRng::seed_from_u64(seed))
    }

    fn from_rng(
        pid: PartitionId,
        leader: Arc<ClientHandle<C>>,
        followers: Vec<Arc<ClientHandle<C>>>,
        rng: StdRng,
    ) -> Self {
        Self {
            pid,
            leader,
            followers,
            rng: Mutex::new(rng),
        }
    }

    /// Returns the partition id.
    #[must_use]
    pub const fn pid(&self) -> PartitionId {
        self.pid
    }

    /// Returns the leader's handle.
    #[must_use]
    pub const fn leader_handle(&self) -> &Arc<ClientHandle<C>> {
        &self.leader
    }

    /// Returns the follower handles in discovery order.
    #[must_use]
    pub fn follower_handles(&self) -> &[Arc<ClientHandle<C>>] {
        &self.followers
    }

    /// Returns the number of followers.
    #[must_use]
    pub fn follower_count(&self) -> usize {
        self.followers.len()
    }

    /// Returns the leader's current connection.
    ///
    /// Reflects the handle's latest connection even though the route itself
    /// never changes.
    #[must_use]
    pub fn leader(&self) -> Arc<C> {
        self.leader.get()
    }

    /// Returns the connection of a uniformly chosen follower.
    ///
    /// With no followers this returns the leader's connection: reads stay
    /// available at the cost of landing on the write replica.
    #[must_use]
    pub fn follower(&self) -> Arc<C> {
        match self.followers.len() {
            0 => self.leader(),
            1 => self.followers[0].get(),
            n => {
                let idx = self.rng.lock().gen_range(0..n);
                self.followers[idx].get()
            }
        }
    }

    /// Returns true if this route holds exactly these handles, in order.
    ///
    /// Compares handle identity, not names: a name that was removed and
    /// registered again has a new handle and needs a new route.
    #[must_use]
    pub fn has_handles(
        &self,
        leader: &Arc<ClientHandle<C>>,
        followers: &[Arc<ClientHandle<C>>],
    ) -> bool {
        Arc::ptr_eq(&self.leader, leader)
            && self.followers.len() == followers.len()
            && self
                .followers
                .iter()
                .zip(followers)
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }
}

impl<C: Connection> fmt::Debug for PartitionRoute<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let followers: Vec<&str> = self.followers.iter().map(|h| h.name()).collect();
        f.debug_struct("PartitionRoute")
            .field("pid", &self.pid)
            .field("leader", &self.leader.name())
            .field("followers", &followers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::test_util::{ep, MockConn};

    fn handle(name: &str, endpoint: &str) -> Arc<ClientHandle<MockConn>> {
        Arc::new(ClientHandle::new(name, Arc::new(MockConn::new(name, endpoint))))
    }

    #[test]
    fn test_leader_delegates_to_handle() {
        let leader = handle("tb1", "a:1");
        let route = PartitionRoute::new(PartitionId::new(0), Arc::clone(&leader), Vec::new());

        assert_eq!(route.leader().endpoint(), &ep("a:1"));

        // Handle swaps are visible through the immutable route.
        leader.publish(Arc::new(MockConn::new("tb1", "a:2")));
        assert_eq!(route.leader().endpoint(), &ep("a:2"));
    }

    #[test]
    fn test_follower_falls_back_to_leader() {
        let route = PartitionRoute::new(PartitionId::new(3), handle("tb1", "a:1"), Vec::new());

        assert_eq!(route.follower_count(), 0);
        assert_eq!(route.follower().name(), "tb1");
    }

    #[test]
    fn test_single_follower() {
        let route = PartitionRoute::new(
            PartitionId::new(0),
            handle("tb1", "a:1"),
            vec![handle("tb2", "b:1")],
        );

        for _ in 0..16 {
            assert_eq!(route.follower().name(), "tb2");
        }
    }

    #[test]
    fn test_follower_selection_is_roughly_uniform() {
        let followers = vec![handle("tb2", "b:1"), handle("tb3", "c:1"), handle("tb4", "d:1")];
        let route = PartitionRoute::with_seed(PartitionId::new(0), handle("tb1", "a:1"), followers, 42);

        let draws = 30_000;
        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..draws {
            *counts.entry(route.follower().name().to_string()).or_default() += 1;
        }

        assert_eq!(counts.len(), 3);
        assert!(!counts.contains_key("tb1"));
        for (name, count) in counts {
            // Expect ~10_000 each; allow a wide margin.
            assert!((8_500..11_500).contains(&count), "{name} drawn {count} times");
        }
    }

    #[test]
    fn test_seeded_routes_draw_identically() {
        let followers = || vec![handle("tb2", "b:1"), handle("tb3", "c:1")];
        let a = PartitionRoute::with_seed(PartitionId::new(0), handle("tb1", "a:1"), followers(), 7);
        let b = PartitionRoute::with_seed(PartitionId::new(0), handle("tb1", "a:1"), followers(), 7);

        for _ in 0..32 {
            assert_eq!(a.follower().name(), b.follower().name());
        }
    }

    #[test]
    fn test_has_handles() {
        let leader = handle("tb1", "a:1");
        let (tb2, tb3) = (handle("tb2", "b:1"), handle("tb3", "c:1"));
        let route = PartitionRoute::new(
            PartitionId::new(0),
            Arc::clone(&leader),
            vec![Arc::clone(&tb2), Arc::clone(&tb3)],
        );

        assert!(route.has_handles(&leader, &[Arc::clone(&tb2), Arc::clone(&tb3)]));
        assert!(!route.has_handles(&leader, &[Arc::clone(&tb3), Arc::clone(&tb2)]));
        assert!(!route.has_handles(&leader, &[Arc::clone(&tb2)]));

        // Same name, different handle.
        let tb1_again = handle("tb1", "a:1");
        assert!(!route.has_handles(&tb1_again, &[tb2, tb3]));
    }

    #[test]
    fn test_concurrent_follower_draws() {
        let route = Arc::new(PartitionRoute::new(
            PartitionId::new(0),
            handle("tb1", "a:1"),
            vec![handle("tb2", "b:1"), handle("tb3", "c:1")],
        ));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let route = Arc::clone(&route);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        let name = route.follower().name().to_string();
                        assert!(name == "tb2" || name == "tb3");
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
    }
}
