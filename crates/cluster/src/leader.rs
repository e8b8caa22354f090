//! Lease-based partition ownership.
//!
//! The order space is divided into a fixed number of partitions. Each
//! partition is owned by at most one node at a time, through a time-bounded
//! lease that must be renewed before it expires. A node only orchestrates
//! orders that hash into partitions it currently holds, so two nodes never
//! drive the same saga concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;

/// Default lease duration before a partition falls back up for grabs.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(30);

/// Outcome of a lease acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseResult {
    /// The partition lease was acquired.
    Acquired {
        /// Token that must be presented on renewal and release.
        lease_token: String,
        /// How long the lease is valid.
        lease_duration: Duration,
    },

    /// Another node holds the partition.
    Held {
        /// The node currently holding the lease, if known.
        current_owner: Option<String>,
    },
}

impl LeaseResult {
    /// Returns true if the lease was acquired.
    pub fn is_acquired(&self) -> bool {
        matches!(self, LeaseResult::Acquired { .. })
    }

    /// Returns the lease token if acquired.
    pub fn lease_token(&self) -> Option<&str> {
        match self {
            LeaseResult::Acquired { lease_token, .. } => Some(lease_token),
            LeaseResult::Held { .. } => None,
        }
    }
}

/// Outcome of a lease renewal attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalResult {
    /// The lease was extended.
    Renewed {
        /// The refreshed lease duration.
        lease_duration: Duration,
    },

    /// The lease expired or was taken by another node.
    Lost,

    /// The presented token does not match the current lease.
    InvalidToken,
}

impl RenewalResult {
    /// Returns true if the lease was renewed.
    pub fn is_renewed(&self) -> bool {
        matches!(self, RenewalResult::Renewed { .. })
    }
}

/// Lease-based coordination over named partitions.
///
/// Acquisition must be atomic across nodes: when two nodes race on an
/// unowned partition, exactly one acquires the lease.
#[async_trait]
pub trait LeaseCoordinator: Send + Sync {
    /// Attempts to acquire the lease for a partition.
    ///
    /// A node that already holds the partition gets a fresh token back.
    async fn try_acquire(&self, partition_key: &str, instance_id: &str) -> Result<LeaseResult>;

    /// Renews an existing lease before it expires.
    async fn renew(&self, partition_key: &str, lease_token: &str) -> Result<RenewalResult>;

    /// Voluntarily releases a lease for faster failover on shutdown.
    ///
    /// Returns true if the lease was released, false if it was already
    /// expired or held by someone else.
    async fn release(&self, partition_key: &str, lease_token: &str) -> Result<bool>;

    /// Returns the node currently holding a partition, if any.
    async fn current_owner(&self, partition_key: &str) -> Result<Option<String>>;
}

/// Maps aggregates onto a fixed set of partition keys.
///
/// The mapping is a pure function of the aggregate ID, so every node
/// routes a given order to the same partition without coordination.
#[derive(Debug, Clone)]
pub struct PartitionRouter {
    partition_count: u32,
}

impl PartitionRouter {
    /// Creates a router over the given number of partitions.
    pub fn new(partition_count: u32) -> Self {
        debug_assert!(partition_count > 0);
        Self { partition_count }
    }

    /// Returns the number of partitions.
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Returns the partition an aggregate belongs to.
    pub fn partition_for(&self, aggregate_id: AggregateId) -> u32 {
        let id: Uuid = aggregate_id.into();
        (id.as_u128() % u128::from(self.partition_count)) as u32
    }

    /// Returns the lease key for a partition.
    pub fn partition_key(&self, partition: u32) -> String {
        format!("orders/partition-{partition}")
    }

    /// Returns every partition key this router manages.
    pub fn all_partition_keys(&self) -> Vec<String> {
        (0..self.partition_count)
            .map(|p| self.partition_key(p))
            .collect()
    }
}

/// A node's view of its place in the cluster.
///
/// Combines the router with a coordinator and answers the one question the
/// orchestrator needs: "am I allowed to drive this order right now?"
pub struct ClusterNode<C: LeaseCoordinator> {
    instance_id: String,
    router: PartitionRouter,
    coordinator: C,
}

impl<C: LeaseCoordinator> ClusterNode<C> {
    /// Creates a node handle with a unique instance ID.
    pub fn new(instance_id: impl Into<String>, router: PartitionRouter, coordinator: C) -> Self {
        Self {
            instance_id: instance_id.into(),
            router,
            coordinator,
        }
    }

    /// Returns this node's instance ID.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Returns the partition router.
    pub fn router(&self) -> &PartitionRouter {
        &self.router
    }

    /// Returns the underlying coordinator.
    pub fn coordinator(&self) -> &C {
        &self.coordinator
    }

    /// Attempts to acquire every partition this node does not yet own.
    ///
    /// Returns the lease tokens for partitions acquired in this pass,
    /// keyed by partition key.
    pub async fn acquire_partitions(&self) -> Result<HashMap<String, String>> {
        let mut acquired = HashMap::new();
        for key in self.router.all_partition_keys() {
            match self.coordinator.try_acquire(&key, &self.instance_id).await? {
                LeaseResult::Acquired { lease_token, .. } => {
                    tracing::info!(partition = %key, "acquired partition lease");
                    acquired.insert(key, lease_token);
                }
                LeaseResult::Held { current_owner } => {
                    tracing::debug!(
                        partition = %key,
                        owner = current_owner.as_deref().unwrap_or("unknown"),
                        "partition held by another node"
                    );
                }
            }
        }
        Ok(acquired)
    }

    /// Returns true if this node currently owns the partition for an order.
    pub async fn is_leader_for(&self, aggregate_id: AggregateId) -> Result<bool> {
        let partition = self.router.partition_for(aggregate_id);
        let key = self.router.partition_key(partition);
        let owner = self.coordinator.current_owner(&key).await?;
        Ok(owner.as_deref() == Some(self.instance_id.as_str()))
    }
}

/// A single partition lease.
#[derive(Debug, Clone)]
struct Lease {
    instance_id: String,
    token: String,
    expires_at: DateTime<Utc>,
}

/// In-memory lease coordinator for tests and single-node setups.
///
/// Not suitable for multi-node deployments: leases only exist within
/// this process.
#[derive(Clone)]
pub struct InMemoryLeaseCoordinator {
    leases: Arc<RwLock<HashMap<String, Lease>>>,
    lease_duration: Duration,
}

impl InMemoryLeaseCoordinator {
    /// Creates a coordinator with the given lease duration.
    pub fn new(lease_duration: Duration) -> Self {
        Self {
            leases: Arc::new(RwLock::new(HashMap::new())),
            lease_duration,
        }
    }

    fn generate_token() -> String {
        Uuid::new_v4().to_string()
    }

    fn lease_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.lease_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(30))
    }
}

impl Default for InMemoryLeaseCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_LEASE_DURATION)
    }
}

#[async_trait]
impl LeaseCoordinator for InMemoryLeaseCoordinator {
    async fn try_acquire(&self, partition_key: &str, instance_id: &str) -> Result<LeaseResult> {
        let mut leases = self.leases.write().await;
        let now = Utc::now();

        if let Some(lease) = leases.get(partition_key) {
            if lease.expires_at > now {
                if lease.instance_id != instance_id {
                    return Ok(LeaseResult::Held {
                        current_owner: Some(lease.instance_id.clone()),
                    });
                }
                // We already own it; rotate the token and extend.
            }
            // Expired lease falls through to acquisition.
        }

        let lease = Lease {
            instance_id: instance_id.to_string(),
            token: Self::generate_token(),
            expires_at: self.lease_expiry(now),
        };
        let token = lease.token.clone();
        leases.insert(partition_key.to_string(), lease);

        Ok(LeaseResult::Acquired {
            lease_token: token,
            lease_duration: self.lease_duration,
        })
    }

    async fn renew(&self, partition_key: &str, lease_token: &str) -> Result<RenewalResult> {
        let mut leases = self.leases.write().await;
        let now = Utc::now();

        let Some(lease) = leases.get_mut(partition_key) else {
            return Ok(RenewalResult::Lost);
        };

        if lease.token != lease_token {
            return Ok(RenewalResult::InvalidToken);
        }

        if lease.expires_at <= now {
            return Ok(RenewalResult::Lost);
        }

        lease.expires_at = self.lease_expiry(now);
        Ok(RenewalResult::Renewed {
            lease_duration: self.lease_duration,
        })
    }

    async fn release(&self, partition_key: &str, lease_token: &str) -> Result<bool> {
        let mut leases = self.leases.write().await;

        match leases.get(partition_key) {
            Some(lease) if lease.token == lease_token => {
                leases.remove(partition_key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn current_owner(&self, partition_key: &str) -> Result<Option<String>> {
        let leases = self.leases.read().await;
        let now = Utc::now();

        Ok(leases
            .get(partition_key)
            .filter(|lease| lease.expires_at > now)
            .map(|lease| lease.instance_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_then_held_by_other() {
        let coordinator = InMemoryLeaseCoordinator::default();

        let result = coordinator.try_acquire("orders/partition-0", "node-a").await.unwrap();
        assert!(result.is_acquired());

        let result = coordinator.try_acquire("orders/partition-0", "node-b").await.unwrap();
        assert_eq!(
            result,
            LeaseResult::Held {
                current_owner: Some("node-a".to_string())
            }
        );
    }

    #[tokio::test]
    async fn reacquire_by_owner_rotates_token() {
        let coordinator = InMemoryLeaseCoordinator::default();

        let first = coordinator.try_acquire("p", "node-a").await.unwrap();
        let second = coordinator.try_acquire("p", "node-a").await.unwrap();

        assert!(second.is_acquired());
        assert_ne!(first.lease_token(), second.lease_token());
    }

    #[tokio::test]
    async fn renew_with_valid_token() {
        let coordinator = InMemoryLeaseCoordinator::default();

        let result = coordinator.try_acquire("p", "node-a").await.unwrap();
        let token = result.lease_token().unwrap().to_string();

        let renewal = coordinator.renew("p", &token).await.unwrap();
        assert!(renewal.is_renewed());
    }

    #[tokio::test]
    async fn renew_with_wrong_token_is_rejected() {
        let coordinator = InMemoryLeaseCoordinator::default();
        coordinator.try_acquire("p", "node-a").await.unwrap();

        let renewal = coordinator.renew("p", "bogus").await.unwrap();
        assert_eq!(renewal, RenewalResult::InvalidToken);
    }

    #[tokio::test]
    async fn renew_unknown_partition_is_lost() {
        let coordinator = InMemoryLeaseCoordinator::default();
        let renewal = coordinator.renew("p", "token").await.unwrap();
        assert_eq!(renewal, RenewalResult::Lost);
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over() {
        let coordinator = InMemoryLeaseCoordinator::new(Duration::from_secs(0));

        coordinator.try_acquire("p", "node-a").await.unwrap();
        let result = coordinator.try_acquire("p", "node-b").await.unwrap();
        assert!(result.is_acquired());

        let owner = coordinator.current_owner("p").await.unwrap();
        // Zero-duration leases expire immediately, so no owner is visible.
        assert_eq!(owner, None);
    }

    #[tokio::test]
    async fn release_frees_the_partition() {
        let coordinator = InMemoryLeaseCoordinator::default();

        let result = coordinator.try_acquire("p", "node-a").await.unwrap();
        let token = result.lease_token().unwrap().to_string();

        assert!(coordinator.release("p", &token).await.unwrap());
        assert_eq!(coordinator.current_owner("p").await.unwrap(), None);

        let result = coordinator.try_acquire("p", "node-b").await.unwrap();
        assert!(result.is_acquired());
    }

    #[tokio::test]
    async fn release_with_wrong_token_is_rejected() {
        let coordinator = InMemoryLeaseCoordinator::default();
        coordinator.try_acquire("p", "node-a").await.unwrap();

        assert!(!coordinator.release("p", "bogus").await.unwrap());
        assert_eq!(
            coordinator.current_owner("p").await.unwrap(),
            Some("node-a".to_string())
        );
    }

    #[test]
    fn router_is_deterministic_and_in_range() {
        let router = PartitionRouter::new(8);

        for _ in 0..64 {
            let id = AggregateId::new();
            let p1 = router.partition_for(id);
            let p2 = router.partition_for(id);
            assert_eq!(p1, p2);
            assert!(p1 < 8);
        }
    }

    #[test]
    fn router_key_format() {
        let router = PartitionRouter::new(4);
        assert_eq!(router.partition_key(2), "orders/partition-2");
        assert_eq!(router.all_partition_keys().len(), 4);
    }

    #[tokio::test]
    async fn node_owns_orders_in_acquired_partitions() {
        let coordinator = InMemoryLeaseCoordinator::default();
        let router = PartitionRouter::new(1);
        let node = ClusterNode::new("node-a", router, coordinator);

        let order_id = AggregateId::new();
        assert!(!node.is_leader_for(order_id).await.unwrap());

        let acquired = node.acquire_partitions().await.unwrap();
        assert_eq!(acquired.len(), 1);
        assert!(node.is_leader_for(order_id).await.unwrap());
    }

    #[tokio::test]
    async fn only_one_node_owns_a_partition() {
        let coordinator = InMemoryLeaseCoordinator::default();
        let router = PartitionRouter::new(1);
        let node_a = ClusterNode::new("node-a", router.clone(), coordinator.clone());
        let node_b = ClusterNode::new("node-b", router, coordinator);

        assert_eq!(node_a.acquire_partitions().await.unwrap().len(), 1);
        assert_eq!(node_b.acquire_partitions().await.unwrap().len(), 0);

        let order_id = AggregateId::new();
        assert!(node_a.is_leader_for(order_id).await.unwrap());
        assert!(!node_b.is_leader_for(order_id).await.unwrap());
    }
}
