//! Shard-group resolution over the desired-state tree.
//!
//! Collections created with a shared shard layout form a group: one leader
//! and the followers that mirror its shard-to-server assignment. Replication
//! factor changes are only accepted on the leader and propagate to every
//! member.

use crate::catalog::{CollectionId, PlanSnapshot, ShardId};
use crate::error::CoordinatorError;

/// A leader collection and the followers mirroring its layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardGroup {
    pub leader: CollectionId,
    /// Ascending, leader excluded. Empty for standalone collections.
    pub followers: Vec<CollectionId>,
}

impl ShardGroup {
    /// Leader first, then followers.
    pub fn members(&self) -> impl Iterator<Item = CollectionId> + '_ {
        std::iter::once(self.leader).chain(self.followers.iter().copied())
    }

    pub fn contains(&self, collection: CollectionId) -> bool {
        self.leader == collection || self.followers.contains(&collection)
    }
}

/// Resolve the group a collection belongs to. Read-only; never waits on
/// convergence.
pub fn resolve_group(
    plan: &PlanSnapshot,
    collection: CollectionId,
) -> Result<ShardGroup, CoordinatorError> {
    let record = plan
        .collections
        .get(&collection)
        .ok_or(CoordinatorError::NotFound(collection))?;
    let leader = record.distribute_shards_like.unwrap_or(record.id);
    if !plan.collections.contains_key(&leader) {
        // Dangling layout reference; the leader was dropped out from under us.
        return Err(CoordinatorError::NotFound(leader));
    }
    let mut followers: Vec<CollectionId> = plan
        .collections
        .values()
        .filter(|c| c.distribute_shards_like == Some(leader))
        .map(|c| c.id)
        .collect();
    followers.sort_unstable();
    Ok(ShardGroup { leader, followers })
}

/// Every shard id belonging to any member of the group, ascending.
pub fn group_shards(plan: &PlanSnapshot, group: &ShardGroup) -> Vec<ShardId> {
    let mut shards: Vec<ShardId> = plan
        .shards
        .values()
        .filter(|s| group.contains(s.collection))
        .map(|s| s.shard_id)
        .collect();
    shards.sort_unstable();
    shards
}
