//! Replica placement planning for a single shard.
//!
//! The plan is advisory input to the convergence loop, not an immediate
//! mutation. Growth picks the least-loaded healthy servers not already
//! holding the shard; shrink drops trailing followers and never touches the
//! leader replica at index 0.

use std::collections::BTreeMap;

use crate::catalog::{CurrentSnapshot, PlanSnapshot, ServerHealth, ServerId};

/// Add/remove plan for one shard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaChanges {
    pub to_add: Vec<ServerId>,
    /// Highest replica index first.
    pub to_remove: Vec<ServerId>,
}

impl ReplicaChanges {
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Healthy servers scored by how many shard replicas each currently holds.
#[derive(Debug, Clone, Default)]
pub struct ServerPool {
    loads: BTreeMap<ServerId, usize>,
}

impl ServerPool {
    /// Healthy members of the Plan, scored over the Current snapshot.
    pub fn from_snapshots(plan: &PlanSnapshot, current: &CurrentSnapshot) -> Self {
        let mut loads = BTreeMap::new();
        for server in plan.servers.values() {
            if server.health == ServerHealth::Good {
                loads.insert(server.server_id, 0usize);
            }
        }
        for shard in current.shards.values() {
            for server in &shard.servers {
                if let Some(load) = loads.get_mut(server) {
                    *load += 1;
                }
            }
        }
        Self { loads }
    }

    #[cfg(test)]
    fn with_loads(loads: impl IntoIterator<Item = (ServerId, usize)>) -> Self {
        Self {
            loads: loads.into_iter().collect(),
        }
    }
}

/// Compute the replica changes that take `current_servers` (index 0 =
/// leader) to `desired` replicas.
pub fn plan_replica_changes(
    current_servers: &[ServerId],
    desired: u32,
    pool: &ServerPool,
) -> ReplicaChanges {
    let have = current_servers.len();
    let want = desired as usize;

    if want > have {
        let mut candidates: Vec<(usize, ServerId)> = pool
            .loads
            .iter()
            .filter(|(id, _)| !current_servers.contains(id))
            .map(|(id, load)| (*load, *id))
            .collect();
        // Least-loaded first; ties break on the lower server id.
        candidates.sort_unstable();
        let to_add = candidates
            .into_iter()
            .take(want - have)
            .map(|(_, id)| id)
            .collect();
        return ReplicaChanges {
            to_add,
            to_remove: Vec::new(),
        };
    }

    if want < have {
        // Validation guarantees want >= 1; the min() keeps index 0 alive
        // even against a malformed plan.
        let removable = (have - want).min(have.saturating_sub(1));
        let to_remove = current_servers[have - removable..]
            .iter()
            .rev()
            .copied()
            .collect();
        return ReplicaChanges {
            to_add: Vec::new(),
            to_remove,
        };
    }

    ReplicaChanges::default()
}
