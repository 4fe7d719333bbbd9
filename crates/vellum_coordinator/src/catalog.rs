//! Control-plane data model: collections, shards, servers and the versioned
//! Plan/Current snapshots held in the consensus tree.
//!
//! Conceptual tree layout on the external store:
//! - `Plan/Collections/<collectionId>` -> collection record
//! - `Plan/Collections/<collectionId>/shards/<shardId>` -> desired replica count
//! - `Plan/Servers/<serverId>` -> health record
//! - `Current/Collections/<collectionId>/shards/<shardId>` -> `{servers: [...]}`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoordinatorError;

pub type CollectionId = u64;
pub type ServerId = u64;
pub type ShardId = u64;

/// Token accepted for unmanaged replication in a properties payload.
pub const UNMANAGED_TOKEN: &str = "unmanaged";

/// Replication factor recorded on a collection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReplicationFactor {
    /// Managed replication with a fixed replica count per shard.
    Count(u32),
    /// Unmanaged replication; never entered or left through the
    /// property-update path.
    Unmanaged,
}

/// A requested factor as it arrives from a properties-update payload,
/// before validation against cluster facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedFactor {
    Count(i64),
    Unmanaged,
}

impl RequestedFactor {
    /// Classify the raw JSON value of a `replicationFactor` property.
    ///
    /// Integers map to [`RequestedFactor::Count`] (range checks happen in
    /// validation, so negative and zero values pass through here), the
    /// unmanaged token maps to [`RequestedFactor::Unmanaged`], and every
    /// other shape is a bad parameter.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, CoordinatorError> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(Self::Count).ok_or_else(|| {
                CoordinatorError::BadParameter(format!("replication factor must be an integer, got {n}"))
            }),
            serde_json::Value::String(s) if s == UNMANAGED_TOKEN => Ok(Self::Unmanaged),
            other => Err(CoordinatorError::BadParameter(format!(
                "replication factor must be an integer or \"{UNMANAGED_TOKEN}\", got {other}"
            ))),
        }
    }
}

/// Health of a storage server as reported in the Plan tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServerHealth {
    Good,
    Failed,
}

/// Storage-server descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerRecord {
    pub server_id: ServerId,
    pub health: ServerHealth,
}

/// Collection record in the desired-state tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionRecord {
    pub id: CollectionId,
    pub name: String,
    pub replication_factor: ReplicationFactor,
    pub number_of_shards: u32,
    /// Present on follower collections that mirror a leader's shard layout.
    /// A follower never owns an independent replication factor.
    pub distribute_shards_like: Option<CollectionId>,
}

impl CollectionRecord {
    pub fn is_follower(&self) -> bool {
        self.distribute_shards_like.is_some()
    }
}

/// Per-shard desired state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedShard {
    pub shard_id: ShardId,
    pub collection: CollectionId,
    pub shard_index: u32,
    pub desired_replicas: u32,
}

/// Desired-state tree ("Plan"). Mutated only through conditional writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanSnapshot {
    pub collections: BTreeMap<CollectionId, CollectionRecord>,
    pub shards: BTreeMap<ShardId, PlannedShard>,
    pub servers: BTreeMap<ServerId, ServerRecord>,
}

impl PlanSnapshot {
    pub fn healthy_server_count(&self) -> usize {
        self.servers
            .values()
            .filter(|s| s.health == ServerHealth::Good)
            .count()
    }

    /// Shard ids belonging to one collection, ascending.
    pub fn shards_of(&self, collection: CollectionId) -> Vec<ShardId> {
        self.shards
            .values()
            .filter(|s| s.collection == collection)
            .map(|s| s.shard_id)
            .collect()
    }

    pub fn collection_by_name(&self, name: &str) -> Option<&CollectionRecord> {
        self.collections.values().find(|c| c.name == name)
    }
}

/// Observed replica assignment for one shard. Index 0 is the leader replica.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentShard {
    pub servers: Vec<ServerId>,
}

/// Observed-state tree ("Current"), written by storage-server agents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentSnapshot {
    pub shards: BTreeMap<ShardId, CurrentShard>,
}

/// A snapshot paired with the store version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}
