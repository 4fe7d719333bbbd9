//! Instruction delivery to storage-server agents.
//!
//! Agents perform the actual data copy or removal and report the outcome
//! into the Current tree. Instructions are idempotent: the convergence loop
//! re-issues them every cycle until the observed state reflects them, so an
//! agent crash mid-copy is retried against the still-divergent state.

use async_trait::async_trait;

use crate::catalog::{ServerId, ShardId};

/// One idempotent instruction issued during a convergence cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaInstruction {
    /// `server` starts holding a replica of `shard`, syncing from `leader`.
    Add {
        shard: ShardId,
        server: ServerId,
        leader: ServerId,
    },
    /// `server` drops its replica of `shard`.
    Remove { shard: ShardId, server: ServerId },
}

#[async_trait]
pub trait ShardAgentTransport: Send + Sync + 'static {
    async fn add_replica(
        &self,
        server: ServerId,
        shard: ShardId,
        leader: ServerId,
    ) -> anyhow::Result<()>;

    async fn remove_replica(&self, server: ServerId, shard: ShardId) -> anyhow::Result<()>;
}
