//! Durable desired-state updates under optimistic concurrency.
//!
//! One accepted factor change becomes a single conditional write covering
//! the leader record, every follower record, and every member shard's
//! desired count. A reader therefore never observes a partially-updated
//! shard group. Losing the version race restarts the whole
//! validate -> compute -> write sequence, bounded by a retry budget.

use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{CollectionId, PlanSnapshot, ReplicationFactor, RequestedFactor};
use crate::error::CoordinatorError;
use crate::meta_store::{CasOutcome, MetaStore};
use crate::shard_group::{resolve_group, ShardGroup};
use crate::validate::validate;

/// Retry policy for the conditional plan write.
#[derive(Debug, Clone, Copy)]
pub struct PlanWriterConfig {
    /// Conditional-write attempts before surfacing a conflict.
    pub max_attempts: u32,
    /// Backoff before the first retry; doubles per attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the doubled backoff.
    pub max_backoff: Duration,
}

impl Default for PlanWriterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
        }
    }
}

/// A committed (or already-satisfied) factor change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedUpdate {
    pub plan_version: u64,
    pub replication_factor: u32,
    /// The shard group the write covered, leader first.
    pub group: ShardGroup,
}

pub struct PlanWriter<S: MetaStore> {
    store: Arc<S>,
    cfg: PlanWriterConfig,
}

impl<S: MetaStore> PlanWriter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, PlanWriterConfig::default())
    }

    pub fn with_config(store: Arc<S>, cfg: PlanWriterConfig) -> Self {
        Self { store, cfg }
    }

    /// Validate and durably record a replication-factor change for
    /// `collection` and its whole shard group.
    ///
    /// Re-issuing an already-recorded factor is a no-op that returns the
    /// current plan version without writing.
    pub async fn apply_replication_factor(
        &self,
        collection: CollectionId,
        requested: RequestedFactor,
    ) -> Result<AppliedUpdate, CoordinatorError> {
        let mut backoff = self.cfg.initial_backoff;
        for attempt in 1..=self.cfg.max_attempts.max(1) {
            let plan = self.store.read_plan().await?;
            let factor = validate(&plan.value, collection, requested)?;
            let group = resolve_group(&plan.value, collection)?;

            if plan_carries_factor(&plan.value, &group, factor) {
                return Ok(AppliedUpdate {
                    plan_version: plan.version,
                    replication_factor: factor,
                    group,
                });
            }

            let updated = apply_factor_to_plan(&plan.value, &group, factor);
            match self.store.commit_plan(plan.version, updated).await? {
                CasOutcome::Committed { version } => {
                    tracing::debug!(
                        collection,
                        factor,
                        plan_version = version,
                        followers = group.followers.len(),
                        "replication factor recorded in plan"
                    );
                    return Ok(AppliedUpdate {
                        plan_version: version,
                        replication_factor: factor,
                        group,
                    });
                }
                CasOutcome::Conflict => {
                    tracing::debug!(
                        collection,
                        attempt,
                        "plan write lost the version race; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.cfg.max_backoff);
                }
            }
        }
        Err(CoordinatorError::Conflict {
            attempts: self.cfg.max_attempts,
        })
    }
}

fn plan_carries_factor(plan: &PlanSnapshot, group: &ShardGroup, factor: u32) -> bool {
    let records_match = group.members().all(|member| {
        plan.collections
            .get(&member)
            .map(|c| c.replication_factor == ReplicationFactor::Count(factor))
            .unwrap_or(false)
    });
    records_match
        && plan
            .shards
            .values()
            .filter(|s| group.contains(s.collection))
            .all(|s| s.desired_replicas == factor)
}

fn apply_factor_to_plan(plan: &PlanSnapshot, group: &ShardGroup, factor: u32) -> PlanSnapshot {
    let mut updated = plan.clone();
    for member in group.members() {
        if let Some(record) = updated.collections.get_mut(&member) {
            record.replication_factor = ReplicationFactor::Count(factor);
        }
    }
    for shard in updated.shards.values_mut() {
        if group.contains(shard.collection) {
            shard.desired_replicas = factor;
        }
    }
    updated
}
