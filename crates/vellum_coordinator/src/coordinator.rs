//! Entry point the API layer calls for replication-factor updates.

use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{CollectionId, RequestedFactor};
use crate::convergence::{wait_for_convergence, WaitOutcome};
use crate::error::CoordinatorError;
use crate::meta_store::MetaStore;
use crate::plan_writer::{PlanWriter, PlanWriterConfig};

/// Options carried alongside a properties-update request.
#[derive(Debug, Clone, Copy)]
pub struct UpdateOptions {
    /// Suspend the request until the cluster reflects the new factor.
    pub wait_for_convergence: bool,
    /// Bound for the convergence wait.
    pub timeout: Duration,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            wait_for_convergence: false,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Response to an accepted update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// The factor now recorded in the plan.
    pub replication_factor: u32,
    /// Present when the caller asked to wait. A timeout here is not an
    /// error: the desired state stays committed and reconciliation
    /// continues in the background.
    pub convergence: Option<WaitOutcome>,
}

/// Request-path facade over validation, the plan writer and convergence
/// waits. The background watcher is spawned separately; see
/// [`crate::convergence::spawn`].
pub struct Coordinator<S: MetaStore> {
    store: Arc<S>,
    writer: PlanWriter<S>,
    /// Poll spacing for convergence waits when the store has no change feed.
    wait_poll_interval: Duration,
}

impl<S: MetaStore> Coordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, PlanWriterConfig::default())
    }

    pub fn with_config(store: Arc<S>, writer_cfg: PlanWriterConfig) -> Self {
        Self {
            writer: PlanWriter::with_config(store.clone(), writer_cfg),
            store,
            wait_poll_interval: Duration::from_millis(50),
        }
    }

    /// Validate, durably record, and optionally wait out a replication
    /// factor change for `collection` (and its whole shard group).
    pub async fn update_replication_factor(
        &self,
        collection: CollectionId,
        requested: RequestedFactor,
        opts: UpdateOptions,
    ) -> Result<UpdateOutcome, CoordinatorError> {
        let applied = self
            .writer
            .apply_replication_factor(collection, requested)
            .await?;
        tracing::info!(
            collection,
            factor = applied.replication_factor,
            plan_version = applied.plan_version,
            "replication factor updated"
        );

        let convergence = if opts.wait_for_convergence {
            let outcome = wait_for_convergence(
                self.store.as_ref(),
                collection,
                opts.timeout,
                self.wait_poll_interval,
            )
            .await?;
            if outcome == WaitOutcome::TimedOut {
                tracing::warn!(
                    collection,
                    timeout_ms = opts.timeout.as_millis() as u64,
                    "convergence wait timed out; reconciliation continues in the background"
                );
            }
            Some(outcome)
        } else {
            None
        };

        Ok(UpdateOutcome {
            replication_factor: applied.replication_factor,
            convergence,
        })
    }

    /// Convenience over [`Self::update_replication_factor`] taking the raw
    /// JSON value of a `replicationFactor` property.
    pub async fn update_replication_factor_json(
        &self,
        collection: CollectionId,
        value: &serde_json::Value,
        opts: UpdateOptions,
    ) -> Result<UpdateOutcome, CoordinatorError> {
        let requested = RequestedFactor::from_json(value)?;
        self.update_replication_factor(collection, requested, opts)
            .await
    }
}
