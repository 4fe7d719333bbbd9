//! Background convergence of observed replica sets toward the desired plan.
//!
//! The watcher is a single control loop per cluster (the update lease that
//! guarantees one active instance is held by the embedding process). Each
//! cycle snapshots the Plan and Current trees, plans add/remove instructions
//! for every diverged shard, and fans them out to the storage-server agents.
//! Instructions are idempotent and re-issued until the Current tree reflects
//! them; agent failures are logged and retried on the next cycle, never
//! escalated.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::allocator::{plan_replica_changes, ServerPool};
use crate::catalog::{CollectionId, CurrentSnapshot, PlanSnapshot, ShardId};
use crate::error::CoordinatorError;
use crate::meta_store::MetaStore;
use crate::shard_group::{group_shards, resolve_group};
use crate::transport::{ReplicaInstruction, ShardAgentTransport};

/// Configuration for the convergence loop.
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceWatcherConfig {
    /// Cycle period. Cycles are strictly sequential; a new one starts only
    /// after the previous cycle's fan-out completes.
    pub interval: Duration,
}

impl Default for ConvergenceWatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
        }
    }
}

/// Per-shard view of observed vs desired replica counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardSyncState {
    /// Counts differ and no instruction has been issued this cycle.
    Diverged,
    /// Add/remove instructions are outstanding.
    Syncing,
    /// Observed matches desired; stays until the desired count changes.
    InSync,
}

/// Result of a bounded convergence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Converged,
    TimedOut,
}

/// Handle to a spawned watcher.
pub struct ConvergenceWatcherHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ConvergenceWatcherHandle {
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Spawn the convergence loop.
///
/// Exactly one watcher may drive a cluster at a time; callers hold the
/// externally granted update lease for as long as the handle lives.
pub fn spawn<S, T>(
    store: Arc<S>,
    transport: Arc<T>,
    cfg: ConvergenceWatcherConfig,
) -> ConvergenceWatcherHandle
where
    S: MetaStore,
    T: ShardAgentTransport,
{
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.interval);
        let mut sync_states: BTreeMap<ShardId, ShardSyncState> = BTreeMap::new();
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {}
            }
            if let Err(err) =
                reconcile_once(store.as_ref(), transport.as_ref(), &mut sync_states).await
            {
                tracing::warn!(error = ?err, "convergence reconcile failed");
            }
        }
    });
    ConvergenceWatcherHandle {
        shutdown_tx: Some(shutdown_tx),
        task,
    }
}

async fn reconcile_once<S, T>(
    store: &S,
    transport: &T,
    sync_states: &mut BTreeMap<ShardId, ShardSyncState>,
) -> anyhow::Result<()>
where
    S: MetaStore,
    T: ShardAgentTransport,
{
    // One snapshot pair per cycle keeps the decisions free of read skew.
    let plan = store.read_plan().await?;
    let current = store.read_current().await?;

    let instructions = plan_cycle(&plan.value, &current.value, sync_states);
    if instructions.is_empty() {
        return Ok(());
    }

    // Delivery within a cycle is unordered and parallel.
    let mut inflight: FuturesUnordered<_> = instructions
        .iter()
        .copied()
        .map(|instruction| async move {
            let result = match instruction {
                ReplicaInstruction::Add {
                    shard,
                    server,
                    leader,
                } => transport.add_replica(server, shard, leader).await,
                ReplicaInstruction::Remove { shard, server } => {
                    transport.remove_replica(server, shard).await
                }
            };
            (instruction, result)
        })
        .collect();

    while let Some((instruction, result)) = inflight.next().await {
        if let Err(err) = result {
            tracing::warn!(
                instruction = ?instruction,
                error = ?err,
                "replica instruction failed; retrying next cycle"
            );
        }
    }
    Ok(())
}

/// Plan one cycle's instructions and advance per-shard sync states.
fn plan_cycle(
    plan: &PlanSnapshot,
    current: &CurrentSnapshot,
    sync_states: &mut BTreeMap<ShardId, ShardSyncState>,
) -> Vec<ReplicaInstruction> {
    sync_states.retain(|shard_id, _| plan.shards.contains_key(shard_id));

    let pool = ServerPool::from_snapshots(plan, current);
    let mut instructions = Vec::new();

    for (shard_id, planned) in &plan.shards {
        let servers = current
            .shards
            .get(shard_id)
            .map(|s| s.servers.as_slice())
            .unwrap_or(&[]);
        let changes = plan_replica_changes(servers, planned.desired_replicas, &pool);
        if changes.is_noop() {
            sync_states.insert(*shard_id, ShardSyncState::InSync);
            continue;
        }

        let state = sync_states
            .entry(*shard_id)
            .or_insert(ShardSyncState::Diverged);
        if *state == ShardSyncState::InSync {
            *state = ShardSyncState::Diverged;
        }

        let Some(leader) = servers.first().copied() else {
            // No replica to sync from; initial placement is handled at
            // collection creation, outside this loop.
            tracing::debug!(shard_id, "shard has no observed replicas; skipping");
            continue;
        };
        for server in changes.to_add {
            instructions.push(ReplicaInstruction::Add {
                shard: *shard_id,
                server,
                leader,
            });
        }
        for server in changes.to_remove {
            instructions.push(ReplicaInstruction::Remove {
                shard: *shard_id,
                server,
            });
        }
        *state = ShardSyncState::Syncing;
    }

    instructions
}

/// Block until every shard of `collection`'s shard group matches its desired
/// replica count, or until `timeout` elapses. For a standalone collection
/// the group is just the collection itself; for a group leader it covers
/// every member.
///
/// Uses the store's change feed when available and falls back to bounded
/// polling at `poll_interval`. Always terminates; cancelling the returned
/// future does not disturb the convergence loop.
pub async fn wait_for_convergence<S: MetaStore>(
    store: &S,
    collection: CollectionId,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<WaitOutcome, CoordinatorError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut feed = store.watch_current();

    loop {
        let plan = store.read_plan().await?;
        let group = resolve_group(&plan.value, collection)?;
        let current = store.read_current().await?;
        if group_converged(&plan.value, &current.value, &group) {
            return Ok(WaitOutcome::Converged);
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Ok(WaitOutcome::TimedOut);
        }
        let remaining = deadline - now;
        match feed.as_mut() {
            Some(rx) => match tokio::time::timeout(remaining, rx.changed()).await {
                Err(_) => return Ok(WaitOutcome::TimedOut),
                // Feed closed; degrade to polling.
                Ok(Err(_)) => feed = None,
                Ok(Ok(())) => {}
            },
            None => tokio::time::sleep(remaining.min(poll_interval)).await,
        }
    }
}

fn group_converged(
    plan: &PlanSnapshot,
    current: &CurrentSnapshot,
    group: &crate::shard_group::ShardGroup,
) -> bool {
    group_shards(plan, group).into_iter().all(|shard_id| {
        let desired = plan.shards[&shard_id].desired_replicas as usize;
        current
            .shards
            .get(&shard_id)
            .map(|s| s.servers.len() == desired)
            .unwrap_or(false)
    })
}
