//! Shared helpers for integration tests: an in-process meta store seeded
//! with a small cluster, and simulated storage-server agents that apply
//! replica instructions to the Current tree.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use vellum_coordinator::convergence::{self, ConvergenceWatcherConfig, ConvergenceWatcherHandle};
use vellum_coordinator::{
    CollectionId, CollectionRecord, Coordinator, CurrentShard, CurrentSnapshot, MemoryMetaStore,
    MetaStore, PlanSnapshot, PlannedShard, ReplicationFactor, ServerHealth, ServerId,
    ServerRecord, ShardAgentTransport, ShardId, WaitOutcome,
};

/// Bound for convergence waits in tests.
pub const CONVERGE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Storage-server agents that apply instructions straight to the Current
/// tree. Pausing them acknowledges instructions without applying anything,
/// simulating servers that never finish their copies.
pub struct SimAgents {
    store: Arc<MemoryMetaStore>,
    paused: AtomicBool,
    applied: AtomicU64,
}

impl SimAgents {
    pub fn new(store: Arc<MemoryMetaStore>) -> Self {
        Self {
            store,
            paused: AtomicBool::new(false),
            applied: AtomicU64::new(0),
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Number of instructions that actually changed the Current tree.
    pub fn applied_ops(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShardAgentTransport for SimAgents {
    async fn add_replica(
        &self,
        server: ServerId,
        shard: ShardId,
        _leader: ServerId,
    ) -> anyhow::Result<()> {
        if self.paused.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.store.update_current(|current| {
            let entry = current.shards.entry(shard).or_default();
            if !entry.servers.contains(&server) {
                entry.servers.push(server);
                self.applied.fetch_add(1, Ordering::SeqCst);
            }
        });
        Ok(())
    }

    async fn remove_replica(&self, server: ServerId, shard: ShardId) -> anyhow::Result<()> {
        if self.paused.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.store.update_current(|current| {
            if let Some(entry) = current.shards.get_mut(&shard) {
                let before = entry.servers.len();
                entry.servers.retain(|s| *s != server);
                if entry.servers.len() != before {
                    self.applied.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        Ok(())
    }
}

/// Builder for a seeded cluster. Collection creation and initial shard
/// placement are external concerns, so the builder writes them into the
/// trees directly before the watcher starts.
pub struct ClusterBuilder {
    server_count: u64,
    plan: PlanSnapshot,
    current: CurrentSnapshot,
    next_collection: CollectionId,
    next_shard: ShardId,
}

impl ClusterBuilder {
    pub fn with_servers(server_count: u64) -> Self {
        let mut plan = PlanSnapshot::default();
        for server_id in 1..=server_count {
            plan.servers.insert(
                server_id,
                ServerRecord {
                    server_id,
                    health: ServerHealth::Good,
                },
            );
        }
        Self {
            server_count,
            plan,
            current: CurrentSnapshot::default(),
            next_collection: 1,
            next_shard: 100,
        }
    }

    pub fn collection(
        &mut self,
        name: &str,
        number_of_shards: u32,
        replication_factor: u32,
    ) -> CollectionId {
        let layout: Vec<Vec<ServerId>> = (0..number_of_shards)
            .map(|index| self.placement(index, replication_factor))
            .collect();
        self.insert_collection(name, replication_factor, None, &layout)
    }

    /// A follower sharing the leader's shard layout: same shard count, same
    /// factor, and per-index identical replica server sets.
    pub fn follower(&mut self, name: &str, leader: CollectionId) -> CollectionId {
        let record = self.plan.collections[&leader].clone();
        let factor = match record.replication_factor {
            ReplicationFactor::Count(f) => f,
            ReplicationFactor::Unmanaged => panic!("cannot follow an unmanaged collection"),
        };
        let mut leader_shards: Vec<&PlannedShard> = self
            .plan
            .shards
            .values()
            .filter(|s| s.collection == leader)
            .collect();
        leader_shards.sort_by_key(|s| s.shard_index);
        let layout: Vec<Vec<ServerId>> = leader_shards
            .iter()
            .map(|s| self.current.shards[&s.shard_id].servers.clone())
            .collect();
        self.insert_collection(name, factor, Some(leader), &layout)
    }

    pub fn build(self) -> SimCluster {
        let store = Arc::new(MemoryMetaStore::new(self.plan, self.current));
        let agents = Arc::new(SimAgents::new(store.clone()));
        let watcher = convergence::spawn(
            store.clone(),
            agents.clone(),
            ConvergenceWatcherConfig {
                interval: Duration::from_millis(15),
            },
        );
        SimCluster {
            store,
            agents,
            watcher: Some(watcher),
        }
    }

    fn insert_collection(
        &mut self,
        name: &str,
        replication_factor: u32,
        distribute_shards_like: Option<CollectionId>,
        layout: &[Vec<ServerId>],
    ) -> CollectionId {
        let id = self.next_collection;
        self.next_collection += 1;
        self.plan.collections.insert(
            id,
            CollectionRecord {
                id,
                name: name.to_string(),
                replication_factor: ReplicationFactor::Count(replication_factor),
                number_of_shards: layout.len() as u32,
                distribute_shards_like,
            },
        );
        for (index, servers) in layout.iter().enumerate() {
            let shard_id = self.next_shard;
            self.next_shard += 1;
            self.plan.shards.insert(
                shard_id,
                PlannedShard {
                    shard_id,
                    collection: id,
                    shard_index: index as u32,
                    desired_replicas: replication_factor,
                },
            );
            self.current.shards.insert(
                shard_id,
                CurrentShard {
                    servers: servers.clone(),
                },
            );
        }
        id
    }

    fn placement(&self, shard_index: u32, replicas: u32) -> Vec<ServerId> {
        assert!(replicas as u64 <= self.server_count, "not enough servers");
        (0..replicas as u64)
            .map(|k| ((shard_index as u64 + k) % self.server_count) + 1)
            .collect()
    }
}

/// A running simulated cluster: seeded store, agents, and one convergence
/// watcher.
pub struct SimCluster {
    pub store: Arc<MemoryMetaStore>,
    pub agents: Arc<SimAgents>,
    watcher: Option<ConvergenceWatcherHandle>,
}

impl SimCluster {
    pub fn coordinator(&self) -> Coordinator<MemoryMetaStore> {
        Coordinator::new(self.store.clone())
    }

    pub async fn shard_ids(&self, collection: CollectionId) -> Vec<ShardId> {
        self.store
            .read_plan()
            .await
            .expect("read plan")
            .value
            .shards_of(collection)
    }

    pub async fn current_servers(&self, shard: ShardId) -> Vec<ServerId> {
        self.store
            .read_current()
            .await
            .expect("read current")
            .value
            .shards
            .get(&shard)
            .map(|s| s.servers.clone())
            .unwrap_or_default()
    }

    pub async fn desired_replicas(&self, shard: ShardId) -> u32 {
        self.store.read_plan().await.expect("read plan").value.shards[&shard].desired_replicas
    }

    pub async fn plan_version(&self) -> u64 {
        self.store.read_plan().await.expect("read plan").version
    }

    pub async fn wait_converged(&self, collection: CollectionId, timeout: Duration) -> WaitOutcome {
        convergence::wait_for_convergence(
            self.store.as_ref(),
            collection,
            timeout,
            Duration::from_millis(10),
        )
        .await
        .expect("convergence wait")
    }

    pub async fn shutdown(mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.shutdown().await;
        }
    }
}

impl Drop for SimCluster {
    fn drop(&mut self) {
        if let Some(watcher) = &self.watcher {
            watcher.abort();
        }
    }
}
