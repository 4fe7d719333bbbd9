//! Seam to the external consensus store holding the Plan and Current trees.
//!
//! The store is a linearizable key/value tree with compare-and-swap
//! semantics. This crate only ever mutates the Plan through a single
//! conditional write spanning all affected keys; the Current tree is written
//! by storage-server agents.

use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::catalog::{CurrentSnapshot, PlanSnapshot, Versioned};

/// Outcome of a conditional Plan write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write landed and the Plan now carries this version.
    Committed { version: u64 },
    /// Another writer advanced the version first; nothing was applied.
    Conflict,
}

#[async_trait]
pub trait MetaStore: Send + Sync + 'static {
    /// Consistent snapshot of the desired-state tree.
    async fn read_plan(&self) -> anyhow::Result<Versioned<PlanSnapshot>>;

    /// Conditionally replace the desired-state tree. Commits only when the
    /// stored version still equals `expected_version`, so concurrent writers
    /// serialize without partial application.
    async fn commit_plan(
        &self,
        expected_version: u64,
        plan: PlanSnapshot,
    ) -> anyhow::Result<CasOutcome>;

    /// Consistent snapshot of the observed-state tree.
    async fn read_current(&self) -> anyhow::Result<Versioned<CurrentSnapshot>>;

    /// Change notification for the observed-state tree, when the store
    /// supports one. The channel carries the latest Current version;
    /// convergence waits fall back to bounded polling without it.
    fn watch_current(&self) -> Option<watch::Receiver<u64>> {
        None
    }
}

/// In-process store used by tests and single-process embeddings.
///
/// One lock per tree gives the same linearizable read/CAS behavior the
/// external store provides.
pub struct MemoryMetaStore {
    plan: RwLock<Versioned<PlanSnapshot>>,
    current: RwLock<Versioned<CurrentSnapshot>>,
    current_tx: watch::Sender<u64>,
}

impl MemoryMetaStore {
    pub fn new(plan: PlanSnapshot, current: CurrentSnapshot) -> Self {
        let (current_tx, _) = watch::channel(1);
        Self {
            plan: RwLock::new(Versioned { version: 1, value: plan }),
            current: RwLock::new(Versioned { version: 1, value: current }),
            current_tx,
        }
    }

    /// Write path for storage-server agents reporting observed state.
    /// Returns the new Current version.
    pub fn update_current(&self, apply: impl FnOnce(&mut CurrentSnapshot)) -> u64 {
        let mut current = self.current.write().unwrap();
        apply(&mut current.value);
        current.version += 1;
        let version = current.version;
        drop(current);
        let _ = self.current_tx.send(version);
        version
    }

    /// Unconditional Plan mutation for seeding; collection creation and drop
    /// happen outside this subsystem.
    pub fn seed_plan(&self, apply: impl FnOnce(&mut PlanSnapshot)) -> u64 {
        let mut plan = self.plan.write().unwrap();
        apply(&mut plan.value);
        plan.version += 1;
        plan.version
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn read_plan(&self) -> anyhow::Result<Versioned<PlanSnapshot>> {
        Ok(self.plan.read().unwrap().clone())
    }

    async fn commit_plan(
        &self,
        expected_version: u64,
        plan: PlanSnapshot,
    ) -> anyhow::Result<CasOutcome> {
        let mut stored = self.plan.write().unwrap();
        if stored.version != expected_version {
            return Ok(CasOutcome::Conflict);
        }
        stored.version += 1;
        stored.value = plan;
        Ok(CasOutcome::Committed { version: stored.version })
    }

    async fn read_current(&self) -> anyhow::Result<Versioned<CurrentSnapshot>> {
        Ok(self.current.read().unwrap().clone())
    }

    fn watch_current(&self) -> Option<watch::Receiver<u64>> {
        Some(self.current_tx.subscribe())
    }
}
