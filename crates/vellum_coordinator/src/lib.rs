//! Shard replication-factor reconciliation for the vellum coordinator.
//!
//! The subsystem accepts a change to a collection's desired replica count,
//! validates it against cluster topology, records it durably in the
//! consensus-backed Plan tree, and drives a background convergence loop that
//! adds or removes shard replicas on storage servers until the observed
//! Current tree matches.
//!
//! Request path: [`coordinator::Coordinator::update_replication_factor`]
//! runs validation and the conditional plan write, optionally suspending on
//! convergence. Background path: [`convergence::spawn`] runs the reconcile
//! loop that issues idempotent replica instructions each cycle.

pub mod allocator;
pub mod catalog;
pub mod convergence;
pub mod coordinator;
pub mod error;
pub mod meta_store;
pub mod plan_writer;
pub mod shard_group;
pub mod transport;
pub mod validate;

pub use catalog::{
    CollectionId, CollectionRecord, CurrentShard, CurrentSnapshot, PlanSnapshot, PlannedShard,
    ReplicationFactor, RequestedFactor, ServerHealth, ServerId, ServerRecord, ShardId, Versioned,
};
pub use convergence::{
    ConvergenceWatcherConfig, ConvergenceWatcherHandle, ShardSyncState, WaitOutcome,
};
pub use coordinator::{Coordinator, UpdateOptions, UpdateOutcome};
pub use error::CoordinatorError;
pub use meta_store::{CasOutcome, MemoryMetaStore, MetaStore};
pub use plan_writer::{AppliedUpdate, PlanWriter, PlanWriterConfig};
pub use shard_group::{resolve_group, ShardGroup};
pub use transport::{ReplicaInstruction, ShardAgentTransport};
