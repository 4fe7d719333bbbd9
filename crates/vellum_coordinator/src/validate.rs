//! Property-update validation against cluster facts.
//!
//! Pure and deterministic over a Plan snapshot; no side effects. Rules apply
//! in order: follower rejection, unmanaged-transition rejection, range check.

use crate::catalog::{CollectionId, PlanSnapshot, ReplicationFactor, RequestedFactor};
use crate::error::CoordinatorError;

/// Validate a requested replication factor for `collection`.
///
/// Returns the accepted factor. `BadParameter` and `Forbidden` are terminal;
/// the caller must submit a corrected request.
pub fn validate(
    plan: &PlanSnapshot,
    collection: CollectionId,
    requested: RequestedFactor,
) -> Result<u32, CoordinatorError> {
    let record = plan
        .collections
        .get(&collection)
        .ok_or(CoordinatorError::NotFound(collection))?;

    if let Some(leader) = record.distribute_shards_like {
        return Err(CoordinatorError::Forbidden(format!(
            "collection {collection} shares its shard layout with {leader}; \
             change the replication factor on the leader"
        )));
    }

    let count = match requested {
        RequestedFactor::Unmanaged => {
            return Err(CoordinatorError::Forbidden(
                "cannot switch to unmanaged replication through a properties update".to_string(),
            ));
        }
        RequestedFactor::Count(count) => count,
    };
    if record.replication_factor == ReplicationFactor::Unmanaged {
        return Err(CoordinatorError::Forbidden(format!(
            "collection {collection} uses unmanaged replication"
        )));
    }

    let healthy = plan.healthy_server_count();
    if count < 1 || count as u128 > healthy as u128 {
        return Err(CoordinatorError::BadParameter(format!(
            "replication factor must be between 1 and {healthy}, got {count}"
        )));
    }
    Ok(count as u32)
}
