//! Error taxonomy surfaced to the API layer.

use crate::catalog::CollectionId;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Malformed or out-of-range replication factor. Never retried
    /// automatically; the caller must submit a corrected request.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// The change is structurally disallowed (follower-direct update, or an
    /// unmanaged-replication transition).
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("collection {0} not found")]
    NotFound(CollectionId),

    /// The conditional plan write lost the version race on every attempt.
    /// The caller may retry the whole operation.
    #[error("plan update conflicted after {attempts} attempts")]
    Conflict { attempts: u32 },

    /// Consensus-store or transport failure.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl CoordinatorError {
    /// Wire code reported to callers of the properties-update API.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadParameter(_) => "BAD_PARAMETER",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::Store(_) => "INTERNAL",
        }
    }
}
