use companion_schemas::UserId;
use thiserror::Error;

/// Failure taxonomy for the engine. Every variant maps to a stable error
/// code; provider internals are carried as detail but not meant for
/// non-admin callers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("admin access required")]
    Forbidden,

    #[error("user {0} not found")]
    NotFound(UserId),

    #[error("provider error: {0}")]
    Provider(String),

    /// The relational delete succeeded but the vector cleanup did not.
    /// The caller must be told reconciliation is pending: a vector left
    /// behind after an irreversible delete is a correctness problem.
    #[error("removed {removed} exchanges but vector cleanup failed; reconciliation pending")]
    VectorCleanupPending { removed: u64 },

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn storage(err: anyhow::Error) -> Self {
        EngineError::Storage(err.to_string())
    }

    pub fn provider(err: anyhow::Error) -> Self {
        EngineError::Provider(err.to_string())
    }

    /// Stable code for API surfaces and logs.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Unauthorized => "unauthorized",
            EngineError::Forbidden => "forbidden",
            EngineError::NotFound(_) => "not_found",
            EngineError::Provider(_) => "provider_error",
            EngineError::VectorCleanupPending { .. } => "vector_cleanup_pending",
            EngineError::Storage(_) => "storage_error",
        }
    }
}
