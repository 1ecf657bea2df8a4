//! Deletion coordinator: enforces the soft-delete and permanent-delete
//! contract across the relational and vector stores.

use companion_schemas::UserId;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::EngineError;
use crate::store::ChatStore;
use crate::vector::VectorStore;

pub struct DeletionCoordinator {
    store: Arc<Mutex<ChatStore>>,
    vectors: Arc<Mutex<Box<dyn VectorStore>>>,
}

impl DeletionCoordinator {
    pub fn new(store: Arc<Mutex<ChatStore>>, vectors: Arc<Mutex<Box<dyn VectorStore>>>) -> Self {
        Self { store, vectors }
    }

    /// Hide every active exchange for the user. A visibility change, not
    /// a storage change: rows and vectors stay put, the flag flips.
    /// Idempotent; zero on an already-empty or already-hidden history.
    ///
    /// The mirror flag in the vector store is updated before returning.
    /// Even if that mirror write fails, hidden content cannot resurface:
    /// every recall hit is re-resolved against the relational store
    /// under the active filter, which is authoritative.
    pub async fn soft_delete(&self, user_id: UserId) -> Result<u64, EngineError> {
        let ids = {
            let store = self.store.lock().await;
            store.soft_delete_all(user_id).map_err(EngineError::storage)?
        };

        if ids.is_empty() {
            return Ok(0);
        }

        {
            let mut vectors = self.vectors.lock().await;
            if let Err(e) = vectors.mark_deleted(user_id, &ids) {
                warn!(
                    "Vector mirror flag failed for user {} ({} exchanges); \
relational filter still hides them: {}",
                    user_id,
                    ids.len(),
                    e
                );
            }
        }

        info!("Soft-deleted {} exchanges for user {}", ids.len(), user_id);
        Ok(ids.len() as u64)
    }

    /// Irreversibly remove all exchanges, active and hidden, from both
    /// stores. Returns the total removed. If the vector cleanup fails
    /// after the relational delete succeeded, that is reported as
    /// `VectorCleanupPending` rather than claimed as success: a vector
    /// outliving an explicit irreversible delete is a correctness
    /// problem, not a cosmetic one.
    pub async fn purge(&self, user_id: UserId) -> Result<u64, EngineError> {
        let removed = {
            let store = self.store.lock().await;
            store.purge_all(user_id).map_err(EngineError::storage)?
        };

        let cleanup = {
            let mut vectors = self.vectors.lock().await;
            vectors.remove_user(user_id)
        };

        match cleanup {
            Ok(vector_count) => {
                info!(
                    "Permanently deleted {} exchanges ({} vectors) for user {}",
                    removed, vector_count, user_id
                );
                Ok(removed)
            }
            Err(e) => {
                error!(
                    "Vector cleanup failed after permanent delete for user {}: {}",
                    user_id, e
                );
                Err(EngineError::VectorCleanupPending { removed })
            }
        }
    }
}
