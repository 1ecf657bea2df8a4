//! Engine façade: wires the stores, providers, and components together
//! and enforces per-user mutual exclusion around every operation that
//! touches one user's history.

use companion_schemas::{
    AdminHistoryPage, ChatExchange, DeletionReport, HistoryFilter, HistoryPage,
    ModerationLogEntry, SummaryReport, UserId,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::assembler::ContextAssembler;
use crate::deletion::DeletionCoordinator;
use crate::error::EngineError;
use crate::locks::UserLocks;
use crate::moderation::ModerationScanner;
use crate::providers::{CompletionProvider, EmbeddingProvider};
use crate::store::ChatStore;
use crate::summary::SummaryGenerator;
use crate::users::UserDirectory;
use crate::vector::VectorStore;

/// Sliding window: most recent non-deleted exchanges sent as short-term
/// context.
pub const WINDOW_SIZE: usize = 10;

/// Top-K semantic recall hits injected into the system prompt.
pub const RECALL_K: usize = 4;

/// Most-recent active exchanges fed into the admin summary.
pub const SUMMARY_INPUT_BOUND: usize = 50;

pub struct CompanionEngine {
    store: Arc<Mutex<ChatStore>>,
    assembler: ContextAssembler,
    deletion: DeletionCoordinator,
    summarizer: SummaryGenerator,
    scanner: ModerationScanner,
    directory: Arc<dyn UserDirectory>,
    locks: UserLocks,
}

impl CompanionEngine {
    pub fn new(
        store: ChatStore,
        vectors: Box<dyn VectorStore>,
        completions: Arc<dyn CompletionProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        let store = Arc::new(Mutex::new(store));
        let vectors = Arc::new(Mutex::new(vectors));

        let assembler = ContextAssembler::new(
            store.clone(),
            vectors.clone(),
            completions.clone(),
            embedder,
            WINDOW_SIZE,
            RECALL_K,
        );
        let deletion = DeletionCoordinator::new(store.clone(), vectors);
        let summarizer = SummaryGenerator::new(store.clone(), completions, SUMMARY_INPUT_BOUND);

        Self {
            store,
            assembler,
            deletion,
            summarizer,
            scanner: ModerationScanner::new(),
            directory,
            locks: UserLocks::new(),
        }
    }

    fn display_name(&self, user_id: UserId) -> Result<String, EngineError> {
        self.directory
            .display_name(user_id)
            .map_err(EngineError::storage)?
            .ok_or(EngineError::NotFound(user_id))
    }

    // ------------------------------------------------------------------
    // User-facing operations
    // ------------------------------------------------------------------

    /// One chat turn: assemble context, call the model, persist, scan.
    /// The moderation scan is advisory and can never fail this call.
    pub async fn send_message(
        &self,
        user_id: UserId,
        text: &str,
    ) -> Result<ChatExchange, EngineError> {
        let display_name = self.display_name(user_id)?;

        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().await;

        let exchange = self
            .assembler
            .assemble_and_send(user_id, &display_name, text)
            .await?;

        if let Some(reason) = self.scanner.scan(&exchange.message, &exchange.response) {
            warn!("Exchange {} flagged: {}", exchange.id, reason);
            let store = self.store.lock().await;
            if let Err(e) = store.log_moderation(exchange.id, &reason) {
                error!(
                    "Failed to record moderation flag for exchange {}: {}",
                    exchange.id, e
                );
            }
        }

        Ok(exchange)
    }

    /// Active history, newest first, with the total active count.
    pub async fn get_history(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<HistoryPage, EngineError> {
        self.display_name(user_id)?;

        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().await;

        let store = self.store.lock().await;
        let exchanges = store
            .page(user_id, HistoryFilter::Active, limit, offset)
            .map_err(EngineError::storage)?;
        let total = store
            .count(user_id, HistoryFilter::Active)
            .map_err(EngineError::storage)?;

        Ok(HistoryPage {
            exchanges: exchanges.into_iter().map(Into::into).collect(),
            total,
        })
    }

    /// Soft-delete the user's entire active history. Idempotent.
    pub async fn soft_delete_history(&self, user_id: UserId) -> Result<u64, EngineError> {
        self.display_name(user_id)?;

        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().await;

        self.deletion.soft_delete(user_id).await
    }

    // ------------------------------------------------------------------
    // Admin-facing operations
    // ------------------------------------------------------------------

    /// Fresh three-sentence emotional-status summary from active
    /// exchanges only.
    pub async fn get_summary(&self, user_id: UserId) -> Result<SummaryReport, EngineError> {
        let display_name = self.display_name(user_id)?;

        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().await;

        self.summarizer.generate(user_id, &display_name).await
    }

    /// Full history including soft-deleted rows, under the requested
    /// visibility filter, with per-state counts.
    pub async fn get_full_history(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
        filter: HistoryFilter,
    ) -> Result<AdminHistoryPage, EngineError> {
        self.display_name(user_id)?;

        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().await;

        let store = self.store.lock().await;
        let exchanges = store
            .page(user_id, filter, limit, offset)
            .map_err(EngineError::storage)?;
        let total = store.count(user_id, filter).map_err(EngineError::storage)?;
        let active_count = store
            .count(user_id, HistoryFilter::Active)
            .map_err(EngineError::storage)?;
        let deleted_count = store
            .count(user_id, HistoryFilter::Deleted)
            .map_err(EngineError::storage)?;

        Ok(AdminHistoryPage {
            exchanges,
            total,
            active_count,
            deleted_count,
        })
    }

    /// Soft or permanent delete of a user's history.
    pub async fn delete_history(
        &self,
        user_id: UserId,
        permanent: bool,
    ) -> Result<DeletionReport, EngineError> {
        self.display_name(user_id)?;

        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().await;

        let removed = if permanent {
            self.deletion.purge(user_id).await?
        } else {
            self.deletion.soft_delete(user_id).await?
        };

        Ok(DeletionReport {
            user_id,
            removed,
            permanent,
        })
    }

    /// Recent moderation flags for admin review. Reason codes only.
    pub async fn recent_moderation_flags(
        &self,
        limit: usize,
    ) -> Result<Vec<ModerationLogEntry>, EngineError> {
        let store = self.store.lock().await;
        store.moderation_entries(limit).map_err(EngineError::storage)
    }
}
