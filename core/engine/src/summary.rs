//! Summary generator: on-demand abstractive emotional-status summaries
//! for administrators, derived from active exchanges only. Raw chat
//! content never reaches the admin, directly or through the summary.

use companion_schemas::{now_rfc3339, HistoryFilter, Message, SummaryReport, UserId};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::EngineError;
use crate::providers::{CompletionProvider, GenerationOptions};
use crate::store::ChatStore;

pub struct SummaryGenerator {
    store: Arc<Mutex<ChatStore>>,
    completions: Arc<dyn CompletionProvider>,
    /// Most-recent active exchanges fed to the model. Kept constant
    /// across calls so repeated summaries see the same horizon.
    input_bound: usize,
}

impl SummaryGenerator {
    pub fn new(
        store: Arc<Mutex<ChatStore>>,
        completions: Arc<dyn CompletionProvider>,
        input_bound: usize,
    ) -> Self {
        Self {
            store,
            completions,
            input_bound,
        }
    }

    /// Always generated fresh; no caching here. Zero active messages is
    /// a defined result, not an error, and skips the provider entirely.
    pub async fn generate(
        &self,
        user_id: UserId,
        display_name: &str,
    ) -> Result<SummaryReport, EngineError> {
        let (recent, active_count) = {
            let store = self.store.lock().await;
            let recent = store
                .recent_window(user_id, self.input_bound)
                .map_err(EngineError::storage)?;
            let active_count = store
                .count(user_id, HistoryFilter::Active)
                .map_err(EngineError::storage)?;
            (recent, active_count)
        };

        if recent.is_empty() {
            info!("Summary requested for user {} with no active history", user_id);
            return Ok(SummaryReport::insufficient_data(user_id, display_name));
        }

        // Condensed transcript for the model only; the admin never sees it.
        let transcript = recent
            .iter()
            .rev() // oldest first
            .flat_map(|e| {
                [
                    format!("User: {}", e.message),
                    format!("AI: {}", e.response),
                ]
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "You are a clinical psychologist reviewing a conversation between \
a user named {name} and their AI companion.\n\
\n\
Based only on the conversation below, write exactly three sentences \
summarising {name}'s current emotional state, key concerns, and overall \
well-being. Be compassionate but professional. Synthesise - do not quote \
or copy any phrases from the conversation.\n\
\n\
Conversation:\n{transcript}\n\
\n\
Emotional status summary (three sentences):",
            name = display_name,
            transcript = transcript
        );

        let summary = self
            .completions
            .generate(&[Message::user(prompt)], GenerationOptions::summary())
            .await
            .map_err(EngineError::provider)?;

        Ok(SummaryReport {
            user_id,
            summary: summary.trim().to_string(),
            message_count: active_count,
            generated_at: now_rfc3339(),
            insufficient_data: false,
        })
    }
}
