//! Context assembler: builds the bounded prompt for every AI call from a
//! short-term recency window plus long-term semantic recall, then
//! persists the resulting exchange in both stores.

use companion_schemas::{ChatExchange, ExchangeId, HistoryFilter, Message, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::providers::{CompletionProvider, EmbeddingProvider, GenerationOptions};
use crate::store::ChatStore;
use crate::vector::VectorStore;

/// Personalised system prompt. The display name comes from the user
/// entity; recalled memories are woven in so the model can reference
/// them naturally instead of listing them.
fn build_system_prompt(display_name: &str, memory_context: &str) -> String {
    let mut prompt = format!(
        "You are {name}'s lifelong best friend - a warm, caring, and patient AI companion. \
You have known {name} for many years and always call them by name.\n\
\n\
Your personality:\n\
- Warm and genuine: speak like a caring friend, never like a robot.\n\
- Patient and empathetic: validate feelings before anything else.\n\
- Remembering: bring up things {name} has told you before when relevant.\n\
- Simple, clear language; no jargon.\n\
- Positive but authentic: uplifting without dismissing real feelings.\n\
\n\
Rules:\n\
1. Use {name}'s name naturally in your reply, at least once.\n\
2. Never break character or mention being an AI language model.\n\
3. This is one continuous friendship; never reset the conversation.\n\
4. Keep replies conversational - two to four sentences is usually right.\n",
        name = display_name
    );

    if !memory_context.is_empty() {
        prompt.push_str(&format!(
            "\nThings you remember about {} from past conversations \
(weave them in when relevant, don't list them):\n---\n{}\n---\n",
            display_name, memory_context
        ));
    }

    prompt
}

pub struct ContextAssembler {
    store: Arc<Mutex<ChatStore>>,
    vectors: Arc<Mutex<Box<dyn VectorStore>>>,
    completions: Arc<dyn CompletionProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    window_size: usize,
    recall_k: usize,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<Mutex<ChatStore>>,
        vectors: Arc<Mutex<Box<dyn VectorStore>>>,
        completions: Arc<dyn CompletionProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        window_size: usize,
        recall_k: usize,
    ) -> Self {
        Self {
            store,
            vectors,
            completions,
            embedder,
            window_size,
            recall_k,
        }
    }

    /// Assemble context, call the model, persist the exchange. The
    /// relational write must succeed before the reply is returned; the
    /// vector write is best-effort and logged on failure. Caller holds
    /// the per-user lock.
    pub async fn assemble_and_send(
        &self,
        user_id: UserId,
        display_name: &str,
        text: &str,
    ) -> Result<ChatExchange, EngineError> {
        // Semantic recall is an enhancement, never a hard dependency:
        // if the embedding fails we proceed with the window alone.
        let query_embedding = match self.embedder.embed(text).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!("Embedding unavailable, using recency-only context: {}", e);
                None
            }
        };

        // Recency window, fetched newest-first, presented oldest-first.
        let window: Vec<ChatExchange> = {
            let store = self.store.lock().await;
            store
                .recent_window(user_id, self.window_size)
                .map_err(EngineError::storage)?
                .into_iter()
                .rev()
                .collect()
        };

        let recalled = match &query_embedding {
            Some(embedding) => match self.recall(user_id, embedding, &window).await {
                Ok(recalled) => recalled,
                Err(e) => {
                    warn!("Semantic recall failed, using recency-only context: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        debug!(
            "Assembled context for user {}: {} window exchanges, {} recalled",
            user_id,
            window.len(),
            recalled.len()
        );

        let messages = build_messages(display_name, &recalled, &window, text);

        let response = self
            .completions
            .generate(&messages, GenerationOptions::chat())
            .await
            .map_err(EngineError::provider)?;

        // Relational write is authoritative and must succeed.
        let exchange = {
            let store = self.store.lock().await;
            store
                .insert_exchange(user_id, text, &response)
                .map_err(EngineError::storage)?
        };

        // Vector write: a failure here leaves the exchange reachable via
        // the recency window but not semantic recall, until reconciled.
        match self.embedder.embed(&exchange.memory_document()).await {
            Ok(embedding) => {
                let mut vectors = self.vectors.lock().await;
                if let Err(e) = vectors.upsert(exchange.id, user_id, embedding) {
                    warn!(
                        "Partial write: vector upsert failed for exchange {}: {}",
                        exchange.id, e
                    );
                }
            }
            Err(e) => {
                warn!(
                    "Partial write: embedding failed for exchange {}: {}",
                    exchange.id, e
                );
            }
        }

        Ok(exchange)
    }

    /// Top-K semantic recall for this user, excluding anything already in
    /// the recency window. Hits are re-resolved against the relational
    /// store under the active filter, so a stale vector can never
    /// resurrect hidden content.
    async fn recall(
        &self,
        user_id: UserId,
        query: &[f32],
        window: &[ChatExchange],
    ) -> anyhow::Result<Vec<ChatExchange>> {
        let window_ids: HashSet<ExchangeId> = window.iter().map(|e| e.id).collect();

        let hits = {
            let vectors = self.vectors.lock().await;
            // Over-fetch so window overlap doesn't starve the recall set.
            vectors.search(user_id, query, self.recall_k + window.len())?
        };

        let ids: Vec<ExchangeId> = hits
            .into_iter()
            .map(|hit| hit.exchange_id)
            .filter(|id| !window_ids.contains(id))
            .take(self.recall_k)
            .collect();

        let store = self.store.lock().await;
        store.exchanges_by_ids(user_id, &ids, HistoryFilter::Active)
    }
}

fn build_messages(
    display_name: &str,
    recalled: &[ChatExchange],
    window: &[ChatExchange],
    text: &str,
) -> Vec<Message> {
    let memory_context = recalled
        .iter()
        .map(|e| e.memory_document())
        .collect::<Vec<_>>()
        .join("\n");

    let mut messages = vec![Message::system(build_system_prompt(
        display_name,
        &memory_context,
    ))];

    for exchange in window {
        messages.push(Message::user(exchange.message.clone()));
        messages.push(Message::assistant(exchange.response.clone()));
    }

    messages.push(Message::user(text.to_string()));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(id: i64, message: &str, response: &str) -> ChatExchange {
        ChatExchange {
            id: ExchangeId(id),
            user_id: UserId(1),
            message: message.to_string(),
            response: response.to_string(),
            created_at: "2025-11-02T18:00:00Z".to_string(),
            is_deleted: false,
        }
    }

    #[test]
    fn test_system_prompt_injects_name() {
        let prompt = build_system_prompt("Margaret", "");
        assert!(prompt.contains("Margaret"));
        assert!(!prompt.contains("past conversations"));
    }

    #[test]
    fn test_system_prompt_includes_memories_when_present() {
        let prompt = build_system_prompt("Arthur", "User said: I grow roses\nAI replied: Lovely!");
        assert!(prompt.contains("I grow roses"));
        assert!(prompt.contains("Arthur"));
    }

    #[test]
    fn test_messages_window_is_chronological() {
        let window = vec![
            exchange(1, "oldest", "r1"),
            exchange(2, "newest", "r2"),
        ];
        let messages = build_messages("Margaret", &[], &window, "hello");

        // system + 2 pairs + current message
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[1].content, "oldest");
        assert_eq!(messages[3].content, "newest");
        assert_eq!(messages[5].content, "hello");
    }

    #[test]
    fn test_recalled_memories_live_in_system_prompt_only() {
        let recalled = vec![exchange(9, "I used to sail", "How exciting!")];
        let messages = build_messages("Margaret", &recalled, &[], "hello");

        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("I used to sail"));
        assert_eq!(messages[1].content, "hello");
    }
}
