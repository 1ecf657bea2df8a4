#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use companion_engine::{
    CompanionEngine, ChatStore, CompletionProvider, EmbeddingProvider, GenerationOptions,
    InMemoryVectorStore, StaticDirectory, VectorHit, VectorStore,
};
use companion_schemas::{ExchangeId, Message, UserId};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

pub const MARGARET: UserId = UserId(1);
pub const ARTHUR: UserId = UserId(2);

/// Completion mock: records every prompt it receives and returns a
/// configurable reply.
pub struct RecordingCompletion {
    pub calls: Mutex<Vec<Vec<Message>>>,
    pub reply: Mutex<String>,
}

impl RecordingCompletion {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            reply: Mutex::new(reply.to_string()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Vec<Message> {
        self.calls.lock().unwrap().last().cloned().unwrap()
    }

    pub fn set_reply(&self, reply: &str) {
        *self.reply.lock().unwrap() = reply.to_string();
    }
}

#[async_trait]
impl CompletionProvider for RecordingCompletion {
    async fn generate(&self, messages: &[Message], _options: GenerationOptions) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        Ok(self.reply.lock().unwrap().clone())
    }
}

pub struct FailingCompletion;

#[async_trait]
impl CompletionProvider for FailingCompletion {
    async fn generate(&self, _messages: &[Message], _options: GenerationOptions) -> Result<String> {
        Err(anyhow!("completion provider timed out"))
    }
}

/// Deterministic bag-of-words embedding: shared words mean high cosine
/// similarity, which is all the recall tests need.
pub struct HashEmbedding;

impl HashEmbedding {
    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; 64];
        for word in text.to_lowercase().split_whitespace() {
            let cleaned: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
            if cleaned.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            cleaned.hash(&mut hasher);
            embedding[(hasher.finish() % 64) as usize] += 1.0;
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::vector_for(text))
    }
}

pub struct FailingEmbedding;

#[async_trait]
impl EmbeddingProvider for FailingEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(anyhow!("embedding provider unavailable"))
    }
}

/// Vector store that can be told to fail specific operations, for
/// partial-write, partial-flag, and partial-delete scenarios.
pub struct FlakyVectorStore {
    inner: InMemoryVectorStore,
    fail_upsert: bool,
    fail_mark_deleted: bool,
    fail_remove: bool,
}

impl FlakyVectorStore {
    fn healthy() -> Self {
        Self {
            inner: InMemoryVectorStore::new(),
            fail_upsert: false,
            fail_mark_deleted: false,
            fail_remove: false,
        }
    }

    pub fn failing_upsert() -> Self {
        Self {
            fail_upsert: true,
            ..Self::healthy()
        }
    }

    pub fn failing_mark_deleted() -> Self {
        Self {
            fail_mark_deleted: true,
            ..Self::healthy()
        }
    }

    pub fn failing_remove() -> Self {
        Self {
            fail_remove: true,
            ..Self::healthy()
        }
    }
}

impl VectorStore for FlakyVectorStore {
    fn upsert(
        &mut self,
        exchange_id: ExchangeId,
        user_id: UserId,
        embedding: Vec<f32>,
    ) -> Result<()> {
        if self.fail_upsert {
            return Err(anyhow!("vector store write refused"));
        }
        self.inner.upsert(exchange_id, user_id, embedding)
    }

    fn search(&self, user_id: UserId, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        self.inner.search(user_id, query, k)
    }

    fn mark_deleted(&mut self, user_id: UserId, exchange_ids: &[ExchangeId]) -> Result<()> {
        if self.fail_mark_deleted {
            return Err(anyhow!("vector store flag update refused"));
        }
        self.inner.mark_deleted(user_id, exchange_ids)
    }

    fn remove_user(&mut self, user_id: UserId) -> Result<u64> {
        if self.fail_remove {
            return Err(anyhow!("vector store delete refused"));
        }
        self.inner.remove_user(user_id)
    }
}

pub struct TestRig {
    pub engine: CompanionEngine,
    pub completions: Arc<RecordingCompletion>,
}

pub fn rig() -> TestRig {
    rig_with_vectors(Box::new(InMemoryVectorStore::new()))
}

pub fn rig_with_vectors(vectors: Box<dyn VectorStore>) -> TestRig {
    let completions = RecordingCompletion::new("It's always lovely to hear from you.");
    let directory = StaticDirectory::new()
        .with_user(MARGARET, "Margaret")
        .with_user(ARTHUR, "Arthur");

    let engine = CompanionEngine::new(
        ChatStore::in_memory().expect("chat store"),
        vectors,
        completions.clone(),
        Arc::new(HashEmbedding),
        Arc::new(directory),
    );

    TestRig {
        engine,
        completions,
    }
}
