use anyhow::Result;
use companion_schemas::{ExchangeId, UserId};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// A semantic hit: the owning exchange and its cosine similarity to the
/// query embedding.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub exchange_id: ExchangeId,
    pub score: f32,
}

/// Vector memory store. Eventually-consistent mirror of the relational
/// store: one embedding per exchange, with `user_id` and a mirrored
/// delete flag so queries can exclude hidden content without removing
/// the vector.
///
/// `search` must always filter by `user_id`. A semantic query must
/// never return another user's memories, no matter how similar the
/// embeddings are.
///
/// `Send` only: implementations live behind an async mutex and are
/// never shared without it, and the rusqlite connection is not `Sync`.
pub trait VectorStore: Send {
    fn upsert(&mut self, exchange_id: ExchangeId, user_id: UserId, embedding: Vec<f32>)
        -> Result<()>;

    fn search(&self, user_id: UserId, query: &[f32], k: usize) -> Result<Vec<VectorHit>>;

    /// Mirror a soft-delete: the vectors stay but become invisible to
    /// `search`. Takes effect before returning.
    fn mark_deleted(&mut self, user_id: UserId, exchange_ids: &[ExchangeId]) -> Result<()>;

    /// Remove every vector for the user. Returns the count removed.
    fn remove_user(&mut self, user_id: UserId) -> Result<u64>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

fn top_k(mut hits: Vec<VectorHit>, k: usize) -> Vec<VectorHit> {
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(k);
    hits
}

// ============================================================================
// SQLite-backed implementation
// ============================================================================

/// Durable vector index: embeddings serialized as JSON per exchange row.
/// Similarity is a per-user scan, which is plenty for one person's
/// conversation history.
pub struct SqliteVectorStore {
    conn: Connection,
}

impl SqliteVectorStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        info!("Vector store initialized");
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS memory_vectors (
                exchange_id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                embedding TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memory_vectors_user
             ON memory_vectors(user_id)",
            [],
        )?;

        Ok(())
    }
}

impl VectorStore for SqliteVectorStore {
    fn upsert(
        &mut self,
        exchange_id: ExchangeId,
        user_id: UserId,
        embedding: Vec<f32>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO memory_vectors (exchange_id, user_id, is_deleted, embedding)
             VALUES (?1, ?2, 0, ?3)
             ON CONFLICT(exchange_id) DO UPDATE SET
                user_id = excluded.user_id,
                is_deleted = excluded.is_deleted,
                embedding = excluded.embedding",
            params![exchange_id.0, user_id.0, serde_json::to_string(&embedding)?],
        )?;
        Ok(())
    }

    fn search(&self, user_id: UserId, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        let mut stmt = self.conn.prepare(
            "SELECT exchange_id, embedding FROM memory_vectors
             WHERE user_id = ?1 AND is_deleted = 0",
        )?;

        let rows = stmt
            .query_map(params![user_id.0], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut hits = Vec::new();
        for (id, embedding_json) in rows {
            let embedding: Vec<f32> = serde_json::from_str(&embedding_json)?;
            hits.push(VectorHit {
                exchange_id: ExchangeId(id),
                score: cosine_similarity(query, &embedding),
            });
        }

        let hits = top_k(hits, k);
        debug!("Vector search for user {} returned {} hits", user_id, hits.len());
        Ok(hits)
    }

    fn mark_deleted(&mut self, user_id: UserId, exchange_ids: &[ExchangeId]) -> Result<()> {
        for id in exchange_ids {
            self.conn.execute(
                "UPDATE memory_vectors SET is_deleted = 1
                 WHERE exchange_id = ?1 AND user_id = ?2",
                params![id.0, user_id.0],
            )?;
        }
        Ok(())
    }

    fn remove_user(&mut self, user_id: UserId) -> Result<u64> {
        let removed = self.conn.execute(
            "DELETE FROM memory_vectors WHERE user_id = ?1",
            params![user_id.0],
        )?;
        Ok(removed as u64)
    }
}

// ============================================================================
// In-memory implementation (tests, degraded deployments)
// ============================================================================

struct VectorRecord {
    user_id: UserId,
    is_deleted: bool,
    embedding: Vec<f32>,
}

pub struct InMemoryVectorStore {
    records: HashMap<i64, VectorRecord>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorStore for InMemoryVectorStore {
    fn upsert(
        &mut self,
        exchange_id: ExchangeId,
        user_id: UserId,
        embedding: Vec<f32>,
    ) -> Result<()> {
        self.records.insert(
            exchange_id.0,
            VectorRecord {
                user_id,
                is_deleted: false,
                embedding,
            },
        );
        Ok(())
    }

    fn search(&self, user_id: UserId, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        let hits = self
            .records
            .iter()
            .filter(|(_, record)| record.user_id == user_id && !record.is_deleted)
            .map(|(id, record)| VectorHit {
                exchange_id: ExchangeId(*id),
                score: cosine_similarity(query, &record.embedding),
            })
            .collect();

        Ok(top_k(hits, k))
    }

    fn mark_deleted(&mut self, user_id: UserId, exchange_ids: &[ExchangeId]) -> Result<()> {
        for id in exchange_ids {
            if let Some(record) = self.records.get_mut(&id.0) {
                if record.user_id == user_id {
                    record.is_deleted = true;
                }
            }
        }
        Ok(())
    }

    fn remove_user(&mut self, user_id: UserId) -> Result<u64> {
        let before = self.records.len();
        self.records.retain(|_, record| record.user_id != user_id);
        Ok((before - self.records.len()) as u64)
    }
}
