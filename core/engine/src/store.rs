use anyhow::Result;
use companion_schemas::{
    now_rfc3339, ChatExchange, ExchangeId, HistoryFilter, ModerationLogEntry, UserId,
};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use tracing::info;

/// Shared visibility predicate. Every read path appends this clause so a
/// forgotten filter can never leak hidden rows.
fn visibility_clause(filter: HistoryFilter) -> &'static str {
    match filter {
        HistoryFilter::Active => " AND is_deleted = 0",
        HistoryFilter::Deleted => " AND is_deleted = 1",
        HistoryFilter::All => "",
    }
}

/// Relational message store. Source of truth for ordering, pagination,
/// and soft/hard delete flags.
pub struct ChatStore {
    conn: Connection,
}

impl ChatStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        let store = Self { conn };
        store.init_schema()?;

        info!("Chat store initialized");
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        // Exchanges: append-mostly, mutated only by the delete flag flip.
        // AUTOINCREMENT keeps ids monotonic and makes them a stable
        // tie-break when two rows share a timestamp.
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS exchanges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                message TEXT NOT NULL,
                response TEXT NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_exchanges_user_created
             ON exchanges(user_id, created_at DESC, id DESC)",
            [],
        )?;

        // Moderation log: append-only, reason codes only.
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS moderation_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                exchange_id INTEGER NOT NULL,
                flag_reason TEXT NOT NULL,
                flagged_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Persist one exchange. `created_at` is assigned here, at
    /// persistence time.
    pub fn insert_exchange(
        &self,
        user_id: UserId,
        message: &str,
        response: &str,
    ) -> Result<ChatExchange> {
        let created_at = now_rfc3339();

        self.conn.execute(
            "INSERT INTO exchanges (user_id, message, response, is_deleted, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![user_id.0, message, response, created_at],
        )?;

        let id = ExchangeId(self.conn.last_insert_rowid());

        Ok(ChatExchange {
            id,
            user_id,
            message: message.to_string(),
            response: response.to_string(),
            created_at,
            is_deleted: false,
        })
    }

    /// The `limit` most recent non-deleted exchanges, newest first.
    pub fn recent_window(&self, user_id: UserId, limit: usize) -> Result<Vec<ChatExchange>> {
        self.page(user_id, HistoryFilter::Active, limit, 0)
    }

    /// Paginated history, newest first, under the given visibility filter.
    pub fn page(
        &self,
        user_id: UserId,
        filter: HistoryFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatExchange>> {
        let query = format!(
            "SELECT id, user_id, message, response, created_at, is_deleted
             FROM exchanges
             WHERE user_id = ?1{}
             ORDER BY created_at DESC, id DESC
             LIMIT ?2 OFFSET ?3",
            visibility_clause(filter)
        );

        let mut stmt = self.conn.prepare(&query)?;
        let exchanges = stmt
            .query_map(params![user_id.0, limit, offset], map_exchange)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(exchanges)
    }

    /// Fetch specific exchanges by id, still under the visibility filter
    /// and still scoped to the owning user. Results come back oldest
    /// first for presentation.
    pub fn exchanges_by_ids(
        &self,
        user_id: UserId,
        ids: &[ExchangeId],
        filter: HistoryFilter,
    ) -> Result<Vec<ChatExchange>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let query = format!(
            "SELECT id, user_id, message, response, created_at, is_deleted
             FROM exchanges
             WHERE user_id = ?{} AND id IN ({})
             ORDER BY created_at ASC, id ASC",
            visibility_clause(filter),
            placeholders
        );

        let mut stmt = self.conn.prepare(&query)?;
        let mut values: Vec<rusqlite::types::Value> = vec![user_id.0.into()];
        values.extend(ids.iter().map(|id| rusqlite::types::Value::from(id.0)));

        let exchanges = stmt
            .query_map(rusqlite::params_from_iter(values), map_exchange)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(exchanges)
    }

    pub fn count(&self, user_id: UserId, filter: HistoryFilter) -> Result<u64> {
        let query = format!(
            "SELECT COUNT(*) FROM exchanges WHERE user_id = ?1{}",
            visibility_clause(filter)
        );
        let count: i64 = self
            .conn
            .query_row(&query, params![user_id.0], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Flip the delete flag on every currently-active exchange. Returns
    /// the ids that changed so the caller can mirror the flag into the
    /// vector store. Idempotent: an already-hidden history changes nothing.
    pub fn soft_delete_all(&self, user_id: UserId) -> Result<Vec<ExchangeId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM exchanges WHERE user_id = ?1 AND is_deleted = 0")?;
        let ids = stmt
            .query_map(params![user_id.0], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.conn.execute(
            "UPDATE exchanges SET is_deleted = 1 WHERE user_id = ?1 AND is_deleted = 0",
            params![user_id.0],
        )?;

        Ok(ids.into_iter().map(ExchangeId).collect())
    }

    /// Remove every exchange for the user, active and hidden alike.
    /// Returns the count removed. Moderation log rows are left intact.
    pub fn purge_all(&self, user_id: UserId) -> Result<u64> {
        let removed = self
            .conn
            .execute("DELETE FROM exchanges WHERE user_id = ?1", params![user_id.0])?;
        Ok(removed as u64)
    }

    pub fn log_moderation(&self, exchange_id: ExchangeId, flag_reason: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO moderation_log (exchange_id, flag_reason, flagged_at)
             VALUES (?1, ?2, ?3)",
            params![exchange_id.0, flag_reason, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn moderation_entries(&self, limit: usize) -> Result<Vec<ModerationLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, exchange_id, flag_reason, flagged_at
             FROM moderation_log
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(ModerationLogEntry {
                    id: row.get(0)?,
                    exchange_id: ExchangeId(row.get(1)?),
                    flag_reason: row.get(2)?,
                    flagged_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

fn map_exchange(row: &Row) -> rusqlite::Result<ChatExchange> {
    Ok(ChatExchange {
        id: ExchangeId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        message: row.get(2)?,
        response: row.get(3)?,
        created_at: row.get(4)?,
        is_deleted: row.get::<_, i64>(5)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_history() -> ChatStore {
        let store = ChatStore::in_memory().unwrap();
        for i in 0..3 {
            store
                .insert_exchange(UserId(1), &format!("message {}", i), "reply")
                .unwrap();
        }
        store
    }

    #[test]
    fn test_insert_assigns_monotonic_ids() {
        let store = ChatStore::in_memory().unwrap();
        let a = store.insert_exchange(UserId(1), "first", "r1").unwrap();
        let b = store.insert_exchange(UserId(1), "second", "r2").unwrap();
        assert!(b.id > a.id);
        assert!(!a.is_deleted);
    }

    #[test]
    fn test_page_orders_newest_first() {
        let store = store_with_history();
        let page = store.page(UserId(1), HistoryFilter::Active, 10, 0).unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].message, "message 2");
        assert_eq!(page[2].message, "message 0");
    }

    #[test]
    fn test_soft_delete_is_idempotent() {
        let store = store_with_history();
        let first = store.soft_delete_all(UserId(1)).unwrap();
        assert_eq!(first.len(), 3);

        let second = store.soft_delete_all(UserId(1)).unwrap();
        assert!(second.is_empty());

        assert_eq!(store.count(UserId(1), HistoryFilter::Active).unwrap(), 0);
        assert_eq!(store.count(UserId(1), HistoryFilter::Deleted).unwrap(), 3);
        assert_eq!(store.count(UserId(1), HistoryFilter::All).unwrap(), 3);
    }

    #[test]
    fn test_visibility_filter_applies_to_every_read() {
        let store = store_with_history();
        store.soft_delete_all(UserId(1)).unwrap();
        store.insert_exchange(UserId(1), "still here", "r").unwrap();

        let active = store.page(UserId(1), HistoryFilter::Active, 10, 0).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].message, "still here");

        let deleted = store
            .page(UserId(1), HistoryFilter::Deleted, 10, 0)
            .unwrap();
        assert_eq!(deleted.len(), 3);
        assert!(deleted.iter().all(|e| e.is_deleted));

        let window = store.recent_window(UserId(1), 10).unwrap();
        assert_eq!(window.len(), 1);

        let ids: Vec<ExchangeId> = deleted.iter().map(|e| e.id).collect();
        let by_ids = store
            .exchanges_by_ids(UserId(1), &ids, HistoryFilter::Active)
            .unwrap();
        assert!(by_ids.is_empty());
    }

    #[test]
    fn test_purge_removes_all_states_but_keeps_moderation_log() {
        let store = store_with_history();
        let flagged = store.insert_exchange(UserId(1), "bad", "worse").unwrap();
        store.log_moderation(flagged.id, "response:profanity").unwrap();
        store.soft_delete_all(UserId(1)).unwrap();

        let removed = store.purge_all(UserId(1)).unwrap();
        assert_eq!(removed, 4);
        assert_eq!(store.count(UserId(1), HistoryFilter::All).unwrap(), 0);

        let log = store.moderation_entries(10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].exchange_id, flagged.id);
    }

    #[test]
    fn test_reopen_preserves_history_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");

        {
            let store = ChatStore::new(&path).unwrap();
            store.insert_exchange(UserId(1), "kept", "r").unwrap();
            store.insert_exchange(UserId(1), "hidden", "r").unwrap();
            let ids = store.soft_delete_all(UserId(1)).unwrap();
            assert_eq!(ids.len(), 2);
            store.insert_exchange(UserId(1), "after", "r").unwrap();
        }

        let store = ChatStore::new(&path).unwrap();
        assert_eq!(store.count(UserId(1), HistoryFilter::Active).unwrap(), 1);
        assert_eq!(store.count(UserId(1), HistoryFilter::Deleted).unwrap(), 2);

        let active = store.page(UserId(1), HistoryFilter::Active, 10, 0).unwrap();
        assert_eq!(active[0].message, "after");
    }

    #[test]
    fn test_exchanges_by_ids_scoped_to_user() {
        let store = ChatStore::in_memory().unwrap();
        let mine = store.insert_exchange(UserId(1), "mine", "r").unwrap();
        let theirs = store.insert_exchange(UserId(2), "theirs", "r").unwrap();

        let fetched = store
            .exchanges_by_ids(UserId(1), &[mine.id, theirs.id], HistoryFilter::Active)
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].message, "mine");
    }
}
