use companion_schemas::UserId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

/// Keyed mutual exclusion: one async mutex per user, so all operations
/// on a single user's history serialize while different users run in
/// parallel. A single global lock would serialize everyone.
pub struct UserLocks {
    inner: StdMutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self {
            inner: StdMutex::new(HashMap::new()),
        }
    }

    /// Get (or create) the lock for a user. The registry mutex is held
    /// only for the map lookup, never across an await point.
    pub fn for_user(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().expect("user lock registry poisoned");
        map.entry(user_id.0).or_default().clone()
    }
}

impl Default for UserLocks {
    fn default() -> Self {
        Self::new()
    }
}
