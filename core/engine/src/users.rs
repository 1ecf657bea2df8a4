use anyhow::Result;
use companion_schemas::UserId;
use std::collections::HashMap;

/// Read-only view of the user entity owned by the surrounding system.
/// The engine only ever needs a display name for prompt personalisation.
pub trait UserDirectory: Send + Sync {
    fn display_name(&self, user_id: UserId) -> Result<Option<String>>;
}

/// Fixed in-process directory, for tests and single-tenant deployments.
pub struct StaticDirectory {
    names: HashMap<i64, String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self {
            names: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user_id: UserId, display_name: impl Into<String>) -> Self {
        self.names.insert(user_id.0, display_name.into());
        self
    }
}

impl Default for StaticDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl UserDirectory for StaticDirectory {
    fn display_name(&self, user_id: UserId) -> Result<Option<String>> {
        Ok(self.names.get(&user_id.0).cloned())
    }
}
