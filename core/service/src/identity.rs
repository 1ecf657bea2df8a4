//! Bearer-token identity resolution. The real signup/login flow lives
//! upstream; this is only the thin lookup the engine's boundary asks
//! for: credential -> (user_id, display_name, is_admin).

use anyhow::Result;
use companion_engine::UserDirectory;
use companion_schemas::UserId;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
    pub is_admin: bool,
}

pub struct IdentityStore {
    conn: Mutex<Connection>,
}

impl IdentityStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("Identity store initialized");
        Ok(store)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("identity store poisoned");
        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                display_name TEXT NOT NULL,
                api_token TEXT NOT NULL UNIQUE,
                is_admin INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        Ok(())
    }

    /// Provisioning hook for the upstream account system.
    pub fn create_user(&self, display_name: &str, api_token: &str, is_admin: bool) -> Result<UserId> {
        let conn = self.conn.lock().expect("identity store poisoned");
        conn.execute(
            "INSERT INTO users (display_name, api_token, is_admin) VALUES (?1, ?2, ?3)",
            params![display_name, api_token, is_admin as i64],
        )?;
        Ok(UserId(conn.last_insert_rowid()))
    }

    pub fn resolve_token(&self, token: &str) -> Result<Option<Identity>> {
        let conn = self.conn.lock().expect("identity store poisoned");
        let identity = conn
            .query_row(
                "SELECT id, display_name, is_admin FROM users WHERE api_token = ?1",
                params![token],
                |row| {
                    Ok(Identity {
                        user_id: UserId(row.get(0)?),
                        display_name: row.get(1)?,
                        is_admin: row.get::<_, i64>(2)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(identity)
    }

    /// Make sure an admin account exists for the configured token.
    pub fn ensure_admin(&self, api_token: &str) -> Result<()> {
        if self.resolve_token(api_token)?.is_none() {
            self.create_user("Administrator", api_token, true)?;
            info!("Bootstrapped admin account");
        }
        Ok(())
    }
}

impl UserDirectory for IdentityStore {
    fn display_name(&self, user_id: UserId) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("identity store poisoned");
        let name = conn
            .query_row(
                "SELECT display_name FROM users WHERE id = ?1",
                params![user_id.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }
}
