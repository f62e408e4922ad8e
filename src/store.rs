//! SQLite-backed persistence shared by history, costs, and config.
//!
//! Three logical stores live in one database file: `history` (one row per
//! entry), `costs` (single aggregate key), and `config` (small blobs). A `meta`
//! table holds one-shot markers. All blocking work runs on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use crate::config::{GlobalConfig, TabConfig};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("task join error: {0}")]
    Join(String),
}

/// Key-value tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvTable {
    Costs,
    Config,
}

impl KvTable {
    fn name(self) -> &'static str {
        match self {
            Self::Costs => "costs",
            Self::Config => "config",
        }
    }
}

/// A stored history row.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub id: String,
    pub timestamp_ms: i64,
    pub status: String,
    pub payload: String,
}

#[derive(Clone)]
pub struct Database {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        Self::init(conn, path)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             CREATE TABLE IF NOT EXISTS history (\
               id TEXT PRIMARY KEY,\
               timestamp INTEGER NOT NULL,\
               status TEXT NOT NULL,\
               payload TEXT NOT NULL\
             );\
             CREATE INDEX IF NOT EXISTS history_timestamp ON history(timestamp);\
             CREATE TABLE IF NOT EXISTS costs (\
               key TEXT PRIMARY KEY,\
               payload TEXT NOT NULL\
             );\
             CREATE TABLE IF NOT EXISTS config (\
               key TEXT PRIMARY KEY,\
               payload TEXT NOT NULL\
             );\
             CREATE TABLE IF NOT EXISTS meta (\
               key TEXT PRIMARY KEY,\
               value TEXT NOT NULL\
             );",
        )?;
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError>,
    {
        let guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&guard)
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    // =========================================================================
    // history
    // =========================================================================

    /// Insert a row once. Returns `false` if the id already exists.
    pub async fn insert_history(&self, row: HistoryRow) -> Result<bool, StoreError> {
        self.run(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO history (id, timestamp, status, payload) VALUES (?1, ?2, ?3, ?4)",
                params![row.id, row.timestamp_ms, row.status, row.payload],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Replace the payload of an existing row. Returns `false` if absent.
    pub async fn update_history_payload(&self, id: &str, payload: String) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE history SET payload = ?2 WHERE id = ?1",
                params![id, payload],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn get_history(&self, id: &str) -> Result<Option<HistoryRow>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, timestamp, status, payload FROM history WHERE id = ?1",
                    params![id],
                    history_row,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    /// All rows, newest first.
    pub async fn list_history(&self) -> Result<Vec<HistoryRow>, StoreError> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, status, payload FROM history ORDER BY timestamp DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([], history_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn delete_history(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.run(move |conn| Ok(conn.execute("DELETE FROM history WHERE id = ?1", params![id])? > 0))
            .await
    }

    pub async fn clear_history(&self) -> Result<(), StoreError> {
        self.run(|conn| {
            conn.execute("DELETE FROM history", [])?;
            Ok(())
        })
        .await
    }

    /// Delete the oldest rows beyond `max`. Returns how many were removed.
    pub async fn prune_history(&self, max: usize) -> Result<usize, StoreError> {
        let max = i64::try_from(max).unwrap_or(i64::MAX);
        self.run(move |conn| {
            let removed = conn.execute(
                "DELETE FROM history WHERE id IN (\
                   SELECT id FROM history ORDER BY timestamp DESC, id DESC LIMIT -1 OFFSET ?1\
                 )",
                params![max],
            )?;
            Ok(removed)
        })
        .await
    }

    // =========================================================================
    // key-value + meta
    // =========================================================================

    pub async fn get_kv(&self, table: KvTable, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.run(move |conn| {
            let sql = format!("SELECT payload FROM {} WHERE key = ?1", table.name());
            Ok(conn
                .query_row(&sql, params![key], |row| row.get::<_, String>(0))
                .optional()?)
        })
        .await
    }

    pub async fn put_kv(&self, table: KvTable, key: &str, payload: String) -> Result<(), StoreError> {
        let key = key.to_string();
        self.run(move |conn| {
            let sql = format!(
                "INSERT INTO {} (key, payload) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET payload = excluded.payload",
                table.name()
            );
            conn.execute(&sql, params![key, payload])?;
            Ok(())
        })
        .await
    }

    pub async fn delete_kv(&self, table: KvTable, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.run(move |conn| {
            let sql = format!("DELETE FROM {} WHERE key = ?1", table.name());
            conn.execute(&sql, params![key])?;
            Ok(())
        })
        .await
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                    row.get::<_, String>(0)
                })
                .optional()?)
        })
        .await
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }
}

fn history_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryRow> {
    Ok(HistoryRow {
        id: row.get(0)?,
        timestamp_ms: row.get(1)?,
        status: row.get(2)?,
        payload: row.get(3)?,
    })
}

// =============================================================================
// Config blobs
// =============================================================================

const GLOBAL_KEY: &str = "global";

fn tab_key(tab_id: &str) -> String {
    format!("tab:{tab_id}")
}

/// Global and per-tab settings. Unreadable blobs fall back to defaults.
#[derive(Clone)]
pub struct ConfigStore {
    db: Database,
}

impl ConfigStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn global(&self) -> GlobalConfig {
        self.load(GLOBAL_KEY).await
    }

    pub async fn save_global(&self, config: &GlobalConfig) -> Result<(), StoreError> {
        self.save(GLOBAL_KEY, config).await
    }

    pub async fn tab(&self, tab_id: &str) -> TabConfig {
        self.load(&tab_key(tab_id)).await
    }

    pub async fn save_tab(&self, tab_id: &str, config: &TabConfig) -> Result<(), StoreError> {
        self.save(&tab_key(tab_id), config).await
    }

    pub async fn delete_tab(&self, tab_id: &str) -> Result<(), StoreError> {
        self.db.delete_kv(KvTable::Config, &tab_key(tab_id)).await
    }

    async fn load<T: serde::de::DeserializeOwned + Default>(&self, key: &str) -> T {
        let raw = match self.db.get_kv(KvTable::Config, key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return T::default(),
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read config; using defaults");
                return T::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "dropping invalid config blob");
            T::default()
        })
    }

    async fn save<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let payload = serde_json::to_string(value)?;
        self.db.put_kv(KvTable::Config, key, payload).await
    }
}
