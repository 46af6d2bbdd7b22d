use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const SCHEMA_VERSION: i64 = 2;

// Additive only: a later version may add tables, never drop or rename them.
const MIGRATIONS: [(i64, &str); 2] = [
    (
        1,
        r#"
        CREATE TABLE IF NOT EXISTS series (id TEXT PRIMARY KEY, data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS seasons (id TEXT PRIMARY KEY, data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS episodes (id TEXT PRIMARY KEY, data TEXT NOT NULL);
        "#,
    ),
    (
        2,
        r#"
        CREATE TABLE IF NOT EXISTS movies (id TEXT PRIMARY KEY, data TEXT NOT NULL);
        CREATE TABLE IF NOT EXISTS preferences (id TEXT PRIMARY KEY, data TEXT NOT NULL);
        "#,
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Series,
    Seasons,
    Episodes,
    Movies,
    Preferences,
}

impl Collection {
    pub fn table(self) -> &'static str {
        match self {
            Self::Series => "series",
            Self::Seasons => "seasons",
            Self::Episodes => "episodes",
            Self::Movies => "movies",
            Self::Preferences => "preferences",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to prepare database at {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("database is blocked by another open connection ({0})")]
    Blocked(String),
    #[error("database schema was upgraded to version {found} elsewhere; this session knows {known}")]
    VersionChanged { found: i64, known: i64 },
    #[error("database connection is closed")]
    Closed,
    #[error(transparent)]
    Sqlite(rusqlite::Error),
    #[error("record {id} in {table} is not valid JSON: {source}")]
    Corrupt {
        table: &'static str,
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Conditions that only a reload of the page/session can clear.
    pub fn needs_reload(&self) -> bool {
        matches!(
            self,
            Self::Blocked(_) | Self::VersionChanged { .. } | Self::Closed
        )
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                Self::Blocked(err.to_string())
            }
            _ => Self::Sqlite(err),
        }
    }
}

/// Key-value persistence with one named collection per entity category.
pub trait Store: Send + Sync {
    fn put(&self, collection: Collection, key: &str, value: &Value) -> Result<(), StoreError>;
    fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError>;
    fn clear(&self, collection: Collection) -> Result<(), StoreError>;
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError>;
    fn get_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError>;
    fn get_all_keys(&self, collection: Collection) -> Result<Vec<String>, StoreError>;
    fn count(&self, collection: Collection) -> Result<usize, StoreError>;
}

pub struct Database {
    conn: Mutex<Option<Connection>>,
}

impl Database {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| StoreError::Open {
                path: parent.display().to_string(),
                reason: err.to_string(),
            })?;
        }
        let conn = Connection::open(path).map_err(|err| StoreError::Open {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        conn.busy_timeout(busy_timeout)?;
        debug!(path = %path.display(), "opened database");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let current = user_version(conn)?;
            let pending = MIGRATIONS
                .iter()
                .filter(|(version, _)| *version > current)
                .collect::<Vec<_>>();
            if pending.is_empty() {
                return Ok(());
            }

            let tx = conn.transaction()?;
            for (version, sql) in pending {
                tx.execute_batch(sql)?;
                debug!(version, "applied schema migration");
            }
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            tx.commit()?;
            info!(from = current, to = SCHEMA_VERSION, "database schema upgraded");
            Ok(())
        })
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }

    fn with_conn<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Closed)?;
        let found = {
            let conn = guard.as_mut().ok_or(StoreError::Closed)?;
            user_version(conn)?
        };
        if found > SCHEMA_VERSION {
            // Another session owns a newer schema; drop our handle instead of
            // writing through a stale layout.
            guard.take();
            warn!(found, known = SCHEMA_VERSION, "database upgraded elsewhere, connection closed");
            return Err(StoreError::VersionChanged {
                found,
                known: SCHEMA_VERSION,
            });
        }
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        op(conn)
    }
}

fn user_version(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

fn parse_record(table: &'static str, id: String, raw: &str) -> Result<Value, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Corrupt { table, id, source })
}

impl Store for Database {
    fn put(&self, collection: Collection, key: &str, value: &Value) -> Result<(), StoreError> {
        let data = value.to_string();
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                &format!(
                    "INSERT INTO {} (id, data) VALUES (?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET data = excluded.data",
                    collection.table()
                ),
                params![key, data],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn delete(&self, collection: Collection, key: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                &format!("DELETE FROM {} WHERE id = ?1", collection.table()),
                params![key],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn clear(&self, collection: Collection) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(&format!("DELETE FROM {}", collection.table()), [])?;
            tx.commit()?;
            Ok(())
        })
    }

    fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError> {
        let table = collection.table();
        self.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    &format!("SELECT data FROM {table} WHERE id = ?1"),
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            raw.map(|raw| parse_record(table, key.to_string(), &raw))
                .transpose()
        })
    }

    fn get_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let table = collection.table();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT id, data FROM {table} ORDER BY id"))?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut out = Vec::new();
            for row in rows {
                let (id, raw) = row?;
                match parse_record(table, id, &raw) {
                    Ok(value) => out.push(value),
                    Err(err) => warn!(%err, "skipping unreadable record"),
                }
            }
            Ok(out)
        })
    }

    fn get_all_keys(&self, collection: Collection) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT id FROM {} ORDER BY id", collection.table()))?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    fn count(&self, collection: Collection) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", collection.table()),
                [],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as usize)
        })
    }
}
