//! SQLite-based durable store.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use sizing_core::{CacheEntry, CacheKey, DurableStore, Result, SizingError};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument, warn};

/// SQLite-based durable cache tier.
///
/// Each cache key is one row holding the JSON-encoded [`CacheEntry`]. Keys are
/// bound as parameters of a `TEXT PRIMARY KEY` column, so no character of a
/// key is unsafe for this medium and keys are stored verbatim. Concurrent
/// writers to the same key resolve as last-write-wins via `INSERT OR REPLACE`.
///
/// Every statement runs on the blocking pool via `tokio::task::spawn_blocking`,
/// so a locked or slow database never stalls the async executor and callers
/// can bound each operation with a timeout.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or schema creation fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| SizingError::Storage(e.to_string()))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite store.
    ///
    /// Useful for testing; data is lost when the store is dropped.
    ///
    /// # Errors
    /// Returns an error if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| SizingError::Storage(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `op` against the connection on the blocking pool.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| SizingError::Storage(e.to_string()))?;
            op(&conn)
        })
        .await
        .map_err(|e| SizingError::Storage(e.to_string()))?
    }
}

/// Initialize the database schema.
fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cache_entries (
            cache_key TEXT PRIMARY KEY,
            entry_json TEXT NOT NULL,
            stored_at TEXT NOT NULL
        )",
        [],
    )
    .map_err(|e| SizingError::Storage(e.to_string()))?;

    debug!("SQLite store schema initialized");
    Ok(())
}

fn save_row(conn: &Connection, key: &str, entry_json: &str, stored_at: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO cache_entries (cache_key, entry_json, stored_at)
         VALUES (?1, ?2, ?3)",
        params![key, entry_json, stored_at],
    )
    .map_err(|e| SizingError::Storage(e.to_string()))?;
    Ok(())
}

fn load_row(conn: &Connection, key: &str) -> Result<Option<CacheEntry>> {
    let json = conn
        .query_row(
            "SELECT entry_json FROM cache_entries WHERE cache_key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| SizingError::Storage(e.to_string()))?;

    json.map(|json| serde_json::from_str(&json).map_err(|e| SizingError::Parse(e.to_string())))
        .transpose()
}

fn remove_row(conn: &Connection, key: &str) -> Result<usize> {
    conn.execute(
        "DELETE FROM cache_entries WHERE cache_key = ?1",
        params![key],
    )
    .map_err(|e| SizingError::Storage(e.to_string()))
}

fn list_keys(conn: &Connection) -> Result<Vec<CacheKey>> {
    let mut stmt = conn
        .prepare("SELECT cache_key FROM cache_entries ORDER BY cache_key")
        .map_err(|e| SizingError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| SizingError::Storage(e.to_string()))?;

    let mut keys = Vec::new();
    for row in rows {
        keys.push(CacheKey::raw(
            row.map_err(|e| SizingError::Storage(e.to_string()))?,
        ));
    }
    Ok(keys)
}

fn remove_rows_with_prefix(conn: &Connection, prefix: &str) -> Result<usize> {
    // substr avoids LIKE wildcards appearing inside keys.
    conn.execute(
        "DELETE FROM cache_entries WHERE substr(cache_key, 1, length(?1)) = ?1",
        params![prefix],
    )
    .map_err(|e| SizingError::Storage(e.to_string()))
}

fn remove_all_rows(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM cache_entries", [])
        .map_err(|e| SizingError::Storage(e.to_string()))
}

#[async_trait]
impl DurableStore for SqliteStore {
    #[instrument(skip(self, entry), fields(key = %key, outcome = %entry.outcome))]
    async fn save(&self, key: &CacheKey, entry: &CacheEntry) {
        let entry_json = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to encode durable entry");
                return;
            }
        };
        let key = key.as_str().to_string();
        let stored_at = entry.stored_at.to_rfc3339();
        match self
            .run(move |conn| save_row(conn, &key, &entry_json, &stored_at))
            .await
        {
            Ok(()) => debug!("Saved durable entry"),
            Err(e) => warn!(error = %e, "Failed to save durable entry"),
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn load(&self, key: &CacheKey) -> Option<CacheEntry> {
        let key = key.as_str().to_string();
        match self.run(move |conn| load_row(conn, &key)).await {
            Ok(Some(entry)) => {
                debug!("Found durable entry");
                Some(entry)
            }
            Ok(None) => {
                debug!("No durable entry found");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to load durable entry");
                None
            }
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn remove(&self, key: &CacheKey) {
        let key = key.as_str().to_string();
        if let Err(e) = self.run(move |conn| remove_row(conn, &key)).await {
            warn!(error = %e, "Failed to remove durable entry");
        }
    }

    async fn keys(&self) -> Vec<CacheKey> {
        self.run(list_keys).await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to enumerate durable entries");
            Vec::new()
        })
    }

    #[instrument(skip(self))]
    async fn clear_all(&self) {
        match self.run(remove_all_rows).await {
            Ok(removed) => debug!(removed, "Cleared all durable entries"),
            Err(e) => warn!(error = %e, "Failed to clear durable entries"),
        }
    }

    #[instrument(skip(self))]
    async fn remove_prefix(&self, prefix: &str) -> usize {
        let prefix = prefix.to_string();
        match self
            .run(move |conn| remove_rows_with_prefix(conn, &prefix))
            .await
        {
            Ok(removed) => {
                debug!(removed, "Removed durable entries by prefix");
                removed
            }
            Err(e) => {
                warn!(error = %e, "Failed to remove durable entries by prefix");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sizing_core::OutcomeKind;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_sqlite_store_initialization() {
        let store = SqliteStore::in_memory();
        assert!(store.is_ok());
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let key = CacheKey::build("fmp", [("symbol", "AAPL")]);

        assert!(store.load(&key).await.is_none());

        let entry = CacheEntry::new(
            Some(json!({"marketCap": 3.4e12, "currency": "USD"})),
            3_600_000,
            OutcomeKind::Success,
        );
        store.save(&key, &entry).await;
        assert_eq!(store.load(&key).await, Some(entry));
    }

    #[tokio::test]
    async fn test_sqlite_store_no_data_entry() {
        let store = SqliteStore::in_memory().unwrap();
        let key = CacheKey::raw("fmp:ZZZZ");
        let entry = CacheEntry::new(None, 300_000, OutcomeKind::NoData);
        store.save(&key, &entry).await;

        let loaded = store.load(&key).await.unwrap();
        assert_eq!(loaded.value, None);
        assert_eq!(loaded.outcome, OutcomeKind::NoData);
    }

    #[tokio::test]
    async fn test_sqlite_store_last_write_wins() {
        let store = SqliteStore::in_memory().unwrap();
        let key = CacheKey::raw("census:5112");
        store
            .save(&key, &CacheEntry::new(Some(json!(1)), 1_000, OutcomeKind::Success))
            .await;
        store
            .save(&key, &CacheEntry::new(Some(json!(2)), 1_000, OutcomeKind::Success))
            .await;
        assert_eq!(store.load(&key).await.unwrap().value, Some(json!(2)));
        assert_eq!(store.keys().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_store_remove_prefix_treats_wildcards_literally() {
        let store = SqliteStore::in_memory().unwrap();
        let entry = CacheEntry::new(Some(json!(1)), 1_000, OutcomeKind::Success);
        store.save(&CacheKey::raw("av_OVERVIEW_AAPL"), &entry).await;
        store.save(&CacheKey::raw("av_OVERVIEW_MSFT"), &entry).await;
        store.save(&CacheKey::raw("avXOVERVIEW_IBM"), &entry).await;
        store.save(&CacheKey::raw("fred_GDP"), &entry).await;

        assert_eq!(store.remove_prefix("av_OVERVIEW_").await, 2);
        let keys = store.keys().await;
        assert_eq!(
            keys,
            vec![CacheKey::raw("avXOVERVIEW_IBM"), CacheKey::raw("fred_GDP")]
        );
    }

    #[tokio::test]
    async fn test_sqlite_store_clear() {
        let store = SqliteStore::in_memory().unwrap();
        let key = CacheKey::raw("bls:CES5000000001");
        store
            .save(&key, &CacheEntry::new(Some(json!(7)), 1_000, OutcomeKind::Success))
            .await;
        store.clear_all().await;
        assert!(store.load(&key).await.is_none());
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let key = CacheKey::raw("fmp:MSFT");
        let entry = CacheEntry::new(Some(json!(3.1e12)), 3_600_000, OutcomeKind::Success);
        {
            let store = SqliteStore::new(&path).unwrap();
            store.save(&key, &entry).await;
        }
        let reopened = SqliteStore::new(&path).unwrap();
        assert_eq!(reopened.load(&key).await, Some(entry));
    }

    #[tokio::test]
    async fn test_locked_database_does_not_stall_bounded_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let store = Arc::new(SqliteStore::new(&path).unwrap());
        let key = CacheKey::raw("fmp:AAPL");
        store
            .save(&key, &CacheEntry::new(Some(json!(3.4e12)), 3_600_000, OutcomeKind::Success))
            .await;

        let locker = Connection::open(&path).unwrap();
        locker.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let cache = crate::CacheService::hybrid(store)
            .with_fallback_timeout(Duration::from_millis(200));
        let started = Instant::now();
        assert!(cache.get(&key).await.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(cache.stats().durable_timeouts, 1);

        locker.execute_batch("COMMIT").unwrap();
    }
}
