//! One-file-per-key durable store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sizing_core::{CacheEntry, CacheKey, DurableStore, Result, SizingError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, instrument, warn};

/// Extension of committed records.
const RECORD_EXTENSION: &str = "json";

/// Extension of in-progress writes; never enumerated as records.
const TEMP_EXTENSION: &str = "tmp";

/// Longest sanitized key used verbatim as a file stem. Leaves room for the
/// temporary-file suffix under the common 255-byte file-name limit.
const MAX_STEM_LEN: usize = 200;

/// Sanitized prefix kept in front of the digest of an over-long key.
const HASHED_PREFIX_LEN: usize = 120;

/// Separates the kept prefix from the digest; [`sanitize_key`] never emits it.
const DIGEST_SEPARATOR: char = '~';

/// Durable cache tier storing each entry as a JSON file in one directory.
///
/// Each record holds its full key next to the entry, so [`keys`](DurableStore::keys)
/// is answered by reading the records and no manifest is needed. File names
/// come from [`record_stem`]: keys are percent-encoded by [`sanitize_key`],
/// and encodings too long for a file name are shortened to a prefix plus a
/// SHA-256 digest of the whole key. Writes go to a temporary file first and
/// are renamed into place, so readers never see a torn record and concurrent
/// writers resolve as last-write-wins.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_seq: AtomicU64,
}

#[derive(Serialize)]
struct RecordRef<'a> {
    key: &'a str,
    entry: &'a CacheEntry,
}

#[derive(Deserialize)]
struct Record {
    key: String,
    entry: CacheEntry,
}

impl FileStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            SizingError::Storage(format!("cannot create {}: {e}", dir.display()))
        })?;
        Ok(Self {
            dir,
            write_seq: AtomicU64::new(0),
        })
    }

    /// Returns the directory holding the records.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.{RECORD_EXTENSION}"))
    }

    async fn read_record(path: &Path) -> Result<Option<Record>> {
        match tokio::fs::read(path).await {
            Ok(body) => serde_json::from_slice(&body)
                .map(Some)
                .map_err(|e| SizingError::Parse(e.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SizingError::Storage(e.to_string())),
        }
    }

    async fn try_save(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
        let body = serde_json::to_vec(&RecordRef {
            key: key.as_str(),
            entry,
        })
        .map_err(|e| SizingError::Parse(e.to_string()))?;
        let stem = record_stem(key.as_str());
        let target = self.record_path(&stem);
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let temp = self.dir.join(format!(
            "{stem}.{}-{seq}.{TEMP_EXTENSION}",
            std::process::id()
        ));

        tokio::fs::write(&temp, body)
            .await
            .map_err(|e| SizingError::Storage(e.to_string()))?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(SizingError::Storage(e.to_string()));
        }
        Ok(())
    }

    async fn try_load(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let path = self.record_path(&record_stem(key.as_str()));
        match Self::read_record(&path).await? {
            Some(record) if record.key == key.as_str() => Ok(Some(record.entry)),
            Some(_) => {
                debug!(file = %path.display(), "Record belongs to a different key");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn try_remove(&self, key: &CacheKey) -> Result<()> {
        match tokio::fs::remove_file(self.record_path(&record_stem(key.as_str()))).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SizingError::Storage(e.to_string())),
        }
    }

    async fn try_keys(&self) -> Result<Vec<CacheKey>> {
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| SizingError::Storage(e.to_string()))?;

        let mut keys = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| SizingError::Storage(e.to_string()))?
        {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(Some(record)) => keys.push(CacheKey::raw(record.key)),
                Ok(None) => {}
                Err(e) => {
                    debug!(file = %path.display(), error = %e, "Skipping foreign file in cache directory");
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl DurableStore for FileStore {
    #[instrument(skip(self, entry), fields(key = %key, outcome = %entry.outcome))]
    async fn save(&self, key: &CacheKey, entry: &CacheEntry) {
        match self.try_save(key, entry).await {
            Ok(()) => debug!("Saved durable entry"),
            Err(e) => warn!(error = %e, "Failed to save durable entry"),
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn load(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.try_load(key).await {
            Ok(entry) => {
                debug!(found = entry.is_some(), "Loaded durable entry");
                entry
            }
            Err(e) => {
                warn!(error = %e, "Failed to load durable entry");
                None
            }
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn remove(&self, key: &CacheKey) {
        if let Err(e) = self.try_remove(key).await {
            warn!(error = %e, "Failed to remove durable entry");
        }
    }

    async fn keys(&self) -> Vec<CacheKey> {
        self.try_keys().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to enumerate durable entries");
            Vec::new()
        })
    }

    #[instrument(skip(self))]
    async fn clear_all(&self) {
        let keys = self.keys().await;
        let count = keys.len();
        for key in keys {
            self.remove(&key).await;
        }
        debug!(removed = count, "Cleared all durable entries");
    }
}

/// Maps a cache key to a file-name-safe identifier.
///
/// ASCII letters, digits, `_` and `-` pass through; every other byte becomes
/// `%XX` (uppercase hex). The mapping is injective.
#[must_use]
pub fn sanitize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Returns the file stem of the record for `key`.
///
/// Short keys map to [`sanitize_key`] verbatim. Longer ones keep a sanitized
/// prefix followed by `~` and the hex SHA-256 of the full key, which bounds
/// the stem at 185 bytes. The `~` separator keeps the two forms disjoint.
#[must_use]
pub fn record_stem(key: &str) -> String {
    let sanitized = sanitize_key(key);
    if sanitized.len() <= MAX_STEM_LEN {
        return sanitized;
    }
    let digest = Sha256::digest(key.as_bytes());
    // The sanitized form is ASCII, so any byte offset is a char boundary.
    format!(
        "{}{DIGEST_SEPARATOR}{digest:x}",
        &sanitized[..HASHED_PREFIX_LEN]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sizing_core::OutcomeKind;

    #[test]
    fn test_sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_key("av_OVERVIEW_AAPL"), "av_OVERVIEW_AAPL");
        assert_eq!(sanitize_key("a/b"), "a%2Fb");
        assert_eq!(sanitize_key("..\\x"), "%2E%2E%5Cx");
        assert_eq!(sanitize_key("50%"), "50%25");
    }

    #[test]
    fn test_sanitize_is_injective() {
        // Naive substitution would map both of these to "a_b".
        assert_ne!(sanitize_key("a/b"), sanitize_key("a_b"));
        assert_ne!(sanitize_key("a%2Fb"), sanitize_key("a/b"));
    }

    #[test]
    fn test_record_stem_is_bounded() {
        assert_eq!(record_stem("fred_GDP"), "fred_GDP");

        let long = "x".repeat(500);
        let stem = record_stem(&long);
        assert!(stem.len() <= MAX_STEM_LEN);
        assert!(stem.starts_with(&"x".repeat(HASHED_PREFIX_LEN)));
        assert!(stem.contains(DIGEST_SEPARATOR));

        // Same prefix, different tails.
        assert_ne!(record_stem(&format!("{long}a")), record_stem(&format!("{long}b")));
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let key = CacheKey::build("fmp", [("symbol", "AAPL"), ("region", "US/EU")]);

        assert!(store.load(&key).await.is_none());

        let entry = CacheEntry::new(Some(json!({"marketCap": 3.4e12})), 3_600_000, OutcomeKind::Success);
        store.save(&key, &entry).await;
        assert_eq!(store.load(&key).await, Some(entry));
        assert_eq!(store.keys().await, vec![key]);
    }

    #[tokio::test]
    async fn test_file_store_keys_ignore_temp_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("abc.1-0.tmp"), "x").unwrap();
        std::fs::write(dir.path().join("not valid.json"), "x").unwrap();

        let key = CacheKey::raw("fred_GDP");
        store
            .save(&key, &CacheEntry::new(Some(json!(27.0e12)), 1_000, OutcomeKind::Success))
            .await;
        assert_eq!(store.keys().await, vec![key]);
    }

    #[tokio::test]
    async fn test_file_store_corrupt_record_degrades_to_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let key = CacheKey::raw("census_5112");
        std::fs::write(dir.path().join("census_5112.json"), "{not json").unwrap();
        assert!(store.load(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_file_store_missing_directory_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("cache")).unwrap();
        std::fs::remove_dir_all(store.dir()).unwrap();

        let key = CacheKey::raw("fmp_AAPL");
        store
            .save(&key, &CacheEntry::new(Some(json!(1)), 1_000, OutcomeKind::Success))
            .await;
        assert!(store.load(&key).await.is_none());
        assert!(store.keys().await.is_empty());
        store.remove(&key).await;
        store.clear_all().await;
    }

    #[tokio::test]
    async fn test_file_store_remove_prefix_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let entry = CacheEntry::new(Some(json!(1)), 1_000, OutcomeKind::Success);
        for key in ["av_OVERVIEW_AAPL", "av_OVERVIEW_MSFT", "fred_GDP"] {
            store.save(&CacheKey::raw(key), &entry).await;
        }

        assert_eq!(store.remove_prefix("av_OVERVIEW_").await, 2);
        assert_eq!(store.keys().await, vec![CacheKey::raw("fred_GDP")]);

        store.clear_all().await;
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_remove_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.remove(&CacheKey::raw("never_written")).await;
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_long_keys_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let identifier = "Global Widgets & Associated Precision Components Manufacturing Holdings \
                          (Consolidated Subsidiaries, Europe/Asia)";
        let first = CacheKey::build(
            "market_size",
            [("identifier", identifier), ("region", "US"), ("currency", "USD")],
        );
        let second = CacheKey::build(
            "market_size",
            [("identifier", identifier), ("region", "US"), ("currency", "EUR")],
        );
        assert!(sanitize_key(first.as_str()).len() > 255);

        let entry = CacheEntry::new(Some(json!({"marketCap": 8.1e9})), 60_000, OutcomeKind::Success);
        let other = CacheEntry::new(None, 60_000, OutcomeKind::NoData);
        store.save(&first, &entry).await;
        store.save(&second, &other).await;

        assert_eq!(store.load(&first).await, Some(entry));
        assert_eq!(store.load(&second).await, Some(other));

        let mut expected = vec![first.clone(), second];
        expected.sort();
        assert_eq!(store.keys().await, expected);

        for item in std::fs::read_dir(dir.path()).unwrap() {
            assert!(item.unwrap().file_name().len() <= 255);
        }

        store.remove(&first).await;
        assert!(store.load(&first).await.is_none());
    }

    #[tokio::test]
    async fn test_file_store_rejects_record_for_another_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let entry = CacheEntry::new(Some(json!(1)), 60_000, OutcomeKind::Success);
        store.save(&CacheKey::raw("fmp_AAPL"), &entry).await;
        std::fs::rename(dir.path().join("fmp_AAPL.json"), dir.path().join("fmp_MSFT.json")).unwrap();

        assert!(store.load(&CacheKey::raw("fmp_MSFT")).await.is_none());
        assert_eq!(store.keys().await, vec![CacheKey::raw("fmp_AAPL")]);
    }
}
