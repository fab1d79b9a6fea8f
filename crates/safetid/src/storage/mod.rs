//! Storage layer for safetid.
//!
//! This module provides the [`DocumentStore`] seam and its `SQLite`-backed
//! implementation. Documents are JSON bodies in a single table keyed by
//! `(collection, doc_key)`.

mod document;
pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub use document::{Change, Collection, DocumentStore};

/// `SQLite` document store.
///
/// The connection sits behind a mutex, so every operation is serialized
/// within the process. Atomic updates additionally run in an `IMMEDIATE`
/// transaction, which takes the database write lock up front and keeps
/// other processes sharing the file from interleaving.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("storage connection lock poisoned"))
    }

    /// Read a document synchronously.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored body is not valid JSON.
    pub fn get_document(&self, collection: Collection, key: &str) -> Result<Option<Value>> {
        let conn = self.conn()?;
        Self::select(&conn, collection, key)
    }

    /// Create or overwrite a document synchronously.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn put_document(&self, collection: Collection, key: &str, document: &Value) -> Result<()> {
        let conn = self.conn()?;
        Self::upsert(&conn, collection, key, document)
    }

    /// Delete a document synchronously.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_document(&self, collection: Collection, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND doc_key = ?2",
            params![collection.as_str(), key],
        )?;
        if affected > 0 {
            debug!("Deleted document {}/{}", collection, key);
        }
        Ok(affected > 0)
    }

    /// Atomically read, decide and write a document synchronously.
    ///
    /// # Errors
    ///
    /// Returns any error from `apply` (nothing is written) or from the database.
    pub fn update_document<F>(
        &self,
        collection: Collection,
        key: &str,
        apply: F,
    ) -> Result<Option<Value>>
    where
        F: FnOnce(Option<&Value>) -> Result<Change>,
    {
        let conn = self.conn()?;
        // Dropping the transaction without commit rolls it back.
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)?;

        let current = Self::select(&tx, collection, key)?;
        let stored = match apply(current.as_ref())? {
            Change::Keep => current,
            Change::Replace(document) => {
                Self::upsert(&tx, collection, key, &document)?;
                Some(document)
            }
        };

        tx.commit()?;
        Ok(stored)
    }

    /// Count documents in a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self, collection: Collection) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            [collection.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let profiles = self.count(Collection::MedicalProfiles)?;
        let credentials = self.count(Collection::AccessCredentials)?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            profiles,
            credentials,
            db_size_bytes,
        })
    }

    fn select(conn: &Connection, collection: Collection, key: &str) -> Result<Option<Value>> {
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND doc_key = ?2",
                params![collection.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|b| serde_json::from_str(&b).map_err(Error::from))
            .transpose()
    }

    fn upsert(conn: &Connection, collection: Collection, key: &str, document: &Value) -> Result<()> {
        let body = serde_json::to_string(document)?;
        let updated_at = Utc::now().to_rfc3339();

        conn.execute(
            r"
            INSERT INTO documents (collection, doc_key, body, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (collection, doc_key)
            DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            ",
            params![collection.as_str(), key, body, updated_at],
        )?;
        debug!("Wrote document {}/{}", collection, key);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for Storage {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>> {
        self.get_document(collection, key)
    }

    async fn put(&self, collection: Collection, key: &str, document: &Value) -> Result<()> {
        self.put_document(collection, key, document)
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool> {
        self.delete_document(collection, key)
    }

    async fn update<F>(&self, collection: Collection, key: &str, apply: F) -> Result<Option<Value>>
    where
        F: FnOnce(Option<&Value>) -> Result<Change> + Send,
    {
        self.update_document(collection, key, apply)
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of stored medical profiles.
    pub profiles: i64,
    /// Number of stored access credentials.
    pub credentials: i64,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    #[test]
    fn test_open_in_memory() {
        assert!(Storage::open_in_memory().is_ok());
    }

    #[test]
    fn test_put_and_get() {
        let storage = create_test_storage();
        let doc = json!({"ownerId": "u1", "allergies": "penicillin"});

        storage
            .put_document(Collection::MedicalProfiles, "u1", &doc)
            .unwrap();

        let retrieved = storage
            .get_document(Collection::MedicalProfiles, "u1")
            .unwrap();
        assert_eq!(retrieved, Some(doc));
    }

    #[test]
    fn test_get_nonexistent() {
        let storage = create_test_storage();
        let result = storage
            .get_document(Collection::MedicalProfiles, "missing")
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_put_overwrites_whole_document() {
        let storage = create_test_storage();
        storage
            .put_document(Collection::MedicalProfiles, "u1", &json!({"a": 1, "b": 2}))
            .unwrap();
        storage
            .put_document(Collection::MedicalProfiles, "u1", &json!({"a": 3}))
            .unwrap();

        let doc = storage
            .get_document(Collection::MedicalProfiles, "u1")
            .unwrap()
            .unwrap();
        assert_eq!(doc, json!({"a": 3}));
        assert_eq!(storage.count(Collection::MedicalProfiles).unwrap(), 1);
    }

    #[test]
    fn test_collections_are_isolated() {
        let storage = create_test_storage();
        storage
            .put_document(Collection::MedicalProfiles, "u1", &json!({"kind": "profile"}))
            .unwrap();
        storage
            .put_document(Collection::AccessCredentials, "u1", &json!({"kind": "credential"}))
            .unwrap();

        let profile = storage
            .get_document(Collection::MedicalProfiles, "u1")
            .unwrap()
            .unwrap();
        assert_eq!(profile["kind"], "profile");
        assert!(storage
            .get_document(Collection::ShareTokens, "u1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_delete() {
        let storage = create_test_storage();
        storage
            .put_document(Collection::AccessCredentials, "u1", &json!({}))
            .unwrap();

        assert!(storage
            .delete_document(Collection::AccessCredentials, "u1")
            .unwrap());
        assert!(!storage
            .delete_document(Collection::AccessCredentials, "u1")
            .unwrap());
    }

    #[test]
    fn test_update_creates_document() {
        let storage = create_test_storage();
        let stored = storage
            .update_document(Collection::AccessCredentials, "u1", |current| {
                assert!(current.is_none());
                Ok(Change::Replace(json!({"n": 1})))
            })
            .unwrap();

        assert_eq!(stored, Some(json!({"n": 1})));
    }

    #[test]
    fn test_update_keep_returns_current() {
        let storage = create_test_storage();
        storage
            .put_document(Collection::AccessCredentials, "u1", &json!({"n": 1}))
            .unwrap();

        let stored = storage
            .update_document(Collection::AccessCredentials, "u1", |_| Ok(Change::Keep))
            .unwrap();
        assert_eq!(stored, Some(json!({"n": 1})));
    }

    #[test]
    fn test_update_error_writes_nothing() {
        let storage = create_test_storage();
        storage
            .put_document(Collection::AccessCredentials, "u1", &json!({"n": 1}))
            .unwrap();

        let result = storage.update_document(Collection::AccessCredentials, "u1", |_| {
            Err(Error::internal("abort"))
        });
        assert!(result.is_err());

        let doc = storage
            .get_document(Collection::AccessCredentials, "u1")
            .unwrap();
        assert_eq!(doc, Some(json!({"n": 1})));

        // The connection is usable after the rollback
        storage
            .update_document(Collection::AccessCredentials, "u1", |_| {
                Ok(Change::Replace(json!({"n": 2})))
            })
            .unwrap();
    }

    #[test]
    fn test_update_sees_latest_value() {
        let storage = create_test_storage();
        for _ in 0..10 {
            storage
                .update_document(Collection::AccessCredentials, "counter", |current| {
                    let n = current.and_then(|v| v["n"].as_u64()).unwrap_or(0);
                    Ok(Change::Replace(json!({"n": n + 1})))
                })
                .unwrap();
        }

        let doc = storage
            .get_document(Collection::AccessCredentials, "counter")
            .unwrap()
            .unwrap();
        assert_eq!(doc["n"], 10);
    }

    #[test]
    fn test_unicode_body() {
        let storage = create_test_storage();
        let doc = json!({"notes": "Hello 世界 🌍"});
        storage
            .put_document(Collection::MedicalProfiles, "u1", &doc)
            .unwrap();

        let retrieved = storage
            .get_document(Collection::MedicalProfiles, "u1")
            .unwrap();
        assert_eq!(retrieved, Some(doc));
    }

    #[test]
    fn test_stats() {
        let storage = create_test_storage();
        storage
            .put_document(Collection::MedicalProfiles, "u1", &json!({}))
            .unwrap();
        storage
            .put_document(Collection::AccessCredentials, "u1", &json!({}))
            .unwrap();
        storage
            .put_document(Collection::AccessCredentials, "u2", &json!({}))
            .unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.profiles, 1);
        assert_eq!(stats.credentials, 2);
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_path() {
        let storage = create_test_storage();
        assert_eq!(storage.path().to_string_lossy(), ":memory:");
    }

    #[test]
    fn test_open_file_based() {
        let db_path =
            std::env::temp_dir().join(format!("safetid_test_{}.db", std::process::id()));

        {
            let storage = Storage::open(&db_path).unwrap();
            storage
                .put_document(Collection::MedicalProfiles, "u1", &json!({"x": 1}))
                .unwrap();
            assert_eq!(storage.path(), db_path);
            assert!(storage.stats().unwrap().db_size_bytes > 0);
        }

        // Documents survive reopening
        let storage = Storage::open(&db_path).unwrap();
        assert!(storage
            .get_document(Collection::MedicalProfiles, "u1")
            .unwrap()
            .is_some());

        drop(storage);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let root = std::env::temp_dir().join(format!("safetid_test_{}", std::process::id()));
        let nested_path = root.join("nested/db.sqlite");
        let _ = std::fs::remove_dir_all(&root);

        let storage = Storage::open(&nested_path).unwrap();
        assert!(nested_path.exists());

        drop(storage);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_document_store_trait() {
        let storage = std::sync::Arc::new(create_test_storage());
        storage
            .put(Collection::ShareTokens, "tok", &json!({"ownerId": "u1"}))
            .await
            .unwrap();

        let doc = storage.get(Collection::ShareTokens, "tok").await.unwrap();
        assert_eq!(doc, Some(json!({"ownerId": "u1"})));
        assert!(storage.delete(Collection::ShareTokens, "tok").await.unwrap());
    }
}
