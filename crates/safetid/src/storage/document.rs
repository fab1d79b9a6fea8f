//! The document-store seam.
//!
//! Profiles and credentials are JSON documents addressed by a collection
//! and a key. The core needs point reads, whole-document upserts, deletes,
//! and one atomic read-modify-write; nothing here scans or queries.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A named group of documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Medical profiles keyed by owner id.
    MedicalProfiles,
    /// Access credentials keyed by owner id.
    AccessCredentials,
    /// Share token to owner id index.
    ShareTokens,
}

impl Collection {
    /// The collection name as stored.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MedicalProfiles => "medicalProfiles",
            Self::AccessCredentials => "accessCredentials",
            Self::ShareTokens => "shareTokens",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an atomic update decided to do with the document.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Leave the stored document as it is.
    Keep,
    /// Replace the stored document (or create it).
    Replace(Value),
}

/// A document-oriented key-value store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a single document.
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>>;

    /// Create or overwrite a document.
    async fn put(&self, collection: Collection, key: &str, document: &Value) -> Result<()>;

    /// Delete a document. Returns `true` if one was removed.
    async fn delete(&self, collection: Collection, key: &str) -> Result<bool>;

    /// Atomically read, decide and write a single document.
    ///
    /// `apply` sees the current document and no other writer can touch it
    /// until the decision is committed. An `Err` from `apply` aborts the
    /// update without writing. Returns the document as stored afterwards.
    async fn update<F>(&self, collection: Collection, key: &str, apply: F) -> Result<Option<Value>>
    where
        F: FnOnce(Option<&Value>) -> Result<Change> + Send;
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for Arc<S> {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>> {
        (**self).get(collection, key).await
    }

    async fn put(&self, collection: Collection, key: &str, document: &Value) -> Result<()> {
        (**self).put(collection, key, document).await
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool> {
        (**self).delete(collection, key).await
    }

    async fn update<F>(&self, collection: Collection, key: &str, apply: F) -> Result<Option<Value>>
    where
        F: FnOnce(Option<&Value>) -> Result<Change> + Send,
    {
        (**self).update(collection, key, apply).await
    }
}
