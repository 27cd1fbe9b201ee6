//! Conversational memory: completed responses, recallable by similarity.

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::search::{Collection, VectorStore};

pub const MEMORY_COLLECTION: &str = "memory";

/// Lowercase hex SHA-256 of the UTF-8 text. Used as the storage id so that
/// storing the same text twice keeps a single record.
pub fn content_digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

pub struct MemoryStore {
    collection: Collection,
}

/// The agent writes to memory and the `access_memory` tool reads from it.
pub type SharedMemory = Arc<Mutex<MemoryStore>>;

impl MemoryStore {
    /// Drops any previous `memory` collection and starts an empty one.
    pub fn reset(store: &VectorStore) -> Result<Self> {
        if store.list_collections()?.iter().any(|name| name == MEMORY_COLLECTION) {
            store.delete_collection(MEMORY_COLLECTION)?;
            info!("Cleared previous conversation memory");
        }
        Self::open(store)
    }

    /// Opens the `memory` collection as it is on disk.
    pub fn open(store: &VectorStore) -> Result<Self> {
        Ok(Self {
            collection: store.get_or_create_collection(MEMORY_COLLECTION)?,
        })
    }

    pub fn shared(self) -> SharedMemory {
        Arc::new(Mutex::new(self))
    }

    /// Stores `text` under its digest and returns the digest.
    pub fn add(&mut self, text: &str) -> Result<String> {
        let id = content_digest(text);
        self.collection
            .add(vec![text.to_string()], None, vec![id.clone()])?;
        debug!(id = %id, records = self.collection.count(), "Stored response in memory");
        Ok(id)
    }

    /// Stored texts closest to `query`, best first.
    pub fn query(&self, query: &str, n_results: usize) -> Result<Vec<String>> {
        let result = self.collection.query(&[query.to_string()], n_results)?;
        Ok(result
            .documents
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .collect())
    }

    /// Forgets every stored response.
    pub fn clear(&mut self) -> Result<()> {
        self.collection.clear()?;
        info!("Cleared conversation memory");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.collection.count()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }
}

pub fn lock(memory: &SharedMemory) -> Result<MutexGuard<'_, MemoryStore>> {
    memory
        .lock()
        .map_err(|_| anyhow!("Memory store lock was poisoned"))
}
