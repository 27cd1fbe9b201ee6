//! A small persistent vector store.
//!
//! A [`VectorStore`] is a directory; each [`Collection`] is one JSON file in it
//! holding the ids, documents and metadata of its records plus a base64 blob of
//! their (normalized) embeddings. Collections embed their own documents and
//! query texts through the store's [`TextEmbedder`].
#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::embedding_engine::TextEmbedder;

const COLLECTION_EXTENSION: &str = "json";

/// Free-form metadata attached to a record.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

/// Results for a batch of query texts; the outer index matches the query.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct QueryResult {
    pub ids: Vec<Vec<String>>,
    pub documents: Vec<Vec<Option<String>>>,
    pub metadatas: Vec<Vec<Metadata>>,
    /// Cosine distance, `1 - similarity`.
    pub distances: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CollectionFile {
    name: String,
    embedding_dim: usize,
    records: Vec<Record>,
    #[serde(with = "base64_matrix")]
    matrix: Vec<f32>,
}

mod base64_matrix {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(matrix: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        let bytes: &[u8] = bytemuck::cast_slice(matrix);
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        if bytes.len() % 4 != 0 {
            return Err(serde::de::Error::custom(format!(
                "matrix byte length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}

/// Handle on a store directory. Cheap to clone.
#[derive(Clone)]
pub struct VectorStore {
    root: PathBuf,
    embedder: Arc<dyn TextEmbedder>,
}

impl VectorStore {
    pub fn open(root: impl AsRef<Path>, embedder: Arc<dyn TextEmbedder>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create vector store directory {:?}", root))?;
        Ok(Self { root, embedder })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn embedder(&self) -> Arc<dyn TextEmbedder> {
        Arc::clone(&self.embedder)
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, COLLECTION_EXTENSION))
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list vector store directory {:?}", self.root))?
        {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(COLLECTION_EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn get_or_create_collection(&self, name: &str) -> Result<Collection> {
        Collection::open(name, self.collection_path(name), Arc::clone(&self.embedder))
    }

    /// Removes a collection's file. Returns whether it existed.
    pub fn delete_collection(&self, name: &str) -> Result<bool> {
        let path = self.collection_path(name);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("Failed to delete collection {:?}", path))?;
        info!(collection = name, "Deleted collection");
        Ok(true)
    }
}

pub struct Collection {
    path: PathBuf,
    embedder: Arc<dyn TextEmbedder>,
    storage: CollectionFile,
    positions: HashMap<String, usize>,
}

impl Collection {
    fn open(name: &str, path: PathBuf, embedder: Arc<dyn TextEmbedder>) -> Result<Self> {
        let embedding_dim = embedder.dimension();
        let storage = if path.exists() && path.metadata()?.len() > 0 {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read collection file {:?}", path))?;
            let storage: CollectionFile = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse collection file {:?}", path))?;

            if storage.embedding_dim != embedding_dim {
                anyhow::bail!(
                    "Embedding dimension mismatch for collection '{}': stored {}, embedder produces {}",
                    name,
                    storage.embedding_dim,
                    embedding_dim
                );
            }
            let expected_len = storage.records.len() * storage.embedding_dim;
            if storage.matrix.len() != expected_len {
                anyhow::bail!(
                    "Matrix size mismatch for collection '{}': expected {}, got {}",
                    name,
                    expected_len,
                    storage.matrix.len()
                );
            }
            storage
        } else {
            CollectionFile {
                name: name.to_string(),
                embedding_dim,
                records: Vec::new(),
                matrix: Vec::new(),
            }
        };

        let positions = storage
            .records
            .iter()
            .enumerate()
            .map(|(i, record)| (record.id.clone(), i))
            .collect();

        debug!(collection = name, records = storage.records.len(), "Opened collection");
        Ok(Self {
            path,
            embedder,
            storage,
            positions,
        })
    }

    pub fn name(&self) -> &str {
        &self.storage.name
    }

    pub fn count(&self) -> usize {
        self.storage.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.records.is_empty()
    }

    /// Drops every record and persists the empty collection.
    pub fn clear(&mut self) -> Result<()> {
        self.storage.records.clear();
        self.storage.matrix.clear();
        self.positions.clear();
        self.persist()
    }

    /// Embeds `documents` and upserts them under `ids`, then persists.
    pub fn add(
        &mut self,
        documents: Vec<String>,
        metadatas: Option<Vec<Metadata>>,
        ids: Vec<String>,
    ) -> Result<()> {
        let embeddings = self
            .embedder
            .embed(&documents)
            .with_context(|| format!("Failed to embed documents for '{}'", self.name()))?;
        self.add_with_embeddings(embeddings, Some(documents), metadatas, ids)
    }

    /// Upserts precomputed embeddings. An id that already exists is
    /// overwritten in place, so re-adding the same id never grows the
    /// collection.
    pub fn add_with_embeddings(
        &mut self,
        embeddings: Vec<Vec<f32>>,
        documents: Option<Vec<String>>,
        metadatas: Option<Vec<Metadata>>,
        ids: Vec<String>,
    ) -> Result<()> {
        if embeddings.len() != ids.len() {
            anyhow::bail!(
                "Embeddings and IDs count mismatch: {} vs {}",
                embeddings.len(),
                ids.len()
            );
        }
        if documents.as_ref().is_some_and(|docs| docs.len() != ids.len()) {
            anyhow::bail!("Documents and IDs count mismatch");
        }
        if metadatas.as_ref().is_some_and(|metas| metas.len() != ids.len()) {
            anyhow::bail!("Metadatas and IDs count mismatch");
        }

        let mut documents = documents.map(Vec::into_iter);
        let mut metadatas = metadatas.map(Vec::into_iter);
        let dim = self.storage.embedding_dim;

        for (embedding, id) in embeddings.into_iter().zip(ids) {
            if embedding.len() != dim {
                anyhow::bail!(
                    "Embedding dimension mismatch for item '{}'. Expected {}, got {}.",
                    id,
                    dim,
                    embedding.len()
                );
            }
            let record = Record {
                id: id.clone(),
                document: documents.as_mut().and_then(Iterator::next),
                metadata: metadatas.as_mut().and_then(Iterator::next).unwrap_or_default(),
            };
            let vector = normalize(&embedding);

            match self.positions.get(&id) {
                Some(&pos) => {
                    self.storage.matrix[pos * dim..(pos + 1) * dim].copy_from_slice(&vector);
                    self.storage.records[pos] = record;
                }
                None => {
                    self.positions.insert(id, self.storage.records.len());
                    self.storage.matrix.extend_from_slice(&vector);
                    self.storage.records.push(record);
                }
            }
        }

        self.persist()
    }

    pub fn get(&self, ids: &[String]) -> Vec<&Record> {
        ids.iter()
            .filter_map(|id| self.positions.get(id))
            .map(|&pos| &self.storage.records[pos])
            .collect()
    }

    /// Nearest records for each query text, best first.
    pub fn query(&self, query_texts: &[String], n_results: usize) -> Result<QueryResult> {
        let query_embeddings = self
            .embedder
            .embed(query_texts)
            .with_context(|| format!("Failed to embed query for '{}'", self.name()))?;

        let mut result = QueryResult::default();
        for query in query_embeddings {
            let hits = self.nearest(&query, n_results);
            result
                .ids
                .push(hits.iter().map(|&(pos, _)| self.storage.records[pos].id.clone()).collect());
            result.documents.push(
                hits.iter()
                    .map(|&(pos, _)| self.storage.records[pos].document.clone())
                    .collect(),
            );
            result.metadatas.push(
                hits.iter()
                    .map(|&(pos, _)| self.storage.records[pos].metadata.clone())
                    .collect(),
            );
            result
                .distances
                .push(hits.iter().map(|&(_, score)| 1.0 - score).collect());
        }
        Ok(result)
    }

    fn nearest(&self, query: &[f32], n_results: usize) -> Vec<(usize, f32)> {
        let dim = self.storage.embedding_dim;
        if self.storage.records.is_empty() || n_results == 0 || query.len() != dim {
            return Vec::new();
        }
        let query = normalize(query);

        let mut scored: Vec<(usize, f32)> = self
            .storage
            .matrix
            .par_chunks_exact(dim)
            .enumerate()
            .map(|(pos, row)| (pos, dot(row, &query)))
            .collect();

        // NaN scores sink to the bottom.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.retain(|(_, score)| !score.is_nan());
        scored.truncate(n_results);
        scored
    }

    pub fn persist(&self) -> Result<()> {
        let serialized = serde_json::to_string(&self.storage)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write collection file {:?}", self.path))?;
        Ok(())
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scales a vector to unit length; the zero vector stays zero.
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm_sq: f32 = vector.iter().map(|&x| x * x).sum();
    if norm_sq == 0.0 {
        return vec![0.0; vector.len()];
    }
    let inv_norm = 1.0 / norm_sq.sqrt();
    vector.iter().map(|&x| x * inv_norm).collect()
}
