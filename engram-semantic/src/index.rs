//! Vector similarity index.
//!
//! The memory core only needs add/search/get_all/delete/count over embedded
//! documents with small metadata maps. `InMemoryIndex` is an exact-scan
//! cosine index; a production deployment would put an HNSW or remote vector
//! store behind the same trait.

use crate::types::{cosine_distance, Vector};
use async_trait::async_trait;
use dashmap::DashMap;
use engram_core::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// A document stored in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub document: String,
    pub embedding: Vector,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A ranked search hit.
#[derive(Debug, Clone)]
pub struct ScoredMatch {
    pub id: String,
    pub document: String,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Cosine distance to the query (0 = identical).
    pub distance: f32,
}

/// Trait for vector indexes.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert documents with their embeddings and metadata.
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Return the `n` nearest neighbours, ascending by distance.
    async fn search(&self, query: &[f32], n: usize) -> Result<Vec<ScoredMatch>>;

    /// Return all stored entries, optionally capped.
    async fn get_all(&self, limit: Option<usize>) -> Result<Vec<IndexEntry>>;

    /// Remove documents by id. Unknown ids are ignored.
    async fn delete(&self, ids: &[String]) -> Result<()>;

    /// Number of stored documents.
    async fn count(&self) -> Result<usize>;
}

/// Exact-scan cosine index over a concurrent map.
#[derive(Default)]
pub struct InMemoryIndex {
    entries: DashMap<String, IndexEntry>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<()> {
        for entry in entries {
            debug!(id = %entry.id, "Indexing document");
            self.entries.insert(entry.id.clone(), entry);
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], n: usize) -> Result<Vec<ScoredMatch>> {
        let mut matches: Vec<ScoredMatch> = self
            .entries
            .iter()
            .map(|entry| ScoredMatch {
                id: entry.id.clone(),
                document: entry.document.clone(),
                metadata: entry.metadata.clone(),
                distance: cosine_distance(query, &entry.embedding),
            })
            .collect();

        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        matches.truncate(n);
        Ok(matches)
    }

    async fn get_all(&self, limit: Option<usize>) -> Result<Vec<IndexEntry>> {
        let mut all: Vec<IndexEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        if let Some(limit) = limit {
            all.truncate(limit);
        }
        Ok(all)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            self.entries.remove(id);
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.len())
    }
}
