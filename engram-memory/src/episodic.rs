//! Episodic memory: embedded events distilled from finalized sessions.
//!
//! Events are written with an optional source digest so a retried finalize
//! does not duplicate the same session's event. Retrieval over-fetches from
//! the index (twice the requested count) before re-ranking by similarity
//! score, and garbage collection prunes the oldest tenth once a soft limit
//! is crossed.

use crate::types::{EpisodicEvent, ScoredEvent};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use engram_core::error::Result;
use engram_core::id::MemoryId;
use engram_semantic::{EmbeddingProvider, GraphStore, IndexEntry, VectorIndex};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Embedded event store for one (user, agent) pair.
pub struct EpisodicMemoryStore {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    graph: Option<Arc<dyn GraphStore>>,
    /// Digests of sessions whose event has already been written. Populated
    /// only after a fully successful write, so a failed attempt stays
    /// retryable.
    seen_digests: DashSet<String>,
}

impl EpisodicMemoryStore {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            index,
            embedder,
            graph: None,
            seen_digests: DashSet::new(),
        }
    }

    /// Mirror entity mentions and relations into a graph store.
    pub fn with_graph(mut self, graph: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Embed and index an event.
    ///
    /// When `source_digest` is given and an event with the same digest has
    /// already been stored, the write is skipped and `Ok(None)` is returned.
    pub async fn add_event(
        &self,
        event: EpisodicEvent,
        source_digest: Option<&str>,
    ) -> Result<Option<MemoryId>> {
        if let Some(digest) = source_digest {
            if self.seen_digests.contains(digest) {
                debug!(digest, event_type = %event.event_type, "Skipping already-stored event");
                return Ok(None);
            }
        }

        let document = event.content.render();
        let embedding = self.embedder.embed(&document).await?;

        let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
        metadata.insert("event_type".into(), event.event_type.clone().into());
        metadata.insert("timestamp".into(), event.timestamp.to_rfc3339().into());
        metadata.insert("importance".into(), serde_json::json!(event.importance));
        if let Some(digest) = source_digest {
            metadata.insert("source_digest".into(), digest.into());
        }

        let id = event.id;
        self.index
            .add(vec![IndexEntry {
                id: id.to_string(),
                document,
                embedding,
                metadata,
            }])
            .await?;

        if let Some(graph) = &self.graph {
            if !event.entities.is_empty() || !event.relations.is_empty() {
                let entities: Vec<String> = event.entities.iter().cloned().collect();
                graph
                    .add_event(
                        &id.to_string(),
                        &entities,
                        &event.relations,
                        event.timestamp,
                        event.importance,
                    )
                    .await?;
            }
        }

        if let Some(digest) = source_digest {
            self.seen_digests.insert(digest.to_string());
        }

        info!(id = %id, event_type = %event.event_type, "Stored episodic event");
        Ok(Some(id))
    }

    /// Retrieve the `top_k` events most similar to the query, scored by
    /// `1 - cosine distance` and sorted descending.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredEvent>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query).await?;
        // Over-fetch so re-ranking has slack beyond index ordering.
        let matches = self.index.search(&embedding, top_k * 2).await?;

        let mut events: Vec<ScoredEvent> = matches
            .into_iter()
            .map(|m| {
                let event_type = m
                    .metadata
                    .get("event_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let importance = m
                    .metadata
                    .get("importance")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.5) as f32;
                let timestamp = m
                    .metadata
                    .get("timestamp")
                    .and_then(|v| v.as_str())
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                ScoredEvent {
                    id: m.id,
                    event_type,
                    content: m.document,
                    importance,
                    timestamp,
                    score: 1.0 - m.distance,
                }
            })
            .collect();

        events.sort_by(|a, b| b.score.total_cmp(&a.score));
        events.truncate(top_k);
        Ok(events)
    }

    /// Delete the oldest tenth of stored events once the count exceeds
    /// `soft_limit`. Returns the number of deleted events.
    pub async fn garbage_collect(&self, soft_limit: usize) -> Result<usize> {
        let count = self.index.count().await?;
        if count <= soft_limit {
            return Ok(0);
        }

        let all = self.index.get_all(None).await?;
        // Compute each sort key exactly once so the ordering is consistent
        // even when the missing-timestamp fallback uses the current time.
        let mut ordered: Vec<(DateTime<Utc>, String)> = all
            .into_iter()
            .map(|entry| {
                let timestamp = entry
                    .metadata
                    .get("timestamp")
                    .and_then(|v| v.as_str())
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|| {
                        warn!(id = %entry.id, "Event missing timestamp metadata, treating as newest");
                        Utc::now()
                    });
                (timestamp, entry.id)
            })
            .collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0));

        let victims: Vec<String> = ordered
            .into_iter()
            .take((count / 10).max(1))
            .map(|(_, id)| id)
            .collect();
        self.index.delete(&victims).await?;

        info!(
            deleted = victims.len(),
            remaining = count - victims.len(),
            soft_limit,
            "Episodic garbage collection"
        );
        Ok(victims.len())
    }

    pub async fn count(&self) -> Result<usize> {
        self.index.count().await
    }
}
