//! Semantic memory: persona, core principles, and generalized experiences.
//!
//! Persona and principles are small and hot, so they live in memory and are
//! persisted write-through as one JSON blob per (user, agent). Experiences
//! are append-only embedded documents retrieved by similarity like episodic
//! events.

use crate::types::{
    PersonaDelta, ScoredExperience, SemanticPrinciple, SemanticStats, UserPersona,
};
use engram_core::error::Result;
use engram_core::id::MemoryId;
use engram_semantic::{BlobStore, EmbeddingProvider, IndexEntry, VectorIndex};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct SemanticState {
    persona: UserPersona,
    core_principles: Vec<SemanticPrinciple>,
}

/// Persona, principle, and experience store for one (user, agent) pair.
pub struct SemanticMemoryStore {
    user_id: String,
    agent_id: String,
    embedder: Arc<dyn EmbeddingProvider>,
    experiences: Arc<dyn VectorIndex>,
    blobs: Arc<dyn BlobStore>,
    core_principles_limit: usize,
    state: Mutex<SemanticState>,
    loaded: OnceCell<()>,
}

impl SemanticMemoryStore {
    pub fn new(
        user_id: impl Into<String>,
        agent_id: impl Into<String>,
        embedder: Arc<dyn EmbeddingProvider>,
        experiences: Arc<dyn VectorIndex>,
        blobs: Arc<dyn BlobStore>,
        core_principles_limit: usize,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            agent_id: agent_id.into(),
            embedder,
            experiences,
            blobs,
            core_principles_limit,
            state: Mutex::new(SemanticState::default()),
            loaded: OnceCell::new(),
        }
    }

    fn blob_key(&self) -> String {
        format!("semantic_{}_{}", self.user_id, self.agent_id)
    }

    /// Hydrate persona and principles from the blob store, once.
    async fn ensure_loaded(&self) -> Result<()> {
        self.loaded
            .get_or_try_init(|| async {
                let key = self.blob_key();
                match self.blobs.load(&key).await? {
                    Some(bytes) => match serde_json::from_slice::<SemanticState>(&bytes) {
                        Ok(state) => {
                            debug!(
                                key,
                                principles = state.core_principles.len(),
                                "Loaded semantic state"
                            );
                            *self.state.lock() = state;
                        }
                        Err(e) => {
                            // A corrupt blob should not wedge the store; the
                            // next write replaces it.
                            warn!(key, error = %e, "Discarding unreadable semantic state");
                        }
                    },
                    None => debug!(key, "No persisted semantic state"),
                }
                Ok::<(), engram_core::error::EngramError>(())
            })
            .await?;
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let bytes = {
            let state = self.state.lock();
            serde_json::to_vec(&*state)?
        };
        self.blobs.save(&self.blob_key(), &bytes).await
    }

    /// Merge a persona delta and persist. Empty deltas and deltas that change
    /// nothing skip the write entirely.
    pub async fn update_persona(&self, delta: &PersonaDelta) -> Result<bool> {
        if delta.is_empty() {
            return Ok(false);
        }
        self.ensure_loaded().await?;

        let changed = self.state.lock().persona.merge(delta);
        if changed {
            self.persist().await?;
            info!(user_id = %self.user_id, agent_id = %self.agent_id, "Persona updated");
        }
        Ok(changed)
    }

    /// Add a principle, keeping at most `core_principles_limit` entries
    /// ranked by importance (newest wins ties) and persisting the result.
    pub async fn add_core_principle(&self, content: impl Into<String>, importance: f32) -> Result<()> {
        self.ensure_loaded().await?;

        {
            let mut state = self.state.lock();
            state
                .core_principles
                .push(SemanticPrinciple::new(content, importance));
            // Stable sort keeps insertion order among equal importances, so
            // truncation drops the oldest of the lowest-ranked.
            state
                .core_principles
                .sort_by(|a, b| b.importance.total_cmp(&a.importance));
            state.core_principles.truncate(self.core_principles_limit);
        }
        self.persist().await
    }

    /// Embed and append a generalized experience. Experiences are never
    /// updated or deleted.
    pub async fn add_experience(
        &self,
        content: impl Into<String>,
        category: impl Into<String>,
        importance: f32,
    ) -> Result<MemoryId> {
        let content = content.into();
        let category = category.into();
        let embedding = self.embedder.embed(&content).await?;

        let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
        metadata.insert("category".into(), category.clone().into());
        metadata.insert("importance".into(), serde_json::json!(importance));

        let id = MemoryId::new();
        self.experiences
            .add(vec![IndexEntry {
                id: id.to_string(),
                document: content,
                embedding,
                metadata,
            }])
            .await?;
        debug!(id = %id, category, "Stored experience");
        Ok(id)
    }

    /// Retrieve experiences by similarity, scored like episodic retrieval.
    pub async fn retrieve_experiences(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredExperience>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query).await?;
        let matches = self.experiences.search(&embedding, top_k).await?;

        Ok(matches
            .into_iter()
            .map(|m| ScoredExperience {
                content: m.document,
                category: m
                    .metadata
                    .get("category")
                    .and_then(|v| v.as_str())
                    .unwrap_or("general")
                    .to_string(),
                importance: m
                    .metadata
                    .get("importance")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.5) as f32,
                score: 1.0 - m.distance,
            })
            .collect())
    }

    /// The persona summary, empty until traits have been observed.
    pub async fn persona_summary(&self) -> Result<String> {
        self.ensure_loaded().await?;
        Ok(self.state.lock().persona.summary())
    }

    pub async fn persona(&self) -> Result<UserPersona> {
        self.ensure_loaded().await?;
        Ok(self.state.lock().persona.clone())
    }

    /// Principles rendered as a bulleted list, ranked by importance.
    pub async fn core_principles_text(&self) -> Result<String> {
        self.ensure_loaded().await?;
        let state = self.state.lock();
        Ok(state
            .core_principles
            .iter()
            .map(|p| format!("- {}", p.content))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    pub async fn principle_count(&self) -> Result<usize> {
        self.ensure_loaded().await?;
        Ok(self.state.lock().core_principles.len())
    }

    pub async fn stats(&self) -> Result<SemanticStats> {
        self.ensure_loaded().await?;
        Ok(SemanticStats {
            core_principles: self.state.lock().core_principles.len(),
            experiences: self.experiences.count().await?,
        })
    }
}
