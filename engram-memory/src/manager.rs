//! The memory manager: per-(user, agent) store orchestration.
//!
//! `MemoryManager` owns a lazily created trio of stores per (user, agent)
//! pair and exposes the five public operations: add a turn, assemble a
//! context, finalize a session, query a finalize task, and report store
//! statistics.
//!
//! Finalization is asynchronous. `finalize_session` registers a task,
//! pushes its id onto an unbounded FIFO channel, and returns immediately;
//! one background worker drains the channel so at most one finalize pipeline
//! runs at a time. A second, bounded channel carries items evicted from
//! working memory to a compaction consumer that summarizes them into
//! semantic experiences off the request path.
//!
//! Workers hold only a `Weak` handle to the manager, so dropping the last
//! strong reference closes the channels and both workers exit.

use crate::distill;
use crate::episodic::EpisodicMemoryStore;
use crate::semantic::SemanticMemoryStore;
use crate::tasks::{TaskRegistry, TaskStatusReport};
use crate::types::{
    AddMemoryReceipt, AssembledContext, ContextBundle, ContextTurn, EpisodicEvent, EpisodicStats,
    FinalizeReceipt, MemoryItem, MemoryStatsReport, Role, TokenUsage, WorkingStats,
};
use crate::working::WorkingMemoryStore;
use crate::ConceptClusterer;
use dashmap::DashMap;
use engram_core::config::MemoryConfig;
use engram_core::content::MemoryContent;
use engram_core::error::{EngramError, Result};
use engram_core::id::TaskId;
use engram_core::token::TokenCounter;
use engram_semantic::{
    BlobStore, EmbeddingProvider, GraphStore, InMemoryIndex, LlmClient, MemoryBlobStore,
    VectorIndex,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Evicted items wait in a bounded queue; when it is full, new compaction
/// work is dropped with a warning rather than blocking `add_memory`.
const COMPACTION_QUEUE_DEPTH: usize = 64;

/// Category tag for experiences produced by eviction compaction.
const COMPACTED_CATEGORY: &str = "compressed_turn";

type IndexFactory = Arc<dyn Fn(&str) -> Arc<dyn VectorIndex> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AgentKey {
    user_id: String,
    agent_id: String,
}

/// The three memory tiers for one (user, agent) pair.
struct AgentStores {
    working: WorkingMemoryStore,
    episodic: EpisodicMemoryStore,
    semantic: SemanticMemoryStore,
    /// Shared with `episodic`; the clusterer scans it directly.
    episodic_index: Arc<dyn VectorIndex>,
}

struct CompactionJob {
    user_id: String,
    agent_id: String,
    item: MemoryItem,
}

/// Builder for [`MemoryManager`]. An embedding provider and an LLM client
/// are required; everything else has in-process defaults.
pub struct MemoryManagerBuilder {
    config: MemoryConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    llm: Option<Arc<dyn LlmClient>>,
    graph: Option<Arc<dyn GraphStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    index_factory: Option<IndexFactory>,
}

impl MemoryManagerBuilder {
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Mirror episodic entities and relations into a graph store.
    pub fn graph(mut self, graph: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Blob store for persona and principle persistence. Defaults to an
    /// in-process store.
    pub fn blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Factory creating one vector index per logical collection name.
    /// Defaults to exact-scan in-memory indexes.
    pub fn index_factory(
        mut self,
        factory: impl Fn(&str) -> Arc<dyn VectorIndex> + Send + Sync + 'static,
    ) -> Self {
        self.index_factory = Some(Arc::new(factory));
        self
    }

    /// Validate the configuration, construct the manager, and spawn its
    /// background workers.
    pub fn build(self) -> Result<Arc<MemoryManager>> {
        self.config.validate()?;
        let embedder = self
            .embedder
            .ok_or_else(|| EngramError::config("an embedding provider is required"))?;
        let llm = self
            .llm
            .ok_or_else(|| EngramError::config("an LLM client is required"))?;

        let (finalize_tx, finalize_rx) = mpsc::unbounded_channel();
        let (compaction_tx, compaction_rx) = mpsc::channel(COMPACTION_QUEUE_DEPTH);

        let manager = Arc::new(MemoryManager {
            config: self.config,
            embedder,
            llm,
            graph: self.graph,
            blobs: self.blobs.unwrap_or_else(|| Arc::new(MemoryBlobStore::new())),
            index_factory: self
                .index_factory
                .unwrap_or_else(|| Arc::new(|_name| Arc::new(InMemoryIndex::new()))),
            counter: TokenCounter::new(),
            agents: DashMap::new(),
            registry: TaskRegistry::new(),
            finalize_tx,
            compaction_tx,
        });

        let weak = Arc::downgrade(&manager);
        tokio::spawn(async move {
            MemoryManager::finalize_worker(finalize_rx, weak).await;
        });
        let weak = Arc::downgrade(&manager);
        tokio::spawn(async move {
            MemoryManager::compaction_worker(compaction_rx, weak).await;
        });

        Ok(manager)
    }
}

/// Tiered conversational memory, keyed by (user, agent).
pub struct MemoryManager {
    config: MemoryConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmClient>,
    graph: Option<Arc<dyn GraphStore>>,
    blobs: Arc<dyn BlobStore>,
    index_factory: IndexFactory,
    counter: TokenCounter,
    agents: DashMap<AgentKey, Arc<AgentStores>>,
    registry: TaskRegistry,
    finalize_tx: mpsc::UnboundedSender<TaskId>,
    compaction_tx: mpsc::Sender<CompactionJob>,
}

impl MemoryManager {
    pub fn builder(config: MemoryConfig) -> MemoryManagerBuilder {
        MemoryManagerBuilder {
            config,
            embedder: None,
            llm: None,
            graph: None,
            blobs: None,
            index_factory: None,
        }
    }

    fn stores(&self, user_id: &str, agent_id: &str) -> Arc<AgentStores> {
        let key = AgentKey {
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
        };
        self.agents
            .entry(key)
            .or_insert_with(|| {
                debug!(user_id, agent_id, "Creating memory stores");
                let episodic_index =
                    (self.index_factory)(&format!("episodic_{user_id}_{agent_id}"));
                let experience_index =
                    (self.index_factory)(&format!("experience_{user_id}_{agent_id}"));

                let mut episodic =
                    EpisodicMemoryStore::new(episodic_index.clone(), self.embedder.clone());
                if let Some(graph) = &self.graph {
                    episodic = episodic.with_graph(graph.clone());
                }

                Arc::new(AgentStores {
                    working: WorkingMemoryStore::new(
                        self.config.working_memory_max_items,
                        self.config.working_memory_max_tokens,
                    ),
                    episodic,
                    semantic: SemanticMemoryStore::new(
                        user_id,
                        agent_id,
                        self.embedder.clone(),
                        experience_index,
                        self.blobs.clone(),
                        self.config.core_principles_limit,
                    ),
                    episodic_index,
                })
            })
            .clone()
    }

    fn validate_key(user_id: &str, agent_id: &str) -> Result<()> {
        if user_id.trim().is_empty() {
            return Err(EngramError::invalid_input("user_id must be non-empty"));
        }
        if agent_id.trim().is_empty() {
            return Err(EngramError::invalid_input("agent_id must be non-empty"));
        }
        Ok(())
    }

    /// Store one conversational turn in working memory.
    ///
    /// The turn's role is read from the `role` metadata field when present.
    /// Items evicted to make room are queued for background compaction into
    /// semantic experiences.
    pub async fn add_memory(
        &self,
        user_id: &str,
        agent_id: &str,
        content: MemoryContent,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<AddMemoryReceipt> {
        Self::validate_key(user_id, agent_id)?;
        if content.is_empty() {
            return Err(EngramError::invalid_input("memory content must be non-empty"));
        }

        let role = metadata
            .get("role")
            .and_then(|v| v.as_str())
            .map(Role::parse)
            .unwrap_or(Role::User);
        let token_count = self.counter.count_content(&content);
        let item = MemoryItem::new(role, content, token_count).with_metadata(metadata);
        let memory_id = item.id;

        let stores = self.stores(user_id, agent_id);
        let evicted = stores.working.add(item)?;
        for item in evicted {
            let job = CompactionJob {
                user_id: user_id.to_string(),
                agent_id: agent_id.to_string(),
                item,
            };
            if let Err(e) = self.compaction_tx.try_send(job) {
                warn!(user_id, agent_id, error = %e, "Compaction queue full, dropping evicted item");
            }
        }

        debug!(user_id, agent_id, id = %memory_id, tokens = token_count, "Stored turn");
        Ok(AddMemoryReceipt {
            memory_id,
            stored_in: vec!["working_memory".to_string()],
        })
    }

    /// Assemble a composite context from all three tiers under per-tier
    /// token budgets.
    ///
    /// Working memory is included verbatim. Episodic events and semantic
    /// experiences are packed greedily in rank order, stopping before the
    /// first entry that would exceed its tier's budget.
    pub async fn get_context(
        &self,
        user_id: &str,
        agent_id: &str,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<ContextBundle> {
        Self::validate_key(user_id, agent_id)?;
        if let Some(session_id) = session_id {
            debug!(user_id, agent_id, session_id, "Assembling context");
        }
        let budgets = &self.config.budgets;
        let stores = self.stores(user_id, agent_id);

        let working_items = stores.working.snapshot();
        let working_tokens: usize = working_items.iter().map(|i| i.token_count).sum();
        let working_memory: Vec<ContextTurn> = working_items
            .into_iter()
            .map(|item| ContextTurn {
                role: item.role,
                content: item.content.render(),
                timestamp: item.timestamp,
            })
            .collect();

        let core_principles = stores.semantic.core_principles_text().await?;
        let principle_tokens = self.counter.count(&core_principles);

        let mut episodic_memory = Vec::new();
        let mut episodic_tokens = 0usize;
        if !query.trim().is_empty() {
            let candidates = stores
                .episodic
                .retrieve(query, self.config.episodic_retrieve_top_k)
                .await?;
            for event in candidates {
                let cost = self.counter.count(&event.content);
                if episodic_tokens + cost > budgets.episodic_memory {
                    break;
                }
                episodic_tokens += cost;
                episodic_memory.push(event);
            }
        }

        let user_persona = stores.semantic.persona_summary().await?;
        let persona_tokens = self.counter.count(&user_persona);
        let mut semantic_tokens = persona_tokens;
        let mut semantic_memory = Vec::new();
        if !query.trim().is_empty() {
            let experiences = stores
                .semantic
                .retrieve_experiences(query, self.config.episodic_retrieve_top_k)
                .await?;
            for exp in experiences {
                let cost = self.counter.count(&exp.content);
                if semantic_tokens + cost > budgets.semantic_memory {
                    break;
                }
                semantic_tokens += cost;
                semantic_memory.push(exp);
            }
        }

        let token_usage = TokenUsage {
            working_memory: working_tokens,
            core_principles: principle_tokens,
            episodic_memory: episodic_tokens,
            semantic_memory: semantic_tokens,
            total: working_tokens + principle_tokens + episodic_tokens + semantic_tokens,
        };

        Ok(ContextBundle {
            context: AssembledContext {
                core_principles,
                user_persona,
                working_memory,
                episodic_memory,
                semantic_memory,
            },
            token_usage,
        })
    }

    /// Queue a finalize pipeline for this (user, agent) pair and return a
    /// task id immediately.
    pub fn finalize_session(&self, user_id: &str, agent_id: &str) -> Result<FinalizeReceipt> {
        Self::validate_key(user_id, agent_id)?;
        let task_id = self.registry.register(user_id, agent_id);
        self.finalize_tx
            .send(task_id)
            .map_err(|_| EngramError::memory("finalize worker is not running"))?;
        info!(user_id, agent_id, task_id = %task_id, "Queued finalize task");
        Ok(FinalizeReceipt { task_id })
    }

    /// Look up a finalize task. Completed and failed tasks remain
    /// queryable indefinitely.
    pub fn task_status(&self, task_id: TaskId) -> TaskStatusReport {
        self.registry.get(task_id)
    }

    /// Per-tier counts for one (user, agent) pair.
    pub async fn stats(&self, user_id: &str, agent_id: &str) -> Result<MemoryStatsReport> {
        Self::validate_key(user_id, agent_id)?;
        let stores = self.stores(user_id, agent_id);
        Ok(MemoryStatsReport {
            working_memory: WorkingStats {
                count: stores.working.len(),
                tokens: stores.working.token_total(),
            },
            episodic_memory: EpisodicStats {
                count: stores.episodic.count().await?,
            },
            semantic_memory: stores.semantic.stats().await?,
        })
    }

    async fn finalize_worker(
        mut rx: mpsc::UnboundedReceiver<TaskId>,
        weak: Weak<MemoryManager>,
    ) {
        while let Some(task_id) = rx.recv().await {
            let Some(manager) = weak.upgrade() else { break };
            manager.run_task(task_id).await;
        }
        debug!("Finalize worker stopped");
    }

    async fn compaction_worker(
        mut rx: mpsc::Receiver<CompactionJob>,
        weak: Weak<MemoryManager>,
    ) {
        while let Some(job) = rx.recv().await {
            let Some(manager) = weak.upgrade() else { break };
            let stores = manager.stores(&job.user_id, &job.agent_id);
            let importance = job.item.importance;
            let summary = distill::summarize(manager.llm.as_ref(), &[job.item]).await;
            if let Err(e) = stores
                .semantic
                .add_experience(summary, COMPACTED_CATEGORY, importance)
                .await
            {
                warn!(user_id = %job.user_id, agent_id = %job.agent_id, error = %e, "Failed to compact evicted item");
            }
        }
        debug!("Compaction worker stopped");
    }

    async fn run_task(&self, task_id: TaskId) {
        let TaskStatusReport::Found(task) = self.registry.get(task_id) else {
            warn!(task_id = %task_id, "Dequeued unknown finalize task");
            return;
        };
        self.registry.mark_processing(task_id);
        match self.run_finalize(&task.user_id, &task.agent_id).await {
            Ok(()) => self.registry.mark_completed(task_id),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Finalize task failed");
                self.registry.mark_failed(task_id, e.to_string());
            }
        }
    }

    /// The finalize pipeline: summarize unfinalized turns, extract an event,
    /// an insight, and persona traits, re-cluster episodic memory into core
    /// principles, garbage-collect, and trim working memory.
    ///
    /// The finalize marker only advances after every durable write has
    /// succeeded, so a failed run leaves the batch intact for retry; the
    /// session digest keeps that retry from duplicating episodic events.
    async fn run_finalize(&self, user_id: &str, agent_id: &str) -> Result<()> {
        let stores = self.stores(user_id, agent_id);
        let items = stores.working.unfinalized();
        if items.is_empty() {
            info!(user_id, agent_id, "Nothing to finalize");
            return Ok(());
        }

        let mut hasher = blake3::Hasher::new();
        for item in &items {
            hasher.update(item.id.to_string().as_bytes());
        }
        let digest = hasher.finalize().to_hex().to_string();

        let summary = distill::summarize(self.llm.as_ref(), &items).await;

        if let Some(extracted) = distill::extract_event(self.llm.as_ref(), &summary).await {
            let event_type = if extracted.event_type.is_empty() {
                "session".to_string()
            } else {
                extracted.event_type
            };
            let event_summary = if extracted.summary.is_empty() {
                summary.clone()
            } else {
                extracted.summary
            };
            let event = EpisodicEvent::new(
                event_type,
                MemoryContent::structured(json!({
                    "summary": event_summary,
                    "key_findings": extracted.key_findings,
                })),
            )
            .with_entities(extracted.entities)
            .with_relations(extracted.relations)
            .with_importance(0.7);
            stores.episodic.add_event(event, Some(&digest)).await?;
        }

        if let Some(insight) = distill::extract_insight(self.llm.as_ref(), &summary).await {
            if !insight.subject.is_empty() {
                let event = EpisodicEvent::new(
                    "insight",
                    MemoryContent::structured(json!({
                        "subject": insight.subject,
                        "viewpoint": insight.viewpoint,
                    })),
                )
                .with_importance(insight.confidence.clamp(0.0, 1.0));
                let insight_digest = format!("{digest}-insight");
                stores.episodic.add_event(event, Some(&insight_digest)).await?;
            }
        }

        let transcript = distill::render_turns(&items);
        if let Some(delta) = distill::extract_persona_traits(self.llm.as_ref(), &transcript).await
        {
            stores.semantic.update_persona(&delta).await?;
        }

        let clusterer = ConceptClusterer::new(stores.episodic_index.clone(), self.llm.clone());
        for principle in clusterer
            .cluster_and_abstract(self.config.clustering_k)
            .await?
        {
            stores.semantic.add_core_principle(principle, 1.0).await?;
        }

        stores
            .episodic
            .garbage_collect(self.config.episodic_gc_soft_limit)
            .await?;

        stores.working.mark_finalized();
        stores.working.trim_keeping_last(self.config.trim_keep_last);

        info!(user_id, agent_id, turns = items.len(), "Finalize pipeline complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_semantic::{MockEmbedder, ScriptedLlm};

    fn manager() -> Arc<MemoryManager> {
        MemoryManager::builder(MemoryConfig::default())
            .embedder(Arc::new(MockEmbedder::new(32)))
            .llm(Arc::new(ScriptedLlm::new()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_builder_requires_embedder_and_llm() {
        assert!(MemoryManager::builder(MemoryConfig::default())
            .build()
            .is_err());
        assert!(MemoryManager::builder(MemoryConfig::default())
            .embedder(Arc::new(MockEmbedder::new(8)))
            .build()
            .is_err());
    }

    #[tokio::test]
    async fn test_add_memory_validates_input() {
        let manager = manager();
        assert!(manager
            .add_memory("", "agent", MemoryContent::text("hi"), HashMap::new())
            .await
            .is_err());
        assert!(manager
            .add_memory("alice", "", MemoryContent::text("hi"), HashMap::new())
            .await
            .is_err());
        assert!(manager
            .add_memory("alice", "agent", MemoryContent::text(""), HashMap::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_add_memory_reads_role_from_metadata() {
        let manager = manager();
        let mut metadata = HashMap::new();
        metadata.insert("role".to_string(), serde_json::json!("assistant"));
        manager
            .add_memory("alice", "agent", MemoryContent::text("reply"), metadata)
            .await
            .unwrap();

        let bundle = manager
            .get_context("alice", "agent", "anything", None)
            .await
            .unwrap();
        assert_eq!(bundle.context.working_memory[0].role, Role::Agent);
    }

    #[tokio::test]
    async fn test_pairs_are_isolated() {
        let manager = manager();
        manager
            .add_memory("alice", "a1", MemoryContent::text("alice's turn"), HashMap::new())
            .await
            .unwrap();

        let alice = manager.stats("alice", "a1").await.unwrap();
        let bob = manager.stats("bob", "a1").await.unwrap();
        assert_eq!(alice.working_memory.count, 1);
        assert_eq!(bob.working_memory.count, 0);
    }

    #[tokio::test]
    async fn test_get_context_counts_tokens() {
        let manager = manager();
        manager
            .add_memory("alice", "a1", MemoryContent::text("the market closed higher today"), HashMap::new())
            .await
            .unwrap();

        let bundle = manager
            .get_context("alice", "a1", "market", None)
            .await
            .unwrap();
        assert_eq!(bundle.context.working_memory.len(), 1);
        assert!(bundle.token_usage.working_memory > 0);
        assert_eq!(
            bundle.token_usage.total,
            bundle.token_usage.working_memory
                + bundle.token_usage.core_principles
                + bundle.token_usage.episodic_memory
                + bundle.token_usage.semantic_memory
        );
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let manager = manager();
        let missing = TaskId::new();
        assert!(matches!(
            manager.task_status(missing),
            TaskStatusReport::NotFound { .. }
        ));
    }
}
