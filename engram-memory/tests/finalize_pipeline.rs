//! End-to-end tests for the finalize pipeline and context assembly.

use engram_core::config::{MemoryConfig, TokenBudgets};
use engram_core::content::MemoryContent;
use engram_core::error::{EngramError, Result};
use engram_core::id::TaskId;
use engram_memory::tasks::{TaskStatus, TaskStatusReport};
use engram_memory::{FinalizeTask, MemoryManager};
use engram_semantic::{
    EmbeddingProvider, InMemoryGraph, MockEmbedder, ScriptedLlm, Vector,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn wait_for_terminal(manager: &MemoryManager, task_id: TaskId) -> FinalizeTask {
    for _ in 0..500 {
        if let TaskStatusReport::Found(task) = manager.task_status(task_id) {
            if task.status.is_terminal() {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("finalize task never reached a terminal state");
}

async fn add_turn(manager: &MemoryManager, user: &str, agent: &str, role: &str, text: &str) {
    let mut metadata = HashMap::new();
    metadata.insert("role".to_string(), json!(role));
    manager
        .add_memory(user, agent, MemoryContent::text(text), metadata)
        .await
        .unwrap();
}

fn script_full_session(llm: &ScriptedLlm) {
    llm.push_text("User asked about NVDA earnings and the agent analyzed them.");
    llm.push_structured(json!({
        "event_type": "analysis",
        "summary": "Discussed NVDA earnings",
        "entities": ["NVDA"],
        "relations": [
            { "subject": "NVDA", "predicate": "reported", "object": "earnings" }
        ],
        "key_findings": ["revenue beat"]
    }));
    llm.push_structured(json!({
        "subject": "NVDA",
        "viewpoint": "bullish on data-center growth",
        "confidence": 0.8
    }));
    llm.push_structured(json!({
        "risk_preference": "moderate",
        "interested_sectors": ["semiconductors"]
    }));
}

#[tokio::test]
async fn test_finalize_populates_all_tiers() {
    init_tracing();
    let llm = Arc::new(ScriptedLlm::new());
    script_full_session(&llm);

    let graph = Arc::new(InMemoryGraph::new());
    let manager = MemoryManager::builder(MemoryConfig::default())
        .embedder(Arc::new(MockEmbedder::new(32)))
        .llm(llm)
        .graph(graph.clone())
        .build()
        .unwrap();

    add_turn(&manager, "alice", "analyst-1", "user", "what do you think of NVDA earnings?").await;
    add_turn(&manager, "alice", "analyst-1", "assistant", "revenue beat, data-center is growing").await;

    let receipt = manager.finalize_session("alice", "analyst-1").unwrap();
    let task = wait_for_terminal(&manager, receipt.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.error.is_none());

    // One session event plus one insight event.
    let stats = manager.stats("alice", "analyst-1").await.unwrap();
    assert_eq!(stats.episodic_memory.count, 2);
    // Entities and relations were mirrored into the graph.
    assert_eq!(graph.node_count(), 1);
    assert_eq!(graph.edge_count(), 1);

    let bundle = manager
        .get_context("alice", "analyst-1", "NVDA earnings", None)
        .await
        .unwrap();
    assert!(!bundle.context.episodic_memory.is_empty());
    assert!(bundle.context.user_persona.contains("moderate"));
    assert!(bundle.context.user_persona.contains("semiconductors"));
    // Working memory survives the trim; the session was short.
    assert_eq!(bundle.context.working_memory.len(), 2);
}

#[tokio::test]
async fn test_finalize_with_nothing_pending_is_a_noop() {
    init_tracing();
    let llm = Arc::new(ScriptedLlm::new());
    let manager = MemoryManager::builder(MemoryConfig::default())
        .embedder(Arc::new(MockEmbedder::new(32)))
        .llm(llm.clone())
        .build()
        .unwrap();

    let receipt = manager.finalize_session("alice", "analyst-1").unwrap();
    let task = wait_for_terminal(&manager, receipt.task_id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    // The early exit never touches the model.
    assert_eq!(llm.call_count(), 0);
    let stats = manager.stats("alice", "analyst-1").await.unwrap();
    assert_eq!(stats.episodic_memory.count, 0);
}

#[tokio::test]
async fn test_second_finalize_without_new_turns_writes_nothing() {
    init_tracing();
    let llm = Arc::new(ScriptedLlm::new());
    script_full_session(&llm);

    let manager = MemoryManager::builder(MemoryConfig::default())
        .embedder(Arc::new(MockEmbedder::new(32)))
        .llm(llm.clone())
        .build()
        .unwrap();

    add_turn(&manager, "alice", "analyst-1", "user", "hello there").await;
    let first = manager.finalize_session("alice", "analyst-1").unwrap();
    wait_for_terminal(&manager, first.task_id).await;
    let count_after_first = manager
        .stats("alice", "analyst-1")
        .await
        .unwrap()
        .episodic_memory
        .count;
    let calls_after_first = llm.call_count();

    let second = manager.finalize_session("alice", "analyst-1").unwrap();
    let task = wait_for_terminal(&manager, second.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);

    let stats = manager.stats("alice", "analyst-1").await.unwrap();
    assert_eq!(stats.episodic_memory.count, count_after_first);
    assert_eq!(llm.call_count(), calls_after_first);
}

/// Embedder that fails its first N calls, then delegates.
struct FlakyEmbedder {
    inner: MockEmbedder,
    failures: AtomicUsize,
}

impl FlakyEmbedder {
    fn new(failures: usize) -> Self {
        Self {
            inner: MockEmbedder::new(32),
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vector> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngramError::embedding("transient provider outage"));
        }
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

#[tokio::test]
async fn test_failed_finalize_is_retryable_without_duplicates() {
    init_tracing();
    let llm = Arc::new(ScriptedLlm::new());
    // First run: summary and event extraction succeed, then the episodic
    // write fails at the embedding step.
    llm.push_text("summary of the session");
    llm.push_structured(json!({ "event_type": "analysis", "summary": "first attempt" }));
    // Second run replays the whole pipeline.
    llm.push_text("summary of the session");
    llm.push_structured(json!({ "event_type": "analysis", "summary": "second attempt" }));
    llm.push_structured(json!({ "subject": "", "viewpoint": "" }));
    llm.push_structured(json!({}));

    let manager = MemoryManager::builder(MemoryConfig::default())
        .embedder(Arc::new(FlakyEmbedder::new(1)))
        .llm(llm)
        .build()
        .unwrap();

    add_turn(&manager, "alice", "analyst-1", "user", "please analyze this").await;

    let first = manager.finalize_session("alice", "analyst-1").unwrap();
    let task = wait_for_terminal(&manager, first.task_id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.as_deref().unwrap_or("").contains("transient"));

    // Nothing was written and the batch is still pending.
    let stats = manager.stats("alice", "analyst-1").await.unwrap();
    assert_eq!(stats.episodic_memory.count, 0);

    let second = manager.finalize_session("alice", "analyst-1").unwrap();
    let task = wait_for_terminal(&manager, second.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);

    // Exactly one event: the retry wrote it, and only once. The empty-subject
    // insight was discarded.
    let stats = manager.stats("alice", "analyst-1").await.unwrap();
    assert_eq!(stats.episodic_memory.count, 1);

    // Both task records remain queryable.
    assert!(matches!(
        manager.task_status(first.task_id),
        TaskStatusReport::Found(t) if t.status == TaskStatus::Failed
    ));
}

#[tokio::test]
async fn test_episodic_budget_stops_before_exceeding() {
    init_tracing();
    async fn populated_manager(budgets: TokenBudgets) -> Arc<MemoryManager> {
        let llm = Arc::new(ScriptedLlm::new());
        script_full_session(&llm);
        let config = MemoryConfig {
            budgets,
            ..MemoryConfig::default()
        };
        let manager = MemoryManager::builder(config)
            .embedder(Arc::new(MockEmbedder::new(32)))
            .llm(llm)
            .build()
            .unwrap();

        add_turn(&manager, "alice", "analyst-1", "user", "tell me about NVDA").await;
        let receipt = manager.finalize_session("alice", "analyst-1").unwrap();
        wait_for_terminal(&manager, receipt.task_id).await;
        manager
    }

    let generous = populated_manager(TokenBudgets::default())
        .await
        .get_context("alice", "analyst-1", "NVDA", None)
        .await
        .unwrap();
    assert!(!generous.context.episodic_memory.is_empty());

    let starved = populated_manager(TokenBudgets {
        episodic_memory: 0,
        semantic_memory: 0,
        ..TokenBudgets::default()
    })
    .await
    .get_context("alice", "analyst-1", "NVDA", None)
    .await
    .unwrap();
    assert!(starved.context.episodic_memory.is_empty());
    assert_eq!(starved.token_usage.episodic_memory, 0);
    // Experiences are budget-gated too; the persona is always included and
    // only counted.
    assert!(starved.context.semantic_memory.is_empty());
    assert!(starved.context.user_persona.contains("moderate"));
}

#[tokio::test]
async fn test_context_for_brand_new_pair_is_empty() {
    init_tracing();
    let manager = MemoryManager::builder(MemoryConfig::default())
        .embedder(Arc::new(MockEmbedder::new(32)))
        .llm(Arc::new(ScriptedLlm::new()))
        .build()
        .unwrap();

    let bundle = manager
        .get_context("nobody", "agent-0", "anything at all", None)
        .await
        .unwrap();

    assert!(bundle.context.working_memory.is_empty());
    assert!(bundle.context.episodic_memory.is_empty());
    assert!(bundle.context.semantic_memory.is_empty());
    assert!(bundle.context.core_principles.is_empty());
    assert!(bundle.context.user_persona.is_empty());
    assert_eq!(bundle.token_usage.total, 0);
}

#[tokio::test]
async fn test_finalize_tasks_run_in_submission_order() {
    init_tracing();
    let llm = Arc::new(ScriptedLlm::new());
    // Two short sessions for two different pairs; replies feed both runs
    // in order because the worker is strictly FIFO.
    for _ in 0..2 {
        llm.push_text("a session summary");
        llm.push_structured(json!({ "event_type": "chat", "summary": "s" }));
        llm.push_structured(json!({ "subject": "", "viewpoint": "" }));
        llm.push_structured(json!({}));
    }

    let manager = MemoryManager::builder(MemoryConfig::default())
        .embedder(Arc::new(MockEmbedder::new(32)))
        .llm(llm)
        .build()
        .unwrap();

    add_turn(&manager, "alice", "a1", "user", "first session").await;
    add_turn(&manager, "bob", "a1", "user", "second session").await;

    let first = manager.finalize_session("alice", "a1").unwrap();
    let second = manager.finalize_session("bob", "a1").unwrap();

    let t1 = wait_for_terminal(&manager, first.task_id).await;
    let t2 = wait_for_terminal(&manager, second.task_id).await;
    assert_eq!(t1.status, TaskStatus::Completed);
    assert_eq!(t2.status, TaskStatus::Completed);
    // FIFO: the first task finished no later than the second started.
    assert!(t1.end_time.unwrap() <= t2.start_time.unwrap());

    assert_eq!(
        manager.stats("alice", "a1").await.unwrap().episodic_memory.count,
        1
    );
    assert_eq!(
        manager.stats("bob", "a1").await.unwrap().episodic_memory.count,
        1
    );
}

#[tokio::test]
async fn test_evicted_turns_become_experiences() {
    init_tracing();
    let llm = Arc::new(ScriptedLlm::new());
    llm.push_text("compacted: the user greeted the agent");

    let config = MemoryConfig {
        working_memory_max_items: 1,
        ..MemoryConfig::default()
    };
    let manager = MemoryManager::builder(config)
        .embedder(Arc::new(MockEmbedder::new(32)))
        .llm(llm)
        .build()
        .unwrap();

    add_turn(&manager, "alice", "a1", "user", "hello").await;
    // Second add evicts the first turn into the compaction queue.
    add_turn(&manager, "alice", "a1", "user", "what about NVDA?").await;

    // The compaction consumer runs in the background.
    let mut experiences = 0;
    for _ in 0..500 {
        experiences = manager
            .stats("alice", "a1")
            .await
            .unwrap()
            .semantic_memory
            .experiences;
        if experiences > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(experiences, 1);

    let bundle = manager
        .get_context("alice", "a1", "greeting", None)
        .await
        .unwrap();
    assert!(bundle
        .context
        .semantic_memory
        .iter()
        .any(|e| e.category == "compressed_turn"));
}
