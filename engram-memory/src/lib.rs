//! Tiered conversational memory for LLM agents.
//!
//! This crate implements a per-(user, agent) memory manager with three
//! tiers:
//!
//! 1. **Working memory**: a strictly bounded buffer of raw recent turns,
//!    evicted oldest-first under item-count and token ceilings.
//! 2. **Episodic memory**: structured events distilled from finalized
//!    sessions, retrieved by embedding similarity and pruned by a soft-limit
//!    garbage collector.
//! 3. **Semantic memory**: a bounded ranked list of core principles, an
//!    incrementally merged user persona, and an append-only experience
//!    collection.
//!
//! Reads assemble a composite context from all three tiers under per-tier
//! token budgets. Writes flow forward through the asynchronous finalize
//! pipeline: compression, event/insight/persona extraction, concept
//! clustering, garbage collection, and a working-memory trim — driven by a
//! single FIFO background worker so at most one finalize runs at a time.
//!
//! # Usage
//!
//! ```rust,no_run
//! use engram_core::{MemoryConfig, MemoryContent};
//! use engram_memory::MemoryManager;
//! use engram_semantic::{MockEmbedder, ScriptedLlm};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # async fn example() -> engram_core::Result<()> {
//! let manager = MemoryManager::builder(MemoryConfig::default())
//!     .embedder(Arc::new(MockEmbedder::default()))
//!     .llm(Arc::new(ScriptedLlm::new()))
//!     .build()?;
//!
//! manager
//!     .add_memory("alice", "analyst-1", MemoryContent::text("hello"), HashMap::new())
//!     .await?;
//! let bundle = manager.get_context("alice", "analyst-1", "greeting", None).await?;
//! println!("working tier holds {} turns", bundle.context.working_memory.len());
//!
//! let receipt = manager.finalize_session("alice", "analyst-1")?;
//! let status = manager.task_status(receipt.task_id);
//! println!("{status:?}");
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod distill;
pub mod episodic;
pub mod manager;
pub mod semantic;
pub mod tasks;
pub mod types;
pub mod working;

pub use cluster::ConceptClusterer;
pub use episodic::EpisodicMemoryStore;
pub use manager::{MemoryManager, MemoryManagerBuilder};
pub use semantic::SemanticMemoryStore;
pub use tasks::{FinalizeTask, TaskRegistry, TaskStatus, TaskStatusReport};
pub use working::WorkingMemoryStore;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cluster::ConceptClusterer;
    pub use crate::episodic::EpisodicMemoryStore;
    pub use crate::manager::{MemoryManager, MemoryManagerBuilder};
    pub use crate::semantic::SemanticMemoryStore;
    pub use crate::tasks::{FinalizeTask, TaskRegistry, TaskStatus, TaskStatusReport};
    pub use crate::types::*;
    pub use crate::working::WorkingMemoryStore;
}
