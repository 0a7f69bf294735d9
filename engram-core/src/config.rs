//! Configuration for the memory system.

use crate::error::{EngramError, Result};
use serde::{Deserialize, Serialize};

/// Per-tier token budgets used during context assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudgets {
    /// Budget for the always-included core principles text
    pub core_principles: usize,

    /// Budget for the working-memory tier
    pub working_memory: usize,

    /// Budget for retrieved episodic events
    pub episodic_memory: usize,

    /// Budget for persona summary plus retrieved experiences
    pub semantic_memory: usize,
}

impl TokenBudgets {
    /// Sum of all tier budgets.
    pub fn total(&self) -> usize {
        self.core_principles + self.working_memory + self.episodic_memory + self.semantic_memory
    }
}

impl Default for TokenBudgets {
    fn default() -> Self {
        Self {
            core_principles: 400,
            working_memory: 2000,
            episodic_memory: 1200,
            semantic_memory: 800,
        }
    }
}

/// Main configuration for the tiered memory manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of items held in working memory
    pub working_memory_max_items: usize,

    /// Maximum total token cost of working memory
    pub working_memory_max_tokens: usize,

    /// Maximum number of retained core principles
    pub core_principles_limit: usize,

    /// Number of clusters used when abstracting episodic memory
    pub clustering_k: usize,

    /// Episodic event count above which garbage collection runs
    pub episodic_gc_soft_limit: usize,

    /// How many episodic candidates to rank during context assembly
    pub episodic_retrieve_top_k: usize,

    /// How many recent items survive the post-finalize trim
    pub trim_keep_last: usize,

    /// Per-tier token budgets
    pub budgets: TokenBudgets,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working_memory_max_items: 20,
            working_memory_max_tokens: 4000,
            core_principles_limit: 10,
            clustering_k: 5,
            episodic_gc_soft_limit: 1000,
            episodic_retrieve_top_k: 10,
            trim_keep_last: 5,
            budgets: TokenBudgets::default(),
        }
    }
}

impl MemoryConfig {
    /// Reject configurations that would make the working-memory invariants
    /// unsatisfiable.
    pub fn validate(&self) -> Result<()> {
        if self.working_memory_max_items == 0 {
            return Err(EngramError::config(
                "working_memory_max_items must be at least 1",
            ));
        }
        if self.working_memory_max_tokens == 0 {
            return Err(EngramError::config(
                "working_memory_max_tokens must be at least 1",
            ));
        }
        if self.core_principles_limit == 0 {
            return Err(EngramError::config(
                "core_principles_limit must be at least 1",
            ));
        }
        if self.clustering_k == 0 {
            return Err(EngramError::config("clustering_k must be at least 1"));
        }
        Ok(())
    }
}
