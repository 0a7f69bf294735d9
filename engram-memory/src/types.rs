//! Memory system types for the three tiers and the context-assembly output.

use chrono::{DateTime, Utc};
use engram_core::content::MemoryContent;
use engram_core::id::MemoryId;
use engram_semantic::Triple;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// ============================================================================
// Working Memory Types
// ============================================================================

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    System,
}

impl Role {
    /// Lenient parse used for the `role` metadata field; unknown values
    /// default to `User`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "agent" | "assistant" => Self::Agent,
            "system" => Self::System,
            _ => Self::User,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Agent => write!(f, "agent"),
            Role::System => write!(f, "system"),
        }
    }
}

/// A single turn held in working memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: MemoryId,
    /// Store-assigned monotonic sequence number; 0 until added.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: MemoryContent,
    pub token_count: usize,
    pub metadata: HashMap<String, serde_json::Value>,
    pub importance: f32,
}

impl MemoryItem {
    pub fn new(role: Role, content: MemoryContent, token_count: usize) -> Self {
        Self {
            id: MemoryId::new(),
            seq: 0,
            timestamp: Utc::now(),
            role,
            content,
            token_count,
            metadata: HashMap::new(),
            importance: 0.5,
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance;
        self
    }
}

// ============================================================================
// Episodic Memory Types
// ============================================================================

/// A structured event distilled from a finalized session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicEvent {
    pub id: MemoryId,
    pub event_type: String,
    pub content: MemoryContent,
    pub entities: BTreeSet<String>,
    pub relations: Vec<Triple>,
    pub importance: f32,
    pub timestamp: DateTime<Utc>,
}

impl EpisodicEvent {
    pub fn new(event_type: impl Into<String>, content: MemoryContent) -> Self {
        Self {
            id: MemoryId::new(),
            event_type: event_type.into(),
            content,
            entities: BTreeSet::new(),
            relations: Vec::new(),
            importance: 0.5,
            timestamp: Utc::now(),
        }
    }

    pub fn with_entities(mut self, entities: impl IntoIterator<Item = String>) -> Self {
        self.entities = entities.into_iter().collect();
        self
    }

    pub fn with_relations(mut self, relations: Vec<Triple>) -> Self {
        self.relations = relations;
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance;
        self
    }
}

/// An episodic retrieval hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredEvent {
    pub id: String,
    pub event_type: String,
    pub content: String,
    pub importance: f32,
    pub timestamp: DateTime<Utc>,
    /// `1 - cosine distance`; higher is closer.
    pub score: f32,
}

// ============================================================================
// Semantic Memory Types
// ============================================================================

/// A retained one-sentence abstraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticPrinciple {
    pub content: String,
    pub importance: f32,
    pub timestamp: DateTime<Utc>,
}

impl SemanticPrinciple {
    pub fn new(content: impl Into<String>, importance: f32) -> Self {
        Self {
            content: content.into(),
            importance,
            timestamp: Utc::now(),
        }
    }
}

/// Incrementally merged user persona.
///
/// Scalar fields are last-write-wins; set fields merge by union, so applying
/// the same delta twice is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPersona {
    pub risk_preference: Option<String>,
    pub investment_style: BTreeSet<String>,
    pub interested_sectors: BTreeSet<String>,
    pub analysis_habits: BTreeSet<String>,
    pub observed_traits: BTreeSet<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl UserPersona {
    /// Apply a delta; returns true when anything changed.
    pub fn merge(&mut self, delta: &PersonaDelta) -> bool {
        let mut changed = false;

        if let Some(risk) = &delta.risk_preference {
            if self.risk_preference.as_deref() != Some(risk.as_str()) {
                self.risk_preference = Some(risk.clone());
                changed = true;
            }
        }
        for value in &delta.investment_style {
            changed |= self.investment_style.insert(value.clone());
        }
        for value in &delta.interested_sectors {
            changed |= self.interested_sectors.insert(value.clone());
        }
        for value in &delta.analysis_habits {
            changed |= self.analysis_habits.insert(value.clone());
        }
        for value in &delta.observed_traits {
            changed |= self.observed_traits.insert(value.clone());
        }

        if changed {
            self.last_updated = Some(Utc::now());
        }
        changed
    }

    /// Human-readable summary injected into assembled contexts. Empty when
    /// nothing has been observed yet.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        if let Some(risk) = &self.risk_preference {
            lines.push(format!("Risk preference: {risk}"));
        }
        if !self.investment_style.is_empty() {
            lines.push(format!(
                "Investment style: {}",
                join_set(&self.investment_style)
            ));
        }
        if !self.interested_sectors.is_empty() {
            lines.push(format!(
                "Interested sectors: {}",
                join_set(&self.interested_sectors)
            ));
        }
        if !self.analysis_habits.is_empty() {
            lines.push(format!(
                "Analysis habits: {}",
                join_set(&self.analysis_habits)
            ));
        }
        if !self.observed_traits.is_empty() {
            lines.push(format!(
                "Observed traits: {}",
                join_set(&self.observed_traits)
            ));
        }
        lines.join("\n")
    }
}

fn join_set(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// Partial persona update produced by trait extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonaDelta {
    #[serde(default)]
    pub risk_preference: Option<String>,
    #[serde(default)]
    pub investment_style: Vec<String>,
    #[serde(default)]
    pub interested_sectors: Vec<String>,
    #[serde(default)]
    pub analysis_habits: Vec<String>,
    #[serde(default)]
    pub observed_traits: Vec<String>,
}

impl PersonaDelta {
    pub fn is_empty(&self) -> bool {
        self.risk_preference.is_none()
            && self.investment_style.is_empty()
            && self.interested_sectors.is_empty()
            && self.analysis_habits.is_empty()
            && self.observed_traits.is_empty()
    }
}

/// A generalized, append-only experience statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experience {
    pub content: String,
    pub category: String,
    pub importance: f32,
}

/// An experience retrieval hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredExperience {
    pub content: String,
    pub category: String,
    pub importance: f32,
    pub score: f32,
}

// ============================================================================
// Distillation Types
// ============================================================================

/// Structured event extracted from a session summary.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExtractedEvent {
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub relations: Vec<Triple>,
    #[serde(default)]
    pub key_findings: Vec<String>,
}

/// Domain-specific viewpoint extracted from a session summary. Only written
/// to episodic memory when `subject` is non-empty.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Insight {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub viewpoint: String,
    #[serde(default)]
    pub confidence: f32,
}

// ============================================================================
// Context Assembly Types
// ============================================================================

/// A working-memory turn as surfaced in an assembled context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// The composite three-tier context returned by `get_context`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembledContext {
    pub core_principles: String,
    pub user_persona: String,
    pub working_memory: Vec<ContextTurn>,
    pub episodic_memory: Vec<ScoredEvent>,
    pub semantic_memory: Vec<ScoredExperience>,
}

/// Token accounting for one assembled context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub working_memory: usize,
    pub core_principles: usize,
    pub episodic_memory: usize,
    pub semantic_memory: usize,
    pub total: usize,
}

/// Context plus its token accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub context: AssembledContext,
    pub token_usage: TokenUsage,
}

// ============================================================================
// Receipts & Statistics
// ============================================================================

/// Acknowledgement returned by `add_memory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMemoryReceipt {
    pub memory_id: MemoryId,
    pub stored_in: Vec<String>,
}

/// Acknowledgement returned by `finalize_session`; the pipeline itself runs
/// in the background.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeReceipt {
    pub task_id: engram_core::id::TaskId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingStats {
    pub count: usize,
    pub tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicStats {
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticStats {
    pub core_principles: usize,
    pub experiences: usize,
}

/// Per-(user, agent) store statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStatsReport {
    pub working_memory: WorkingStats,
    pub episodic_memory: EpisodicStats,
    pub semantic_memory: SemanticStats,
}
