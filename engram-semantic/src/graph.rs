//! Entity/relation graph store.
//!
//! Episodic events carry entity mentions and subject-predicate-object
//! triples; when present they are mirrored into a graph so downstream tools
//! can walk relationships. The memory core only ever appends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use engram_core::error::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A subject-predicate-object relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl Triple {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

/// Trait for graph stores.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Record an event node, its entity mentions, and its relation edges.
    async fn add_event(
        &self,
        event_id: &str,
        entities: &[String],
        relations: &[Triple],
        timestamp: DateTime<Utc>,
        weight: f32,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventNode {
    entities: Vec<String>,
    relations: Vec<Triple>,
    timestamp: DateTime<Utc>,
    weight: f32,
}

/// In-process graph store backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryGraph {
    events: DashMap<String, EventNode>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
        }
    }

    /// Number of recorded event nodes.
    pub fn node_count(&self) -> usize {
        self.events.len()
    }

    /// Number of recorded relation edges across all events.
    pub fn edge_count(&self) -> usize {
        self.events.iter().map(|e| e.relations.len()).sum()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    async fn add_event(
        &self,
        event_id: &str,
        entities: &[String],
        relations: &[Triple],
        timestamp: DateTime<Utc>,
        weight: f32,
    ) -> Result<()> {
        debug!(
            event_id,
            entities = entities.len(),
            relations = relations.len(),
            "Recording graph event"
        );
        self.events.insert(
            event_id.to_string(),
            EventNode {
                entities: entities.to_vec(),
                relations: relations.to_vec(),
                timestamp,
                weight,
            },
        );
        Ok(())
    }
}
