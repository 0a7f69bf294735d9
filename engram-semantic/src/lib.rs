//! Collaborator interfaces for the Engram memory system.
//!
//! The memory core never talks to a vendor directly. Everything external —
//! embeddings, vector similarity search, the entity/relation graph, the chat
//! LLM, and small-blob persistence — is reached through the traits defined
//! here. Each trait ships an in-process reference implementation suitable for
//! local runs and a deterministic mock for tests.

pub mod embedding;
pub mod graph;
pub mod index;
pub mod llm;
pub mod persistence;
pub mod types;

pub use embedding::{EmbeddingProvider, MockEmbedder};
pub use graph::{GraphStore, InMemoryGraph, Triple};
pub use index::{IndexEntry, InMemoryIndex, ScoredMatch, VectorIndex};
pub use llm::{ChatMessage, ChatRole, LlmClient, ScriptedLlm};
pub use persistence::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use types::{cosine_distance, cosine_similarity, normalize, Vector};
