//! Core types shared across the Engram memory system.
//!
//! This crate carries no async machinery: ids, the error taxonomy,
//! configuration, content rendering, and token estimation. Everything here is
//! cheap to construct and safe to use from any execution context.

pub mod config;
pub mod content;
pub mod error;
pub mod id;
pub mod token;

pub use config::{MemoryConfig, TokenBudgets};
pub use content::MemoryContent;
pub use error::{EngramError, Result};
pub use id::{MemoryId, TaskId};
pub use token::TokenCounter;
