//! Working memory: a strictly bounded buffer of raw recent turns.
//!
//! Eviction is oldest-first and runs before every insert, so the store never
//! exceeds its item-count or token ceilings. Evicted items are returned to
//! the caller; the manager forwards them to a compaction consumer rather
//! than summarizing inline, keeping slow LLM work off the request path.
//!
//! The finalize marker is a monotonic sequence watermark, not a physical
//! deletion: `unfinalized` returns the items added since the last
//! `mark_finalized`, and a failed finalize simply leaves the watermark where
//! it was so the same batch is reprocessed next time.

use crate::types::MemoryItem;
use engram_core::error::{EngramError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Default)]
struct Inner {
    items: VecDeque<MemoryItem>,
    total_tokens: usize,
    next_seq: u64,
    /// Items with `seq < watermark` have been finalized.
    finalized_watermark: u64,
}

/// Bounded ordered buffer of recent turns for one (user, agent) pair.
pub struct WorkingMemoryStore {
    max_items: usize,
    max_tokens: usize,
    inner: Mutex<Inner>,
}

impl WorkingMemoryStore {
    /// Create a new working memory store with the given ceilings.
    pub fn new(max_items: usize, max_tokens: usize) -> Self {
        Self {
            max_items,
            max_tokens,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Add a turn, evicting from the head while the store is at its item
    /// ceiling or the new item would push the token total past its ceiling.
    ///
    /// Returns the evicted items, oldest first. After this returns,
    /// `len() <= max_items` and `token_total() <= max_tokens` always hold.
    pub fn add(&self, mut item: MemoryItem) -> Result<Vec<MemoryItem>> {
        if item.token_count > self.max_tokens {
            return Err(EngramError::invalid_input(format!(
                "item of {} tokens exceeds working memory ceiling of {}",
                item.token_count, self.max_tokens
            )));
        }

        let mut inner = self.inner.lock();
        item.seq = inner.next_seq;
        inner.next_seq += 1;

        let mut evicted = Vec::new();
        while !inner.items.is_empty()
            && (inner.items.len() >= self.max_items
                || inner.total_tokens + item.token_count > self.max_tokens)
        {
            // VecDeque front is the oldest item.
            if let Some(old) = inner.items.pop_front() {
                inner.total_tokens -= old.token_count;
                debug!(id = %old.id, seq = old.seq, tokens = old.token_count, "Evicting working memory item");
                evicted.push(old);
            }
        }

        inner.total_tokens += item.token_count;
        inner.items.push_back(item);

        if !evicted.is_empty() {
            debug!(
                evicted = evicted.len(),
                remaining = inner.items.len(),
                tokens = inner.total_tokens,
                "Working memory eviction complete"
            );
        }
        Ok(evicted)
    }

    /// Items added since the last finalize marker, oldest first.
    pub fn unfinalized(&self) -> Vec<MemoryItem> {
        let inner = self.inner.lock();
        inner
            .items
            .iter()
            .filter(|item| item.seq >= inner.finalized_watermark)
            .cloned()
            .collect()
    }

    /// Advance the finalize marker past everything currently stored.
    pub fn mark_finalized(&self) {
        let mut inner = self.inner.lock();
        inner.finalized_watermark = inner.next_seq;
    }

    /// Drop all but the newest `n` items, preserving hot-start continuity
    /// across sessions rather than clearing outright.
    pub fn trim_keeping_last(&self, n: usize) {
        let mut inner = self.inner.lock();
        let before = inner.items.len();
        while inner.items.len() > n {
            if let Some(old) = inner.items.pop_front() {
                inner.total_tokens -= old.token_count;
            }
        }
        if inner.items.len() < before {
            debug!(kept = inner.items.len(), dropped = before - inner.items.len(), "Trimmed working memory");
        }
    }

    /// Snapshot of the current buffer, oldest first.
    pub fn snapshot(&self) -> Vec<MemoryItem> {
        self.inner.lock().items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn token_total(&self) -> usize {
        let inner = self.inner.lock();
        debug_assert_eq!(
            inner.total_tokens,
            inner.items.iter().map(|i| i.token_count).sum::<usize>()
        );
        if inner.total_tokens > self.max_tokens {
            warn!(
                tokens = inner.total_tokens,
                ceiling = self.max_tokens,
                "Working memory over token ceiling"
            );
        }
        inner.total_tokens
    }
}
