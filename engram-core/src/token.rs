//! Token cost estimation.
//!
//! A pure, model-agnostic estimator. Real tokenizers vary by vendor; the
//! budgets in this system only need a consistent, slightly conservative
//! estimate, so we use the common chars/4 heuristic with a word-count floor.

use crate::content::MemoryContent;

/// Stateless token cost estimator.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounter;

impl TokenCounter {
    pub fn new() -> Self {
        Self
    }

    /// Estimate the token cost of a text.
    ///
    /// Returns 0 only for empty/whitespace-only input.
    pub fn count(&self, text: &str) -> usize {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return 0;
        }
        let chars = trimmed.chars().count();
        let words = trimmed.split_whitespace().count();
        (chars.div_ceil(4)).max(words).max(1)
    }

    /// Estimate the token cost of memory content via its canonical rendering.
    pub fn count_content(&self, content: &MemoryContent) -> usize {
        self.count(&content.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_is_zero() {
        let counter = TokenCounter::new();
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("   "), 0);
    }

    #[test]
    fn test_short_text_is_at_least_one() {
        let counter = TokenCounter::new();
        assert_eq!(counter.count("a"), 1);
    }

    #[test]
    fn test_scales_with_length() {
        let counter = TokenCounter::new();
        let short = counter.count("the market closed higher");
        let long = counter.count(&"the market closed higher today ".repeat(20));
        assert!(long > short * 10);
    }

    #[test]
    fn test_word_floor() {
        // Many short words: word count dominates the chars/4 estimate.
        let counter = TokenCounter::new();
        assert!(counter.count("a b c d e f g h") >= 8);
    }

    #[test]
    fn test_count_content() {
        let counter = TokenCounter::new();
        let text = MemoryContent::text("hello world");
        let structured = MemoryContent::structured(json!({ "k": "hello world" }));
        assert!(counter.count_content(&structured) >= counter.count_content(&text));
    }
}
