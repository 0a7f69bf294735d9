//! LLM distillation: summarization and structured extraction.
//!
//! Each transform tolerates model failure. Summarization falls back to a
//! fixed placeholder so the pipeline keeps its shape; the extractors return
//! `None` and the caller simply writes nothing for that facet. A failure in
//! one transform never aborts the finalize pipeline.

use crate::types::{ExtractedEvent, Insight, MemoryItem, PersonaDelta};
use engram_semantic::{ChatMessage, LlmClient};
use serde_json::json;
use tracing::warn;

/// Summary used when the model call fails or returns nothing.
pub const SUMMARY_FALLBACK: &str = "Session content could not be summarized.";

/// Render turns as a plain transcript, one `role: content` line per turn.
pub fn render_turns(items: &[MemoryItem]) -> String {
    items
        .iter()
        .map(|item| format!("{}: {}", item.role, item.content.render()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Compress a batch of turns into a short summary. Never fails; a model
/// error or empty reply yields [`SUMMARY_FALLBACK`].
pub async fn summarize(llm: &dyn LlmClient, items: &[MemoryItem]) -> String {
    let transcript = render_turns(items);
    let messages = [
        ChatMessage::system(
            "Summarize the following conversation in a few sentences. \
             Preserve concrete facts, decisions, and named entities.",
        ),
        ChatMessage::user(transcript),
    ];

    match llm.invoke(&messages).await {
        Ok(summary) if !summary.trim().is_empty() => summary,
        Ok(_) => {
            warn!("Summarization returned empty text, using fallback");
            SUMMARY_FALLBACK.to_string()
        }
        Err(e) => {
            warn!(error = %e, "Summarization failed, using fallback");
            SUMMARY_FALLBACK.to_string()
        }
    }
}

/// Extract a structured event from a session summary.
pub async fn extract_event(llm: &dyn LlmClient, summary: &str) -> Option<ExtractedEvent> {
    let schema = json!({
        "type": "object",
        "properties": {
            "event_type": { "type": "string" },
            "summary": { "type": "string" },
            "entities": { "type": "array", "items": { "type": "string" } },
            "relations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "subject": { "type": "string" },
                        "predicate": { "type": "string" },
                        "object": { "type": "string" }
                    },
                    "required": ["subject", "predicate", "object"]
                }
            },
            "key_findings": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["event_type", "summary"]
    });
    let messages = [
        ChatMessage::system(
            "Extract the main event from this session summary: its type, a \
             one-line summary, named entities, subject-predicate-object \
             relations, and key findings.",
        ),
        ChatMessage::user(summary.to_string()),
    ];

    structured::<ExtractedEvent>(llm, &messages, &schema, "event").await
}

/// Extract a domain viewpoint from a session summary.
pub async fn extract_insight(llm: &dyn LlmClient, summary: &str) -> Option<Insight> {
    let schema = json!({
        "type": "object",
        "properties": {
            "subject": { "type": "string" },
            "viewpoint": { "type": "string" },
            "confidence": { "type": "number" }
        },
        "required": ["subject", "viewpoint"]
    });
    let messages = [
        ChatMessage::system(
            "If this summary expresses a viewpoint about some subject, \
             extract the subject, the viewpoint, and a confidence in [0, 1]. \
             Leave the subject empty when there is no clear viewpoint.",
        ),
        ChatMessage::user(summary.to_string()),
    ];

    structured::<Insight>(llm, &messages, &schema, "insight").await
}

/// Extract persona traits from a raw transcript.
pub async fn extract_persona_traits(llm: &dyn LlmClient, transcript: &str) -> Option<PersonaDelta> {
    let schema = json!({
        "type": "object",
        "properties": {
            "risk_preference": { "type": ["string", "null"] },
            "investment_style": { "type": "array", "items": { "type": "string" } },
            "interested_sectors": { "type": "array", "items": { "type": "string" } },
            "analysis_habits": { "type": "array", "items": { "type": "string" } },
            "observed_traits": { "type": "array", "items": { "type": "string" } }
        }
    });
    let messages = [
        ChatMessage::system(
            "Observe the user's traits in this transcript: risk preference, \
             investment style, interested sectors, analysis habits, and any \
             other notable traits. Omit fields you cannot support.",
        ),
        ChatMessage::user(transcript.to_string()),
    ];

    structured::<PersonaDelta>(llm, &messages, &schema, "persona traits").await
}

async fn structured<T: serde::de::DeserializeOwned>(
    llm: &dyn LlmClient,
    messages: &[ChatMessage],
    schema: &serde_json::Value,
    what: &str,
) -> Option<T> {
    match llm.structured_invoke(messages, schema).await {
        Ok(value) => match serde_json::from_value::<T>(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(what, error = %e, "Extraction reply did not match expected shape");
                None
            }
        },
        Err(e) => {
            warn!(what, error = %e, "Extraction call failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use engram_core::content::MemoryContent;
    use engram_semantic::ScriptedLlm;
    use serde_json::json;

    fn turn(role: Role, text: &str) -> MemoryItem {
        MemoryItem::new(role, MemoryContent::text(text), 10)
    }

    #[test]
    fn test_render_turns() {
        let items = vec![turn(Role::User, "hello"), turn(Role::Agent, "hi there")];
        assert_eq!(render_turns(&items), "user: hello\nagent: hi there");
    }

    #[tokio::test]
    async fn test_summarize_happy_path() {
        let llm = ScriptedLlm::new();
        llm.push_text("User asked about NVDA earnings.");

        let summary = summarize(&llm, &[turn(Role::User, "what about NVDA?")]).await;
        assert_eq!(summary, "User asked about NVDA earnings.");
    }

    #[tokio::test]
    async fn test_summarize_falls_back_on_failure() {
        let llm = ScriptedLlm::new();
        llm.push_failure("rate limited");
        let summary = summarize(&llm, &[turn(Role::User, "hi")]).await;
        assert_eq!(summary, SUMMARY_FALLBACK);
    }

    #[tokio::test]
    async fn test_summarize_falls_back_on_empty_reply() {
        let llm = ScriptedLlm::new();
        llm.push_text("   ");
        let summary = summarize(&llm, &[turn(Role::User, "hi")]).await;
        assert_eq!(summary, SUMMARY_FALLBACK);
    }

    #[tokio::test]
    async fn test_extract_event() {
        let llm = ScriptedLlm::new();
        llm.push_structured(json!({
            "event_type": "analysis",
            "summary": "Reviewed NVDA earnings",
            "entities": ["NVDA"],
            "key_findings": ["revenue beat"]
        }));

        let event = extract_event(&llm, "summary text").await.unwrap();
        assert_eq!(event.event_type, "analysis");
        assert_eq!(event.entities, vec!["NVDA"]);
        assert!(event.relations.is_empty());
    }

    #[tokio::test]
    async fn test_extract_event_tolerates_bad_reply() {
        let llm = ScriptedLlm::new();
        llm.push_structured(json!("just a string"));
        assert!(extract_event(&llm, "summary").await.is_none());

        llm.push_failure("boom");
        assert!(extract_event(&llm, "summary").await.is_none());
    }

    #[tokio::test]
    async fn test_extract_insight() {
        let llm = ScriptedLlm::new();
        llm.push_structured(json!({
            "subject": "NVDA",
            "viewpoint": "bullish on data-center growth",
            "confidence": 0.8
        }));

        let insight = extract_insight(&llm, "summary").await.unwrap();
        assert_eq!(insight.subject, "NVDA");
        assert!((insight.confidence - 0.8).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_extract_persona_traits() {
        let llm = ScriptedLlm::new();
        llm.push_structured(json!({
            "risk_preference": "moderate",
            "interested_sectors": ["semiconductors"]
        }));

        let delta = extract_persona_traits(&llm, "transcript").await.unwrap();
        assert_eq!(delta.risk_preference.as_deref(), Some("moderate"));
        assert!(!delta.is_empty());
    }
}
