//! Concept clustering: k-means over stored embeddings plus LLM abstraction.
//!
//! Clustering runs during finalize to lift recurring themes out of episodic
//! memory into one-sentence core principles. With fewer stored events than
//! requested clusters the pass is skipped outright, making no LLM call, so
//! young stores pay nothing.

use engram_core::error::Result;
use engram_semantic::{cosine_distance, ChatMessage, LlmClient, Vector, VectorIndex};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MIN_CLUSTER_SIZE: usize = 3;
const SAMPLE_LIMIT: usize = 10;
const MAX_ITERS: usize = 20;

/// Clusters episodic documents and abstracts each meaningful cluster into a
/// candidate core principle.
pub struct ConceptClusterer {
    index: Arc<dyn VectorIndex>,
    llm: Arc<dyn LlmClient>,
}

impl ConceptClusterer {
    pub fn new(index: Arc<dyn VectorIndex>, llm: Arc<dyn LlmClient>) -> Self {
        Self { index, llm }
    }

    /// Cluster all stored documents into `k` groups and abstract each group
    /// of at least three members into a principle sentence.
    ///
    /// Returns an empty list without calling the model when fewer than `k`
    /// documents exist. A failed abstraction skips that cluster only.
    pub async fn cluster_and_abstract(&self, k: usize) -> Result<Vec<String>> {
        let entries = self.index.get_all(None).await?;
        if k == 0 || entries.len() < k {
            debug!(
                documents = entries.len(),
                k, "Too few documents to cluster, skipping"
            );
            return Ok(Vec::new());
        }

        let points: Vec<&Vector> = entries.iter().map(|e| &e.embedding).collect();
        let assignments = kmeans(&points, k, MAX_ITERS);

        let mut principles = Vec::new();
        for cluster in 0..k {
            let docs: Vec<&str> = entries
                .iter()
                .zip(&assignments)
                .filter(|(_, a)| **a == cluster)
                .map(|(e, _)| e.document.as_str())
                .collect();
            if docs.len() < MIN_CLUSTER_SIZE {
                continue;
            }

            let sample = docs[..docs.len().min(SAMPLE_LIMIT)].join("\n");
            let messages = [
                ChatMessage::system(
                    "These memory fragments share a theme. State the underlying \
                     principle as one sentence.",
                ),
                ChatMessage::user(sample),
            ];
            match self.llm.invoke(&messages).await {
                Ok(reply) => {
                    let principle = reply
                        .trim()
                        .trim_start_matches("Principle:")
                        .trim()
                        .to_string();
                    if !principle.is_empty() {
                        principles.push(principle);
                    }
                }
                Err(e) => {
                    warn!(cluster, members = docs.len(), error = %e, "Cluster abstraction failed, skipping");
                }
            }
        }

        info!(
            documents = entries.len(),
            k,
            principles = principles.len(),
            "Concept clustering complete"
        );
        Ok(principles)
    }
}

/// Deterministic k-means: centroids seeded by stride over the input order,
/// cosine distance, stops early when assignments stabilize.
///
/// Returns one cluster index per point. Callers guarantee `points.len() >= k`
/// and `k >= 1`.
fn kmeans(points: &[&Vector], k: usize, max_iters: usize) -> Vec<usize> {
    let mut centroids: Vec<Vector> = (0..k)
        .map(|i| points[i * points.len() / k].clone())
        .collect();
    let mut assignments = vec![0usize; points.len()];

    for _ in 0..max_iters {
        let mut changed = false;
        for (i, point) in points.iter().enumerate() {
            let nearest = centroids
                .iter()
                .enumerate()
                .map(|(c, centroid)| (c, cosine_distance(point, centroid)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(c, _)| c)
                .unwrap_or(0);
            if assignments[i] != nearest {
                assignments[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&&Vector> = points
                .iter()
                .zip(&assignments)
                .filter(|(_, a)| **a == c)
                .map(|(p, _)| p)
                .collect();
            // An empty cluster keeps its previous centroid.
            if members.is_empty() {
                continue;
            }
            let dim = centroid.len();
            let mut mean = vec![0.0f32; dim];
            for member in &members {
                for (m, v) in mean.iter_mut().zip(member.iter()) {
                    *m += v;
                }
            }
            for m in &mut mean {
                *m /= members.len() as f32;
            }
            *centroid = mean;
        }
    }

    assignments
}
