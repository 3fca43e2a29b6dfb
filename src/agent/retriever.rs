//! Knowledge retrieval for reply generation
//!
//! Assembles the context block injected into the system prompt. General
//! entries are always included; the rest comes from vector similarity over
//! the knowledge base. Retrieval failures degrade to whatever was already
//! collected and never abort the turn.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::db::{AiSettings, EmbeddingModel, KnowledgeEntry, KnowledgeRepo};
use crate::Result;

/// Maximum vector matches considered per turn
const TOP_K: usize = 3;

/// Maximum recent entries appended in fine-tuned mode
const RECENT_LIMIT: usize = 10;

/// Byte cap on the assembled context block
const CONTEXT_MAX_BYTES: usize = 6000;

/// Separator between knowledge sections in the context block
const SECTION_DELIMITER: &str = "\n---\n";

/// Appended when the context block is cut at the byte cap
const TRUNCATION_MARKER: &str = "\n[knowledge truncated]";

/// Knowledge gathered for one generation turn
#[derive(Debug, Clone)]
pub struct RetrievedKnowledge {
    /// Assembled context block, empty when nothing was found
    pub context: String,
    /// Whether any knowledge backs this turn; fine-tuned mode always counts
    /// the model's baked-in baseline
    pub found: bool,
}

/// Gathers knowledge context for the generator
pub struct KnowledgeRetriever {
    knowledge: KnowledgeRepo,
    embedder: Option<Arc<dyn EmbeddingModel>>,
}

impl KnowledgeRetriever {
    /// Create a new retriever; without an embedder only general entries
    /// (and the fine-tuned recency window) are available
    #[must_use]
    pub fn new(knowledge: KnowledgeRepo, embedder: Option<Arc<dyn EmbeddingModel>>) -> Self {
        Self { knowledge, embedder }
    }

    /// Gather knowledge for one user message
    ///
    /// Never fails; datastore or embedding errors are logged and treated as
    /// zero matches.
    pub async fn retrieve(&self, query: &str, settings: &AiSettings) -> RetrievedKnowledge {
        if settings.use_finetuned_model {
            return self.recent_updates(settings);
        }

        let mut sections: Vec<String> = Vec::new();

        match self.knowledge.general() {
            Ok(entries) => sections.extend(entries.into_iter().map(|e| e.content)),
            Err(e) => tracing::warn!(error = %e, "general knowledge fetch failed"),
        }

        match self.similar(query, settings).await {
            Ok(matches) => sections.extend(matches),
            Err(e) => {
                tracing::warn!(error = %e, "knowledge search failed, continuing without matches");
            }
        }

        let found = !sections.is_empty();
        RetrievedKnowledge { context: join_capped(&sections), found }
    }

    /// Fine-tuned mode: the model carries the knowledge baseline, so skip
    /// search and append only entries newer than the training cut
    fn recent_updates(&self, settings: &AiSettings) -> RetrievedKnowledge {
        let entries = match self.knowledge.recent(settings.recent_knowledge_days, RECENT_LIMIT) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "recent knowledge fetch failed");
                Vec::new()
            }
        };

        let context = if entries.is_empty() {
            String::new()
        } else {
            let sections: Vec<String> = entries.into_iter().map(|e| e.content).collect();
            format!("Recent updates:\n{}", join_capped(&sections))
        };

        RetrievedKnowledge { context, found: true }
    }

    /// Top-K vector matches at or above the confidence floor, best first,
    /// newer entries winning ties
    async fn similar(&self, query: &str, settings: &AiSettings) -> Result<Vec<String>> {
        let Some(embedder) = &self.embedder else {
            tracing::debug!("no embedding model configured, skipping similarity search");
            return Ok(Vec::new());
        };

        let query_embedding = embedder.embed(query).await?;
        let hits = self.knowledge.search(&query_embedding, TOP_K)?;

        let mut scored: Vec<(f32, KnowledgeEntry)> = Vec::new();
        for (entry_id, distance) in hits {
            // sqlite-vec reports cosine distance; flip it into similarity
            let similarity = 1.0 - distance;
            if similarity < settings.min_confidence {
                continue;
            }
            if let Some(entry) = self.knowledge.get(&entry_id)? {
                scored.push((similarity, entry));
            }
        }

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.1.created_at.cmp(&a.1.created_at))
        });

        Ok(scored.into_iter().map(|(_, entry)| entry.content).collect())
    }
}

/// Join sections with the delimiter, cutting at the byte cap on a char
/// boundary and appending the truncation marker
fn join_capped(sections: &[String]) -> String {
    let joined = sections.join(SECTION_DELIMITER);
    if joined.len() <= CONTEXT_MAX_BYTES {
        return joined;
    }

    let mut cut = CONTEXT_MAX_BYTES;
    while !joined.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut capped = joined[..cut].to_string();
    capped.push_str(TRUNCATION_MARKER);
    capped
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::db::{self, EMBEDDING_DIM};
    use crate::Error;

    struct ScriptedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingModel for ScriptedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingModel for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Embedding("scripted failure".to_string()))
        }
    }

    fn unit_vec(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[axis] = 1.0;
        v
    }

    fn repo() -> KnowledgeRepo {
        KnowledgeRepo::new(db::init_memory().unwrap())
    }

    #[tokio::test]
    async fn test_general_entries_always_included() {
        let knowledge = repo();
        knowledge
            .insert("คลินิกเปิดทุกวัน 10:00-20:00", "general", None, &serde_json::json!({}))
            .unwrap();

        let retriever = KnowledgeRetriever::new(knowledge, None);
        let result = retriever.retrieve("เปิดกี่โมง", &AiSettings::default()).await;

        assert!(result.found);
        assert!(result.context.contains("10:00-20:00"));
    }

    #[tokio::test]
    async fn test_empty_base_reports_not_found() {
        let retriever = KnowledgeRetriever::new(repo(), None);
        let result = retriever.retrieve("ราคาเลเซอร์", &AiSettings::default()).await;

        assert!(!result.found);
        assert!(result.context.is_empty());
    }

    #[tokio::test]
    async fn test_similarity_threshold_filters_matches() {
        let knowledge = repo();
        // Same axis as the query: similarity 1.0
        knowledge
            .insert("เลเซอร์กำจัดขน 990 บาท", "pricing", Some(&unit_vec(0)), &serde_json::json!({}))
            .unwrap();
        // Orthogonal: cosine similarity 0.0, below the floor
        knowledge
            .insert("โบท็อกซ์ 4500 บาท", "pricing", Some(&unit_vec(1)), &serde_json::json!({}))
            .unwrap();

        let retriever =
            KnowledgeRetriever::new(knowledge, Some(Arc::new(ScriptedEmbedder(unit_vec(0)))));
        let result = retriever.retrieve("เลเซอร์ราคาเท่าไหร่", &AiSettings::default()).await;

        assert!(result.found);
        assert!(result.context.contains("990"));
        assert!(!result.context.contains("4500"));
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_general() {
        let knowledge = repo();
        knowledge
            .insert("โปรโมชั่นเดือนนี้ ลด 20%", "general", None, &serde_json::json!({}))
            .unwrap();
        knowledge
            .insert("เลเซอร์กำจัดขน 990 บาท", "pricing", Some(&unit_vec(0)), &serde_json::json!({}))
            .unwrap();

        let retriever = KnowledgeRetriever::new(knowledge, Some(Arc::new(FailingEmbedder)));
        let result = retriever.retrieve("ราคา", &AiSettings::default()).await;

        assert!(result.found);
        assert!(result.context.contains("ลด 20%"));
        assert!(!result.context.contains("990"));
    }

    #[tokio::test]
    async fn test_finetuned_mode_skips_search_and_always_finds() {
        let knowledge = repo();
        knowledge
            .insert("โปรใหม่ HIFU 6900 บาท", "promotion", None, &serde_json::json!({}))
            .unwrap();

        let settings = AiSettings { use_finetuned_model: true, ..AiSettings::default() };
        // No embedder configured, yet fine-tuned mode still reports found
        let retriever = KnowledgeRetriever::new(knowledge, None);
        let result = retriever.retrieve("มีโปรอะไรบ้าง", &settings).await;

        assert!(result.found);
        assert!(result.context.starts_with("Recent updates:"));
        assert!(result.context.contains("HIFU"));
    }

    #[tokio::test]
    async fn test_finetuned_mode_found_even_when_empty() {
        let settings = AiSettings { use_finetuned_model: true, ..AiSettings::default() };
        let retriever = KnowledgeRetriever::new(repo(), None);
        let result = retriever.retrieve("สวัสดี", &settings).await;

        assert!(result.found);
        assert!(result.context.is_empty());
    }

    #[tokio::test]
    async fn test_context_capped_with_marker() {
        let knowledge = repo();
        knowledge
            .insert(&"ก".repeat(4000), "general", None, &serde_json::json!({}))
            .unwrap();
        knowledge
            .insert(&"ข".repeat(4000), "general", None, &serde_json::json!({}))
            .unwrap();

        let retriever = KnowledgeRetriever::new(knowledge, None);
        let result = retriever.retrieve("อะไร", &AiSettings::default()).await;

        assert!(result.context.len() <= CONTEXT_MAX_BYTES + TRUNCATION_MARKER.len());
        assert!(result.context.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_cap_respects_char_boundaries() {
        // Two ASCII bytes shift every 3-byte Thai char off the cap boundary,
        // so a naive byte slice at the cap would panic mid-char
        let sections = vec![format!("ab{}", "ก".repeat(CONTEXT_MAX_BYTES))];
        let capped = join_capped(&sections);
        assert!(capped.ends_with(TRUNCATION_MARKER));
    }
}
