//! Single-speaker script generation: completion call with retry, citation
//! extraction, and structural validation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::{debug, instrument, warn};

use farcast_core::Citation;
use farcast_rag::RagChunk;

use crate::llm::{ChatMessage, CompletionApi, CompletionRequest};
use crate::prompt::{build_system_prompt, build_user_prompt, ScriptContext};
use crate::{ScriptError, ScriptResult};

static RE_SOURCE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[SOURCE:\s*([^\]]+)\]").unwrap());

static RE_SEGMENT_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"segment \d+:").unwrap());

/// Structural markers that betray a screenplay rather than spoken prose.
const FORBIDDEN_MARKERS: [&str; 3] = ["[scene:", "[cut to:", "title:"];

/// Generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,

    /// Attempts for the completion call on 429/529
    pub retry_attempts: u32,

    /// Base delay between retries (doubled per attempt, jittered)
    pub retry_base_delay: Duration,

    /// Allowed deviation from the slot's word target
    pub word_tolerance: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            word_tolerance: 0.2,
        }
    }
}

/// A validated script with its citations and accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedScript {
    pub text: String,
    pub citations: Vec<Citation>,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub model: String,
    pub temperature: f32,
    pub generated_at: DateTime<Utc>,
}

/// Single-speaker script generator. Multi-speaker generation lives in
/// [`crate::conversation`] on the same type.
pub struct ScriptGenerator {
    api: Arc<dyn CompletionApi>,
    pub(crate) config: GeneratorConfig,
}

impl ScriptGenerator {
    pub fn new(api: Arc<dyn CompletionApi>, config: GeneratorConfig) -> Self {
        Self { api, config }
    }

    /// Generate, validate, and cite a segment script.
    #[instrument(skip_all, fields(slot = %ctx.slot_type, dj = %ctx.dj.name))]
    pub async fn generate(&self, ctx: &ScriptContext) -> ScriptResult<GeneratedScript> {
        let request = CompletionRequest {
            system: build_system_prompt(ctx),
            messages: vec![ChatMessage::user(build_user_prompt(ctx))],
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self.complete_with_retry(&request).await?;

        validate_script(&response.text, ctx.slot_type.word_target(), self.config.word_tolerance)?;
        let citations = extract_citations(&response.text, &ctx.chunks);

        debug!(
            words = response.text.split_whitespace().count(),
            citations = citations.len(),
            "script generated"
        );

        Ok(GeneratedScript {
            text: response.text,
            citations,
            tokens_in: response.input_tokens,
            tokens_out: response.output_tokens,
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            generated_at: Utc::now(),
        })
    }

    /// Run the completion, retrying with jittered exponential backoff on
    /// rate-limit (429) and overload (529) responses only.
    pub(crate) async fn complete_with_retry(
        &self,
        request: &CompletionRequest,
    ) -> ScriptResult<crate::llm::CompletionResponse> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.api.complete(request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable_status() && attempt < self.config.retry_attempts => {
                    let exp = self.config.retry_base_delay * 2u32.saturating_pow(attempt - 1);
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..100));
                    warn!(attempt, error = %err, "completion retrying after backoff");
                    tokio::time::sleep(exp + jitter).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Reject scripts outside the word budget or carrying structural markers.
pub fn validate_script(text: &str, word_target: usize, tolerance: f32) -> ScriptResult<()> {
    let words = text.split_whitespace().count();
    let min = (word_target as f32 * (1.0 - tolerance)).floor() as usize;
    let max = (word_target as f32 * (1.0 + tolerance)).ceil() as usize;
    if words < min || words > max {
        return Err(ScriptError::Invalid(format!(
            "word count {words} outside {min}..={max} for target {word_target}"
        )));
    }

    let lowered = text.to_lowercase();
    for marker in FORBIDDEN_MARKERS {
        if lowered.contains(marker) {
            return Err(ScriptError::Invalid(format!(
                "structural marker {marker:?} present"
            )));
        }
    }
    if RE_SEGMENT_MARKER.is_match(&lowered) {
        return Err(ScriptError::Invalid("segment marker present".to_string()));
    }
    Ok(())
}

/// Scan for `[SOURCE: <ref>]` tags and resolve each against the RAG
/// result: exact `type:id` first, then bare source id. Unresolved tags
/// are logged and skipped; duplicates collapse to one citation.
pub fn extract_citations(text: &str, chunks: &[RagChunk]) -> Vec<Citation> {
    let mut citations = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for capture in RE_SOURCE_TAG.captures_iter(text) {
        let reference = capture[1].trim();

        let resolved = chunks
            .iter()
            .find(|chunk| format!("{}:{}", chunk.source_type, chunk.source_id) == reference)
            .or_else(|| chunks.iter().find(|chunk| chunk.source_id.as_str() == reference));

        match resolved {
            Some(chunk) => {
                if seen.insert(chunk.chunk_id.to_string()) {
                    citations.push(Citation {
                        doc_id: chunk.source_id.clone(),
                        chunk_id: chunk.chunk_id.clone(),
                        title: chunk
                            .title
                            .clone()
                            .unwrap_or_else(|| chunk.source_id.to_string()),
                        relevance_score: chunk.final_score,
                    });
                }
            }
            None => warn!(reference, "unresolved citation reference"),
        }
    }

    citations
}

#[cfg(test)]
mod tests {
    use super::*;
    use farcast_core::{ChunkId, SourceId, SourceType};

    fn chunk(id: &str, source: &str) -> RagChunk {
        RagChunk {
            chunk_id: ChunkId::from(id),
            source_id: SourceId::from(source),
            source_type: SourceType::UniverseDoc,
            chunk_text: "text".to_string(),
            title: Some("A Title".to_string()),
            vector_score: 0.8,
            lexical_score: 0.4,
            recency_score: 0.0,
            final_score: 0.68,
        }
    }

    #[test]
    fn resolves_type_qualified_references() {
        let chunks = vec![chunk("c1", "doc-1")];
        let citations =
            extract_citations("As reported [SOURCE: universe_doc:doc-1] this week.", &chunks);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].chunk_id.as_str(), "c1");
        assert_eq!(citations[0].title, "A Title");
        assert!((citations[0].relevance_score - 0.68).abs() < 1e-6);
    }

    #[test]
    fn falls_back_to_bare_source_id() {
        let chunks = vec![chunk("c1", "doc-1")];
        let citations = extract_citations("Listen [SOURCE: doc-1] closely.", &chunks);
        assert_eq!(citations.len(), 1);
    }

    #[test]
    fn unresolved_references_are_skipped() {
        let chunks = vec![chunk("c1", "doc-1")];
        let citations = extract_citations("Rumor has it [SOURCE: event:ghost].", &chunks);
        assert!(citations.is_empty());
    }

    #[test]
    fn duplicate_references_collapse() {
        let chunks = vec![chunk("c1", "doc-1")];
        let citations = extract_citations(
            "[SOURCE: universe_doc:doc-1] and again [SOURCE: doc-1].",
            &chunks,
        );
        assert_eq!(citations.len(), 1);
    }

    #[test]
    fn word_count_bounds_are_inclusive_of_tolerance() {
        let text_ok = "word ".repeat(200);
        assert!(validate_script(&text_ok, 200, 0.2).is_ok());

        let text_short = "word ".repeat(100);
        assert!(matches!(
            validate_script(&text_short, 200, 0.2),
            Err(ScriptError::Invalid(_))
        ));

        let text_long = "word ".repeat(300);
        assert!(validate_script(&text_long, 200, 0.2).is_err());
    }

    #[test]
    fn structural_markers_are_rejected() {
        let base = "word ".repeat(200);
        let text = format!("[scene: the studio] {base}");
        let err = validate_script(&text, 200, 0.2).unwrap_err();
        assert!(matches!(err, ScriptError::Invalid(_)));
    }
}
