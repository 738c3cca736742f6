//! Prompt assembly for single-speaker segment scripts.
//!
//! The system prompt carries the persona, the in-universe clock, and the
//! station's stylistic contract; the user prompt carries the retrieved
//! chunks with their citation tags. Wording lives here, editorial keyword
//! lists live in the tone lexicon (data).

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use farcast_core::SlotType;
use farcast_rag::RagChunk;

/// A broadcast persona: name, voice, and character notes fed to both the
/// script generator and TTS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DjPersona {
    pub name: String,
    pub bio: String,
    pub traits: Vec<String>,

    /// TTS voice identifier
    pub voice_id: String,
}

impl DjPersona {
    /// A plain fallback host for slots with no assigned persona.
    pub fn station_default() -> Self {
        Self {
            name: "Vega".to_string(),
            bio: "Longtime overnight host of the relay network".to_string(),
            traits: vec![
                "warm".to_string(),
                "wry".to_string(),
                "curious".to_string(),
            ],
            voice_id: "vega-1".to_string(),
        }
    }
}

/// Everything the generator needs to write one segment.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    pub dj: DjPersona,
    pub slot_type: SlotType,
    pub chunks: Vec<RagChunk>,

    /// In-universe broadcast instant
    pub reference_time: DateTime<Utc>,

    /// In-universe broadcast year (redundant with `reference_time`, kept
    /// for template convenience)
    pub future_year: i32,

    pub program_name: Option<String>,
    pub previous_summary: Option<String>,
    pub lang: String,
}

/// Stylistic contract baked into every system prompt: 60% information,
/// 30% personality, 10% callbacks and station color.
pub const TONE_BALANCE: (u8, u8, u8) = (60, 30, 10);

/// Build the system prompt: persona, enumerated traits, the in-universe
/// clock, stylistic rules, and the word target for the slot.
pub fn build_system_prompt(ctx: &ScriptContext) -> String {
    let traits = ctx.dj.traits.join(", ");
    let date = ctx.reference_time.format("%B %e, %Y");
    let target = ctx.slot_type.word_target();
    let program = ctx
        .program_name
        .as_deref()
        .unwrap_or("the overnight broadcast");

    format!(
        "You are {name}, a radio DJ. {bio}\n\
         Personality traits: {traits}.\n\
         It is {date}. You broadcast on {program}. Everything you say is \
         live radio in the year {year}; treat it as the present day.\n\
         \n\
         Style rules:\n\
         - Balance your delivery {info}% information, {personality}% \
           personality, {color}% callbacks and station color.\n\
         - Never describe the world as dystopian or hopeless; this is a \
           functioning civilization.\n\
         - No magic, no fantasy creatures, no technology from the \
           listener's past presented as new.\n\
         - Write spoken prose only: no stage directions, no scene \
           headings, no segment markers, no titles.\n\
         - Target length: about {target} words for this {slot} segment.\n\
         - Write in {lang}.",
        name = ctx.dj.name,
        bio = ctx.dj.bio,
        traits = traits,
        date = date,
        program = program,
        year = ctx.reference_time.year(),
        info = TONE_BALANCE.0,
        personality = TONE_BALANCE.1,
        color = TONE_BALANCE.2,
        target = target,
        slot = ctx.slot_type,
        lang = ctx.lang,
    )
}

/// Citation tag for a retrieved chunk: `[SOURCE: <type>:<id>]`.
pub fn source_tag(chunk: &RagChunk) -> String {
    format!("[SOURCE: {}:{}]", chunk.source_type, chunk.source_id)
}

/// Build the user prompt: optional previous-segment recap, then the
/// retrieved chunks in rank order with their citation tags, then the
/// citation instruction.
pub fn build_user_prompt(ctx: &ScriptContext) -> String {
    let mut prompt = String::new();

    if let Some(previous) = &ctx.previous_summary {
        prompt.push_str("Previously on the broadcast: ");
        prompt.push_str(previous);
        prompt.push_str("\n\n");
    }

    if ctx.chunks.is_empty() {
        prompt.push_str("No source material is available for this segment; \
                         speak from the station's standing knowledge.\n\n");
    } else {
        prompt.push_str("Source material:\n\n");
        for chunk in &ctx.chunks {
            prompt.push_str(&source_tag(chunk));
            prompt.push('\n');
            prompt.push_str(&chunk.chunk_text);
            prompt.push_str("\n\n");
        }
    }

    prompt.push_str(
        "Write the segment now. When you use a fact from the source \
         material, cite it inline with the exact bracket tag shown above \
         it, e.g. [SOURCE: universe_doc:abc123].",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use farcast_core::{ChunkId, SourceId, SourceType};

    fn context() -> ScriptContext {
        ScriptContext {
            dj: DjPersona::station_default(),
            slot_type: SlotType::News,
            chunks: vec![RagChunk {
                chunk_id: ChunkId::from("c1"),
                source_id: SourceId::from("doc-1"),
                source_type: SourceType::UniverseDoc,
                chunk_text: "The colony turned fifty.".to_string(),
                title: Some("Colony at Fifty".to_string()),
                vector_score: 0.9,
                lexical_score: 0.5,
                recency_score: 0.0,
                final_score: 0.78,
            }],
            reference_time: "2526-03-15T12:00:00Z".parse().unwrap(),
            future_year: 2526,
            program_name: None,
            previous_summary: Some("we covered the launch window".to_string()),
            lang: "en".to_string(),
        }
    }

    #[test]
    fn system_prompt_carries_persona_and_clock() {
        let prompt = build_system_prompt(&context());
        assert!(prompt.contains("Vega"));
        assert!(prompt.contains("warm, wry, curious"));
        assert!(prompt.contains("2526"));
        assert!(prompt.contains("200 words"));
        assert!(prompt.contains("60% information"));
    }

    #[test]
    fn user_prompt_tags_each_chunk() {
        let prompt = build_user_prompt(&context());
        assert!(prompt.contains("[SOURCE: universe_doc:doc-1]"));
        assert!(prompt.contains("The colony turned fifty."));
        assert!(prompt.starts_with("Previously on the broadcast:"));
    }
}
