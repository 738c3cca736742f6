//! Multi-speaker script generation and dialogue parsing.
//!
//! The model writes `SPEAKER: utterance` lines; the parser rebuilds an
//! ordered turn list, and quality gates reject scripts that would not
//! survive air: too few turns, one-sided participation, or degenerate
//! line lengths.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use farcast_rag::RagChunk;

use crate::generate::ScriptGenerator;
use crate::llm::{ChatMessage, CompletionApi, CompletionRequest};
use crate::prompt::{source_tag, DjPersona};
use crate::{ScriptError, ScriptResult};

/// `SPEAKER_LABEL: utterance` — label is all-caps, colon-terminated.
static RE_SPEAKER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z][A-Z0-9 '\-]{0,39}):\s*(.*)$").unwrap());

/// Embedded default per-format prompt templates.
const DEFAULT_FORMATS: &str = include_str!("../templates/conversation.toml");

/// Conversation structure requested by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationFormat {
    Interview,
    Panel,
    Debate,
    Dialogue,
}

impl ConversationFormat {
    /// Get the format name as a string.
    pub fn name(self) -> &'static str {
        match self {
            Self::Interview => "interview",
            Self::Panel => "panel",
            Self::Debate => "debate",
            Self::Dialogue => "dialogue",
        }
    }
}

impl std::fmt::Display for ConversationFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A multi-speaker generation request.
#[derive(Debug, Clone)]
pub struct ConversationRequest {
    pub format: ConversationFormat,
    pub host: DjPersona,
    pub participants: Vec<DjPersona>,
    pub topic: String,
    pub retrieved_context: Vec<RagChunk>,

    /// Target airtime in seconds
    pub duration_sec: u32,

    pub tone: String,
    pub future_year: i32,
}

/// One parsed dialogue turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: String,
    pub text: String,
}

/// A parsed, validated conversation script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationScript {
    pub turns: Vec<Turn>,

    /// The raw script text as generated
    pub raw: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

#[derive(Debug, Deserialize)]
struct FormatTemplates {
    formats: HashMap<String, String>,
}

fn format_template(format: ConversationFormat) -> ScriptResult<String> {
    let templates: FormatTemplates = toml::from_str(DEFAULT_FORMATS)
        .map_err(|e| ScriptError::Template(format!("conversation templates: {e}")))?;
    templates
        .formats
        .get(format.name())
        .cloned()
        .ok_or_else(|| ScriptError::Template(format!("no template for format {format}")))
}

impl ScriptGenerator {
    /// Generate a multi-speaker script and parse it into turns.
    #[instrument(skip_all, fields(format = %request.format, topic = %request.topic))]
    pub async fn generate_conversation(
        &self,
        request: &ConversationRequest,
    ) -> ScriptResult<ConversationScript> {
        let completion = self
            .complete_with_retry(&self.conversation_request(request)?)
            .await?;

        let turns = parse_dialogue(&completion.text);
        validate_conversation(&turns)?;

        debug!(turns = turns.len(), "conversation generated");
        Ok(ConversationScript {
            turns,
            raw: completion.text,
            tokens_in: completion.input_tokens,
            tokens_out: completion.output_tokens,
        })
    }

    fn conversation_request(
        &self,
        request: &ConversationRequest,
    ) -> ScriptResult<CompletionRequest> {
        let participants = request
            .participants
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let minutes = (request.duration_sec / 60).max(1);

        let brief = format_template(request.format)?
            .replace("{host}", &request.host.name)
            .replace("{participants}", &participants)
            .replace("{topic}", &request.topic)
            .replace("{tone}", &request.tone)
            .replace("{minutes}", &minutes.to_string())
            .replace("{year}", &request.future_year.to_string());

        let mut user = String::new();
        if !request.retrieved_context.is_empty() {
            user.push_str("Source material:\n\n");
            for chunk in &request.retrieved_context {
                user.push_str(&source_tag(chunk));
                user.push('\n');
                user.push_str(&chunk.chunk_text);
                user.push_str("\n\n");
            }
        }
        user.push_str(&brief);
        user.push_str(
            "\n\nFormat every line as SPEAKER NAME: utterance — speaker \
             label in capitals, one turn per line, nothing else.",
        );

        let system = format!(
            "You write dialogue scripts for live radio in the year {}. \
             Speakers sound like distinct people; no narration, no stage \
             directions.",
            request.future_year
        );

        Ok(CompletionRequest {
            system,
            messages: vec![ChatMessage::user(user)],
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        })
    }
}

/// Rebuild ordered turns from `SPEAKER: utterance` lines. Lines that do
/// not open a new turn continue the previous one; leading prose before
/// the first speaker label is dropped.
pub fn parse_dialogue(text: &str) -> Vec<Turn> {
    let mut turns: Vec<Turn> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(capture) = RE_SPEAKER_LINE.captures(line) {
            turns.push(Turn {
                speaker: capture[1].trim().to_string(),
                text: capture[2].trim().to_string(),
            });
        } else if let Some(last) = turns.last_mut() {
            if !last.text.is_empty() {
                last.text.push(' ');
            }
            last.text.push_str(line);
        }
    }

    turns
}

/// Quality gates: enough turns, enough voices, no degenerate line
/// lengths, and no speaker dominating the room.
pub fn validate_conversation(turns: &[Turn]) -> ScriptResult<()> {
    if turns.len() < 4 {
        return Err(ScriptError::ConversationQuality(format!(
            "only {} turns",
            turns.len()
        )));
    }

    let mut speakers: HashMap<&str, usize> = HashMap::new();
    for turn in turns {
        *speakers.entry(turn.speaker.as_str()).or_default() += 1;
    }
    if speakers.len() < 2 {
        return Err(ScriptError::ConversationQuality(
            "fewer than two distinct speakers".to_string(),
        ));
    }

    let total = turns.len() as f32;
    let short = turns.iter().filter(|t| t.text.len() < 20).count() as f32;
    if short / total >= 0.3 {
        return Err(ScriptError::ConversationQuality(format!(
            "{:.0}% of turns under 20 chars",
            100.0 * short / total
        )));
    }
    let long = turns.iter().filter(|t| t.text.len() > 500).count() as f32;
    if long / total >= 0.2 {
        return Err(ScriptError::ConversationQuality(format!(
            "{:.0}% of turns over 500 chars",
            100.0 * long / total
        )));
    }

    let max_count = speakers.values().copied().max().unwrap_or(0);
    let min_count = speakers.values().copied().min().unwrap_or(0);
    if max_count > 3 * min_count {
        return Err(ScriptError::ConversationQuality(format!(
            "participation skew {max_count}:{min_count}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(speaker: &str, text: &str) -> Turn {
        Turn {
            speaker: speaker.to_string(),
            text: text.to_string(),
        }
    }

    fn filler(n: usize) -> String {
        "and that is how the relay stations handled it ".repeat(n)
    }

    #[test]
    fn parses_speaker_lines_in_order() {
        let script = "VEGA: Welcome back to the overnight show.\n\
                      DR SOLIS: Thanks for having me on again.\n\
                      VEGA: Tell us about the survey.\n";
        let turns = parse_dialogue(script);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].speaker, "VEGA");
        assert_eq!(turns[1].speaker, "DR SOLIS");
        assert_eq!(turns[2].text, "Tell us about the survey.");
    }

    #[test]
    fn continuation_lines_join_previous_turn() {
        let script = "VEGA: This is the first half\nand this is the rest.\nGUEST: Short reply here.";
        let turns = parse_dialogue(script);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "This is the first half and this is the rest.");
    }

    #[test]
    fn prose_before_first_speaker_is_dropped() {
        let script = "Here is your script:\n\nVEGA: On we go with the show tonight.";
        let turns = parse_dialogue(script);
        assert_eq!(turns.len(), 1);
    }

    #[test]
    fn mixed_case_labels_are_not_speakers() {
        let turns = parse_dialogue("Vega: lowercase label is prose\nVEGA: this one counts here.");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].speaker, "VEGA");
    }

    #[test]
    fn four_turns_two_speakers_pass() {
        let turns = vec![
            turn("VEGA", &filler(1)),
            turn("SOLIS", &filler(1)),
            turn("VEGA", &filler(1)),
            turn("SOLIS", &filler(1)),
        ];
        assert!(validate_conversation(&turns).is_ok());
    }

    #[test]
    fn too_few_turns_fail() {
        let turns = vec![turn("VEGA", &filler(1)), turn("SOLIS", &filler(1))];
        assert!(validate_conversation(&turns).is_err());
    }

    #[test]
    fn single_speaker_fails() {
        let turns = vec![
            turn("VEGA", &filler(1)),
            turn("VEGA", &filler(1)),
            turn("VEGA", &filler(1)),
            turn("VEGA", &filler(1)),
        ];
        assert!(validate_conversation(&turns).is_err());
    }

    #[test]
    fn too_many_short_turns_fail() {
        let turns = vec![
            turn("VEGA", "ok"),
            turn("SOLIS", "yes"),
            turn("VEGA", &filler(1)),
            turn("SOLIS", &filler(1)),
        ];
        // 2 of 4 turns under 20 chars is 50% >= 30%.
        assert!(validate_conversation(&turns).is_err());
    }

    #[test]
    fn too_many_long_turns_fail() {
        let turns = vec![
            turn("VEGA", &filler(15)),
            turn("SOLIS", &filler(1)),
            turn("VEGA", &filler(1)),
            turn("SOLIS", &filler(1)),
        ];
        // 1 of 4 turns over 500 chars is 25% >= 20%.
        assert!(validate_conversation(&turns).is_err());
    }

    #[test]
    fn participation_skew_fails() {
        let mut turns = vec![turn("SOLIS", &filler(1))];
        for _ in 0..4 {
            turns.push(turn("VEGA", &filler(1)));
        }
        // 4:1 exceeds the 3x participation bound.
        assert!(validate_conversation(&turns).is_err());
    }
}
