//! Lexicon-driven tone validation.
//!
//! Scripts must stay inside the station's editorial universe: a working
//! future civilization, no fantasy elements, no leakage from the
//! listener's present. Violations are emitted as tagged flags, never as
//! free-form strings that downstream code would have to scan by
//! substring.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Embedded default lexicons.
const DEFAULT_LEXICONS: &str = include_str!("../templates/tone.toml");

/// Points deducted per flagged keyword.
const DEDUCTION_PER_HIT: u32 = 10;

/// Category of a tone violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneFlag {
    /// Bleak framing of the station's civilization
    Dystopian,

    /// Fantasy elements outside the setting
    Fantasy,

    /// Present-day artifacts leaking into the future
    Anachronism,
}

impl ToneFlag {
    /// Get the flag name as a string.
    pub fn name(self) -> &'static str {
        match self {
            Self::Dystopian => "dystopian",
            Self::Fantasy => "fantasy",
            Self::Anachronism => "anachronism",
        }
    }
}

impl std::fmt::Display for ToneFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One flagged keyword occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneHit {
    pub flag: ToneFlag,
    pub keyword: String,
}

/// Scoring result for one script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToneReport {
    /// 100 minus deductions, floored at 0
    pub score: u32,
    pub hits: Vec<ToneHit>,
}

impl ToneReport {
    /// Whether the script clears the configured floor.
    pub fn is_acceptable(&self, min_score: u32) -> bool {
        self.score >= min_score
    }
}

#[derive(Debug, Deserialize)]
struct LexiconFile {
    lexicons: HashMap<String, Vec<String>>,
}

/// Keyword sets per flag, loaded from TOML data.
#[derive(Debug, Clone)]
pub struct ToneLexicon {
    sets: Vec<(ToneFlag, Vec<String>)>,
}

impl ToneLexicon {
    /// The lexicons embedded in the crate.
    pub fn embedded() -> Self {
        Self::from_toml(DEFAULT_LEXICONS).expect("embedded lexicons parse")
    }

    /// Load overridden lexicons from a TOML file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("read {}: {e}", path.display()))?;
        Self::from_toml(&raw)
    }

    fn from_toml(raw: &str) -> Result<Self, String> {
        let file: LexiconFile = toml::from_str(raw).map_err(|e| e.to_string())?;
        let mut sets = Vec::new();
        for (flag, key) in [
            (ToneFlag::Dystopian, "dystopian"),
            (ToneFlag::Fantasy, "fantasy"),
            (ToneFlag::Anachronism, "anachronism"),
        ] {
            let keywords = file
                .lexicons
                .get(key)
                .ok_or_else(|| format!("missing lexicon: {key}"))?;
            sets.push((
                flag,
                keywords.iter().map(|k| k.to_lowercase()).collect(),
            ));
        }
        Ok(Self { sets })
    }

    /// Score a script: 100 minus a fixed deduction per flagged keyword
    /// present in the text.
    pub fn validate(&self, text: &str) -> ToneReport {
        let lowered = text.to_lowercase();
        let mut hits = Vec::new();

        for (flag, keywords) in &self.sets {
            for keyword in keywords {
                if lowered.contains(keyword.as_str()) {
                    hits.push(ToneHit {
                        flag: *flag,
                        keyword: keyword.clone(),
                    });
                }
            }
        }

        let score = 100u32.saturating_sub(hits.len() as u32 * DEDUCTION_PER_HIT);
        ToneReport { score, hits }
    }
}
