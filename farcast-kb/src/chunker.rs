//! Deterministic sentence-aware chunking.
//!
//! Pure functions, no I/O. Markdown is reduced to speakable plain text,
//! split into sentences, and packed greedily into token-bounded windows
//! with a trailing-sentence overlap carried into the next window.

use regex::Regex;
use std::sync::LazyLock;

use crate::store::content_hash;

// Compiled regexes — allocated once, reused across calls.
static RE_FENCED_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static RE_INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`[^`]+`").unwrap());
static RE_IMAGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static RE_LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").unwrap());
static RE_MULTI_NEWLINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Chunking parameters. Defaults match the station's embedding model
/// context budget.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Windows below this are discarded (unless the document produced
    /// only one)
    pub min_tokens: usize,

    /// Hard ceiling per window
    pub max_tokens: usize,

    /// Budget for the trailing sentences carried into the next window
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_tokens: 300,
            max_tokens: 800,
            overlap_tokens: 50,
        }
    }
}

/// An emitted window, ready for embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    /// The window text
    pub text: String,

    /// Position in emission order
    pub chunk_index: usize,

    /// Estimated token count
    pub token_count: usize,

    /// sha-256 of the window text, lowercase hex
    pub content_hash: String,
}

/// Estimate the token count of a text: `ceil(words * 1.3)`.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words as f64 * 1.3).ceil() as usize
}

/// Reduce markdown to plain text: code to `[code]`, images to `[image]`,
/// links to their anchor text, runs of blank lines collapsed.
pub fn clean_markdown(text: &str) -> String {
    let mut c = text.to_string();

    // Fenced blocks before inline spans, images before links (an image is
    // a link with a leading bang).
    c = RE_FENCED_CODE.replace_all(&c, "[code]").into_owned();
    c = RE_INLINE_CODE.replace_all(&c, "[code]").into_owned();
    c = RE_IMAGE.replace_all(&c, "[image]").into_owned();
    c = RE_LINK.replace_all(&c, "$1").into_owned();
    c = RE_MULTI_NEWLINE.replace_all(&c, "\n\n").into_owned();

    c.trim().to_string()
}

/// Split text into sentences at `.`, `!`, or `?` followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < len {
        if matches!(bytes[i], b'.' | b'!' | b'?')
            && i + 1 < len
            && bytes[i + 1].is_ascii_whitespace()
        {
            let sentence = text[start..=i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            i += 1;
            while i < len && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            start = i;
            continue;
        }
        i += 1;
    }

    if start < len {
        let sentence = text[start..].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
    }

    sentences
}

/// Chunk a markdown body into token-bounded windows with overlap.
///
/// Windows accumulate whole sentences until the next sentence would exceed
/// `max_tokens`; each subsequent window starts with the trailing sentences
/// of its predecessor whose combined estimate fits in `overlap_tokens`.
/// Undersized windows are dropped afterwards, except when the document is
/// too short to produce more than one.
pub fn chunk_markdown(body: &str, config: &ChunkerConfig) -> Vec<ChunkDraft> {
    let cleaned = clean_markdown(body);
    if cleaned.is_empty() {
        return Vec::new();
    }

    let sentences: Vec<(String, usize)> = split_sentences(&cleaned)
        .into_iter()
        .map(|s| {
            let tokens = estimate_tokens(&s);
            (s, tokens)
        })
        .collect();
    if sentences.is_empty() {
        return Vec::new();
    }

    // Greedy windowing over sentence indices.
    let mut windows: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_tokens = 0usize;

    for (idx, (_, tokens)) in sentences.iter().enumerate() {
        if !current.is_empty() && current_tokens + tokens > config.max_tokens {
            // Carry back the trailing sentences that fit the overlap
            // budget before opening the next window.
            let mut overlap: Vec<usize> = Vec::new();
            let mut overlap_tokens = 0usize;
            for &prev in current.iter().rev() {
                let prev_tokens = sentences[prev].1;
                if overlap_tokens + prev_tokens > config.overlap_tokens {
                    break;
                }
                overlap_tokens += prev_tokens;
                overlap.push(prev);
            }
            overlap.reverse();

            windows.push(std::mem::take(&mut current));
            current = overlap;
            current_tokens = overlap_tokens;
        }
        current.push(idx);
        current_tokens += tokens;
    }
    if !current.is_empty() {
        windows.push(current);
    }

    let window_tokens = |window: &[usize]| -> usize {
        window.iter().map(|&i| sentences[i].1).sum()
    };

    // A document too short for more than one window is emitted as-is.
    let keep_all = windows.len() == 1;

    let mut drafts = Vec::new();
    for window in &windows {
        let tokens = window_tokens(window);
        if !keep_all && tokens < config.min_tokens {
            continue;
        }
        let text = window
            .iter()
            .map(|&i| sentences[i].0.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let hash = content_hash(&text);
        drafts.push(ChunkDraft {
            text,
            chunk_index: drafts.len(),
            token_count: tokens,
            content_hash: hash,
        });
    }

    drafts
}
