//! Language detection restricted to the station's supported set.

use whatlang::{Detector, Lang};

/// Languages the station can generate and synthesize.
const SUPPORTED: [Lang; 3] = [Lang::Eng, Lang::Spa, Lang::Cmn];

/// Detection result.
#[derive(Debug, Clone, PartialEq)]
pub struct LangDetection {
    /// Two-letter tag: `en`, `es`, or `zh`
    pub lang: String,

    /// Heuristic confidence, capped at 0.95
    pub confidence: f32,
}

/// Detect the language of a text.
///
/// Inputs under 100 chars carry too little signal and default to English;
/// anything the detector cannot place in the supported set also falls back
/// to English. Confidence grows with input length: `min(0.95, len/1000)`.
pub fn detect_language(text: &str) -> LangDetection {
    let len = text.chars().count();
    let confidence = (len as f32 / 1000.0).min(0.95);

    if len < 100 {
        return LangDetection {
            lang: "en".to_string(),
            confidence,
        };
    }

    let detector = Detector::with_allowlist(SUPPORTED.to_vec());
    let lang = match detector.detect_lang(text) {
        Some(Lang::Spa) => "es",
        Some(Lang::Cmn) => "zh",
        _ => "en",
    };

    LangDetection {
        lang: lang.to_string(),
        confidence,
    }
}
