//! Loudness normalization via an external audio tool.
//!
//! The station delegates actual DSP to ffmpeg's `loudnorm` filter and
//! keeps only orchestration: target selection, measured-metric capture,
//! and tolerance validation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::{StationError, StationResult};

/// Loudness targets per content type: speech −16 LUFS, everything else
/// −14; true-peak ceiling −1.0 dBTP.
#[derive(Debug, Clone, Copy)]
pub struct LoudnessTarget {
    pub lufs: f64,
    pub peak_ceiling_db: f64,
}

impl LoudnessTarget {
    pub fn for_content_type(content_type: &str) -> Self {
        let lufs = if content_type == "speech" { -16.0 } else { -14.0 };
        Self {
            lufs,
            peak_ceiling_db: -1.0,
        }
    }

    /// Allowed deviation from the integrated-loudness target.
    pub const TOLERANCE_LU: f64 = 1.0;
}

/// Metrics measured on the normalized output.
#[derive(Debug, Clone, Copy)]
pub struct LoudnessReport {
    pub lufs_integrated: f64,
    pub peak_db: f64,
    pub duration_sec: f64,
}

impl LoudnessReport {
    /// Validation errors against a target; empty means the audio passes.
    pub fn validation_errors(&self, target: &LoudnessTarget) -> Vec<String> {
        let mut errors = Vec::new();
        if (self.lufs_integrated - target.lufs).abs() > LoudnessTarget::TOLERANCE_LU {
            errors.push(format!(
                "integrated loudness {:.1} LUFS outside {:.1} ± {:.1}",
                self.lufs_integrated,
                target.lufs,
                LoudnessTarget::TOLERANCE_LU
            ));
        }
        if self.peak_db > target.peak_ceiling_db {
            errors.push(format!(
                "true peak {:.1} dBTP above ceiling {:.1}",
                self.peak_db, target.peak_ceiling_db
            ));
        }
        errors
    }
}

/// The normalization seam.
#[async_trait]
pub trait Normalizer: Send + Sync {
    /// Normalize `input` into `output` and report measured metrics.
    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        target: &LoudnessTarget,
    ) -> StationResult<LoudnessReport>;
}

/// ffmpeg `loudnorm` wrapper.
pub struct FfmpegNormalizer {
    binary: String,
    timeout: Duration,
}

impl FfmpegNormalizer {
    /// Use `ffmpeg` from PATH with a 300 s mastering budget.
    pub fn new() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            timeout: Duration::from_secs(300),
        }
    }

    /// Use a specific binary and timeout.
    pub fn with_binary(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

impl Default for FfmpegNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// The JSON block `loudnorm` prints to stderr.
#[derive(Deserialize)]
struct LoudnormStats {
    output_i: String,
    output_tp: String,
}

fn parse_loudnorm_stats(stderr: &str) -> StationResult<LoudnormStats> {
    // loudnorm prints its stats as the last JSON object in stderr.
    let start = stderr
        .rfind('{')
        .ok_or_else(|| StationError::Normalizer("no loudnorm stats in output".to_string()))?;
    let end = stderr[start..]
        .find('}')
        .map(|i| start + i + 1)
        .ok_or_else(|| StationError::Normalizer("truncated loudnorm stats".to_string()))?;
    serde_json::from_str(&stderr[start..end])
        .map_err(|e| StationError::Normalizer(format!("bad loudnorm stats: {e}")))
}

#[async_trait]
impl Normalizer for FfmpegNormalizer {
    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        target: &LoudnessTarget,
    ) -> StationResult<LoudnessReport> {
        let filter = format!(
            "loudnorm=I={}:TP={}:LRA=11:print_format=json",
            target.lufs, target.peak_ceiling_db
        );

        let run = Command::new(&self.binary)
            .arg("-hide_banner")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-af")
            .arg(&filter)
            .arg("-ar")
            .arg("48000")
            .arg(output)
            .output();

        let result = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                StationError::Normalizer(format!("ffmpeg exceeded {:?}", self.timeout))
            })?
            .map_err(|e| StationError::Normalizer(format!("spawn {}: {e}", self.binary)))?;

        let stderr = String::from_utf8_lossy(&result.stderr);
        if !result.status.success() {
            return Err(StationError::Normalizer(format!(
                "ffmpeg exited {}: {}",
                result.status,
                stderr.lines().last().unwrap_or_default()
            )));
        }

        let stats = parse_loudnorm_stats(&stderr)?;
        let lufs_integrated = stats.output_i.parse::<f64>().map_err(|e| {
            StationError::Normalizer(format!("bad output_i {:?}: {e}", stats.output_i))
        })?;
        let peak_db = stats.output_tp.parse::<f64>().map_err(|e| {
            StationError::Normalizer(format!("bad output_tp {:?}: {e}", stats.output_tp))
        })?;

        let normalized = tokio::fs::read(output)
            .await
            .map_err(|e| StationError::Normalizer(format!("read output: {e}")))?;
        let duration_sec = crate::audio::wav_duration_sec(&normalized)?;

        debug!(lufs_integrated, peak_db, duration_sec, "normalization complete");
        Ok(LoudnessReport {
            lufs_integrated,
            peak_db,
            duration_sec,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_per_content_type() {
        assert_eq!(LoudnessTarget::for_content_type("speech").lufs, -16.0);
        assert_eq!(LoudnessTarget::for_content_type("music").lufs, -14.0);
        assert_eq!(LoudnessTarget::for_content_type("speech").peak_ceiling_db, -1.0);
    }

    #[test]
    fn validation_within_tolerance_passes() {
        let target = LoudnessTarget::for_content_type("speech");
        let report = LoudnessReport {
            lufs_integrated: -16.8,
            peak_db: -1.4,
            duration_sec: 12.0,
        };
        assert!(report.validation_errors(&target).is_empty());
    }

    #[test]
    fn validation_flags_loudness_and_peak() {
        let target = LoudnessTarget::for_content_type("speech");
        let report = LoudnessReport {
            lufs_integrated: -13.0,
            peak_db: -0.2,
            duration_sec: 12.0,
        };
        let errors = report.validation_errors(&target);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("integrated loudness"));
        assert!(errors[1].contains("true peak"));
    }

    #[test]
    fn parses_loudnorm_stats_from_stderr() {
        let stderr = "frame= 1000\n[Parsed_loudnorm_0 @ 0x1] \n{\n\
                      \t\"input_i\" : \"-23.02\",\n\
                      \t\"output_i\" : \"-16.10\",\n\
                      \t\"output_tp\" : \"-1.50\"\n}\n";
        let stats = parse_loudnorm_stats(stderr).unwrap();
        assert_eq!(stats.output_i, "-16.10");
        assert_eq!(stats.output_tp, "-1.50");
    }

    #[test]
    fn missing_stats_is_an_error() {
        assert!(parse_loudnorm_stats("no json here").is_err());
    }
}
