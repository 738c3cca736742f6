//! Environment-driven station configuration.
//!
//! Every external dependency the pipeline consumes is addressed through an
//! environment variable; tunables carry production defaults. Component-level
//! knobs (chunker window sizes, retrieval weights, worker concurrency)
//! live next to their components — this is only the process-wide surface.

use std::time::Duration;

/// Process-wide configuration assembled from the environment.
#[derive(Debug, Clone)]
pub struct StationConfig {
    /// Relational store connection string
    pub database_url: Option<String>,

    /// API key for the LLM completion service
    pub llm_api_key: Option<String>,

    /// API key for the embedding service
    pub embedding_api_key: Option<String>,

    /// Base URL of the external TTS server
    pub tts_url: String,

    /// Base URL of the blob store (S3-compatible endpoint)
    pub blob_url: Option<String>,

    /// Access key for the blob store
    pub blob_key: Option<String>,

    /// Concurrency cap per worker process
    pub max_concurrent_jobs: usize,

    /// Years added to wall clock to obtain the in-universe broadcast year
    pub future_year_offset: i32,

    /// Minimum acceptable tone score for generated scripts
    pub tone_min_acceptable_score: u32,

    /// Log filter directive handed to the tracing subscriber
    pub log_level: String,
}

impl StationConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self {
            database_url: env_string("DATABASE_URL"),
            llm_api_key: env_string("LLM_API_KEY"),
            embedding_api_key: env_string("EMBEDDING_API_KEY"),
            tts_url: env_string("TTS_URL").unwrap_or_else(|| "http://localhost:8100".to_string()),
            blob_url: env_string("BLOB_URL"),
            blob_key: env_string("BLOB_KEY"),
            max_concurrent_jobs: env_parse("MAX_CONCURRENT_JOBS").unwrap_or(4),
            future_year_offset: env_parse("FUTURE_YEAR_OFFSET").unwrap_or(500),
            tone_min_acceptable_score: env_parse("TONE_MIN_ACCEPTABLE_SCORE").unwrap_or(70),
            log_level: env_string("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        }
    }

    /// Drain deadline granted to in-flight handlers on shutdown.
    pub fn drain_deadline(&self) -> Duration {
        Duration::from_secs(30)
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            llm_api_key: None,
            embedding_api_key: None,
            tts_url: "http://localhost:8100".to_string(),
            blob_url: None,
            blob_key: None,
            max_concurrent_jobs: 4,
            future_year_offset: 500,
            tone_min_acceptable_score: 70,
            log_level: "info".to_string(),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_spec_constants() {
        let config = StationConfig::default();
        assert_eq!(config.future_year_offset, 500);
        assert_eq!(config.tone_min_acceptable_score, 70);
        assert_eq!(config.max_concurrent_jobs, 4);
    }
}
