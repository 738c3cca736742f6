use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::AssetId;

/// Loudness validation outcome for a mastered asset. Assets are immutable
/// once validation leaves `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Not yet mastered
    Pending,

    /// Loudness and peak within tolerance
    Passed,

    /// Out of tolerance; errors recorded
    Failed,
}

impl ValidationStatus {
    /// Get the status name as a string.
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A content-addressed audio artifact in the blob store.
///
/// Two assets with the same `content_hash` and passed validation are
/// interchangeable; mastering rebinds segments to the earlier asset rather
/// than re-normalizing and re-uploading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// Unique asset identifier
    pub id: AssetId,

    /// sha-256 of the raw audio bytes, lowercase hex
    pub content_hash: String,

    /// Blob-store path of the current object
    pub storage_path: String,

    /// Measured integrated loudness after normalization
    pub lufs_integrated: Option<f64>,

    /// Measured true peak after normalization
    pub peak_db: Option<f64>,

    /// Measured duration
    pub duration_sec: Option<f64>,

    /// Validation outcome
    pub validation_status: ValidationStatus,

    /// Validation error descriptions when failed
    pub validation_errors: Vec<String>,

    /// Free-form metadata (`duplicate_of` is recorded here on dedupe)
    pub metadata: HashMap<String, serde_json::Value>,

    /// When the asset row was created
    pub created_at: DateTime<Utc>,

    /// When the asset row was last updated
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    /// Create a pending asset for freshly rendered raw audio.
    pub fn new(content_hash: impl Into<String>, storage_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: AssetId::new(),
            content_hash: content_hash.into(),
            storage_path: storage_path.into(),
            lufs_integrated: None,
            peak_db: None,
            duration_sec: None,
            validation_status: ValidationStatus::Pending,
            validation_errors: Vec::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record the asset this one duplicates.
    pub fn mark_duplicate_of(&mut self, original: &AssetId) {
        self.metadata.insert(
            "duplicate_of".to_string(),
            serde_json::Value::String(original.to_string()),
        );
        self.updated_at = Utc::now();
    }

    /// Whether this asset can satisfy a ready segment.
    pub fn is_playable(&self) -> bool {
        self.validation_status == ValidationStatus::Passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_asset_is_pending() {
        let asset = Asset::new("abc123", "audio-assets/raw/x.wav");
        assert_eq!(asset.validation_status, ValidationStatus::Pending);
        assert!(!asset.is_playable());
    }

    #[test]
    fn duplicate_marker_lands_in_metadata() {
        let original = AssetId::from("a1");
        let mut dup = Asset::new("abc123", "audio-assets/raw/y.wav");
        dup.mark_duplicate_of(&original);
        assert_eq!(
            dup.metadata.get("duplicate_of").and_then(|v| v.as_str()),
            Some("a1")
        );
    }
}
