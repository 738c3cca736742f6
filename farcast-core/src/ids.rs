use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declares a string-backed identifier newtype with uuid generation.
macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new unique identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Get the inner string value.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id! {
    /// Unique identifier for a broadcast segment
    SegmentId
}

string_id! {
    /// Unique identifier for an audio asset
    AssetId
}

string_id! {
    /// Unique identifier for a knowledge-base chunk
    ChunkId
}

string_id! {
    /// Identifier of an upstream source row (universe doc or event)
    SourceId
}

string_id! {
    /// Identifier of a broadcast program
    ProgramId
}
