use serde::{Deserialize, Serialize};

/// Job priority for queue ordering, `0..=10`. Higher values are claimed
/// first; within a priority level claims are FIFO on `scheduled_for`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPriority(u8);

impl JobPriority {
    /// Highest priority.
    pub const MAX: JobPriority = JobPriority(10);

    /// Lowest priority.
    pub const MIN: JobPriority = JobPriority(0);

    /// Create a priority, clamping to `0..=10`.
    pub fn new(value: u8) -> Self {
        Self(value.min(10))
    }

    /// Get the numeric value for ordering.
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Get the numeric value as i16 for SQL binding.
    pub fn as_i16(self) -> i16 {
        self.0 as i16
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        Self(5)
    }
}

impl From<u8> for JobPriority {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_to_ten() {
        assert_eq!(JobPriority::new(200), JobPriority::MAX);
        assert_eq!(JobPriority::new(7).as_u8(), 7);
    }

    #[test]
    fn default_is_five() {
        assert_eq!(JobPriority::default().as_u8(), 5);
    }

    #[test]
    fn orders_numerically() {
        assert!(JobPriority::new(9) > JobPriority::new(5));
    }
}
