use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Note attached to a record that is missing one or more contributions.
pub const DEGRADED_NOTE: &str = "some data is temporarily unavailable";

const MAX_KEY_LEN: usize = 128;

/// Opaque identifier scoping one aggregation. Identical keys always address
/// the same logical aggregate, both in the cache and in the merged record.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct AggregationKey(String);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("aggregation key cannot be empty")]
    Empty,

    #[error("aggregation key exceeds {MAX_KEY_LEN} bytes")]
    TooLong,

    #[error("aggregation key contains whitespace or control characters")]
    InvalidCharacters,
}

impl FromStr for AggregationKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, KeyError> {
        if s.is_empty() {
            return Err(KeyError::Empty);
        }
        if s.len() > MAX_KEY_LEN {
            return Err(KeyError::TooLong);
        }
        if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(KeyError::InvalidCharacters);
        }
        Ok(AggregationKey(s.to_string()))
    }
}

impl AggregationKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Merged output for one aggregation key.
///
/// One entry per configured upstream, in configured order; `None` marks a
/// contribution that could not be fetched. Once built (and possibly cached)
/// a record is never mutated; refreshes replace the whole entry.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AggregateRecord {
    pub sections: IndexMap<String, Option<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AggregateRecord {
    /// Whether every upstream contributed. Only complete records are cached.
    pub fn is_complete(&self) -> bool {
        self.sections.values().all(|section| section.is_some())
    }
}
