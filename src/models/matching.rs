use serde::{Deserialize, Serialize};

use crate::models::CatalogEntry;
use crate::normalize::normalize;

/// A human-chosen item name the run searches for. Immutable once the run
/// starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WatchTerm(pub String);

impl WatchTerm {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable key for the history store, independent of display casing.
    pub fn key(&self) -> String {
        normalize(&self.0)
    }
}

impl From<&str> for WatchTerm {
    fn from(s: &str) -> Self {
        WatchTerm(s.to_string())
    }
}

impl From<String> for WatchTerm {
    fn from(s: String) -> Self {
        WatchTerm(s)
    }
}

/// Which scoring stage produced a match. Ordering mirrors evaluation
/// priority; `NoMatch` means no stage was satisfied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchCriterion {
    Exact,
    SubsetComplete,
    SignificantWords,
    HighSimilarity,
    NoMatch,
}

/// A candidate that scored below the match thresholds but close enough to
/// be worth surfacing when a term goes unmatched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NearMiss {
    pub title: String,
    pub identifier: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    pub watch_term: WatchTerm,
    pub matched: Option<CatalogEntry>,
    pub confidence: f64,
    pub criterion: MatchCriterion,
    /// Diagnostics only; empty unless the term went unmatched.
    pub near_misses: Vec<NearMiss>,
}

impl MatchResult {
    /// Invariant: confidence is zero exactly when no entry matched.
    pub fn matched(
        watch_term: WatchTerm,
        entry: CatalogEntry,
        confidence: f64,
        criterion: MatchCriterion,
    ) -> Self {
        debug_assert!(confidence > 0.0);
        Self {
            watch_term,
            matched: Some(entry),
            confidence,
            criterion,
            near_misses: Vec::new(),
        }
    }

    pub fn unmatched(watch_term: WatchTerm, near_misses: Vec<NearMiss>) -> Self {
        Self {
            watch_term,
            matched: None,
            confidence: 0.0,
            criterion: MatchCriterion::NoMatch,
            near_misses,
        }
    }

    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }
}
