use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Availability, MatchResult};

/// Per-run fetch bookkeeping, reported and logged at the end of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchStats {
    pub attempts: u32,
    pub pages_ok: u32,
    pub pages_failed: u32,
}

impl FetchStats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        f64::from(self.pages_ok) / f64::from(self.attempts)
    }
}

/// What one run produced. A failed run still carries everything matched so
/// far, tagged incomplete. Downstream consumers must be able to tell
/// "found nothing" from "could not finish".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<MatchResult>,
    pub complete: bool,
    pub entries_seen: usize,
    pub stats: FetchStats,
    /// Terminal failure that cut the run short, if any.
    pub failure: Option<String>,
}

impl RunReport {
    pub fn matched_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_match()).count()
    }
}

/// The tuple handed to the history store, one per watch term per run.
/// Dedup and lowest-price policy belong to the store, not to us.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemObservation {
    pub watch_term_key: String,
    pub price: Option<Decimal>,
    pub observed_at: DateTime<Utc>,
    pub availability: Availability,
}
