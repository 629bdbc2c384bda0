use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::extract::{EntryFilter, dedup_by_identifier};
use crate::fetch::{FetchOrchestrator, FetchOutcome};
use crate::history::HistoryStore;
use crate::matcher::CatalogMatcher;
use crate::models::{Availability, FetchStats, ItemObservation, MatchResult, RunReport, WatchTerm};
use crate::notify::Notifier;
use crate::utils::error::{AppError, Result};

/// One monitoring run: fetch, filter, match, notify, record. Owns its own
/// session machine, client and collaborators through the orchestrator, so
/// several watch-lists can run in parallel as fully isolated `Monitor`
/// values with nothing shared between them.
pub struct Monitor {
    start_url: String,
    terms: Vec<WatchTerm>,
    matcher: CatalogMatcher,
    filter: EntryFilter,
    orchestrator: FetchOrchestrator,
    notifier: Box<dyn Notifier>,
    history: Box<dyn HistoryStore>,
}

impl Monitor {
    pub fn new(
        start_url: String,
        terms: Vec<WatchTerm>,
        matcher: CatalogMatcher,
        filter: EntryFilter,
        orchestrator: FetchOrchestrator,
        notifier: Box<dyn Notifier>,
        history: Box<dyn HistoryStore>,
    ) -> Self {
        Self {
            start_url,
            terms,
            matcher,
            filter,
            orchestrator,
            notifier,
            history,
        }
    }

    /// Execute the run. Fetch-level failures do not raise: the report
    /// comes back with `complete == false` and whatever was matched from
    /// the pages that did arrive. Only setup-class errors return `Err`.
    pub async fn run(&mut self) -> Result<RunReport> {
        let started_at = Utc::now();
        info!(url = %self.start_url, terms = self.terms.len(), "run started");

        let outcome = match self.orchestrator.fetch_all(&self.start_url).await {
            Ok(outcome) => outcome,
            Err(AppError::NoCatalogData) => {
                warn!("first page came back empty; site layout or start URL changed");
                FetchOutcome {
                    entries: Vec::new(),
                    complete: false,
                    pages_fetched: 0,
                    stats: FetchStats::default(),
                    failure: Some(AppError::NoCatalogData.to_string()),
                }
            }
            Err(err) => return Err(err),
        };

        let entries = dedup_by_identifier(self.filter.apply(outcome.entries));
        let results = self.matcher.match_all(&self.terms, &entries);

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            results,
            complete: outcome.complete,
            entries_seen: entries.len(),
            stats: outcome.stats,
            failure: outcome.failure,
        };

        info!(
            matched = report.matched_count(),
            total = report.results.len(),
            entries = report.entries_seen,
            complete = report.complete,
            "matching finished"
        );

        // Collaborator failures are reported, never fatal: the run's
        // findings still reach whoever is left listening.
        let observed_at = report.finished_at;
        for result in &report.results {
            if let Err(err) = self
                .history
                .record(observation_for(result, observed_at))
                .await
            {
                warn!(term = result.watch_term.as_str(), error = %err, "history record failed");
            }
        }

        if let Err(err) = self.notifier.notify(&report).await {
            warn!(error = %err, "notification failed");
        }

        Ok(report)
    }
}

/// One observation per result: unmatched terms are recorded too, so the
/// history can tell "not listed today" from "never checked".
fn observation_for(result: &MatchResult, observed_at: DateTime<Utc>) -> ItemObservation {
    match &result.matched {
        Some(entry) => ItemObservation {
            watch_term_key: result.watch_term.key(),
            price: entry.price,
            observed_at,
            availability: entry.availability,
        },
        None => ItemObservation {
            watch_term_key: result.watch_term.key(),
            price: None,
            observed_at,
            availability: Availability::Unknown,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CatalogEntry, MatchCriterion};
    use rust_decimal::Decimal;

    #[test]
    fn test_observation_for_matched_entry() {
        let result = MatchResult::matched(
            WatchTerm::from("Goku"),
            CatalogEntry::new("Dragon Ball Goku Outfit", "id-1", 1)
                .with_price(Decimal::new(150000, 2)),
            1.0,
            MatchCriterion::Exact,
        );
        let now = Utc::now();
        let obs = observation_for(&result, now);
        assert_eq!(obs.watch_term_key, "goku");
        assert_eq!(obs.price, Some(Decimal::new(150000, 2)));
        assert_eq!(obs.availability, Availability::InStock);
        assert_eq!(obs.observed_at, now);
    }

    #[test]
    fn test_observation_for_unmatched_term() {
        let result = MatchResult::unmatched(WatchTerm::from("Vegeta"), Vec::new());
        let obs = observation_for(&result, Utc::now());
        assert_eq!(obs.watch_term_key, "vegeta");
        assert_eq!(obs.price, None);
        assert_eq!(obs.availability, Availability::Unknown);
    }
}
