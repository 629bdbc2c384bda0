use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{CatalogEntry, MatchCriterion, MatchResult, NearMiss, WatchTerm};
use crate::normalize::{normalize, words};

/// Tunables for the staged scorer. All thresholds and the stoplist are
/// configuration, not algorithm: they come from `AppConfig` and differ
/// per site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Generic words removed before any word-set comparison.
    pub stopwords: Vec<String>,
    /// Minimum word length for the significant-words stage.
    pub significant_word_len: usize,
    /// Minimum shared significant words for that stage to fire.
    pub significant_min_shared: usize,
    /// Minimum intersection-size / term-word-count ratio.
    pub significant_coverage: f64,
    /// Sequence-similarity floor for the high-similarity stage.
    pub similarity_threshold: f64,
    /// Similarity floor for near-miss diagnostics on unmatched terms.
    pub near_miss_threshold: f64,
    pub near_miss_limit: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            stopwords: [
                "kit", "set", "c", "un", "com", "de", "do", "da", "para", "the", "and", "of",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            significant_word_len: 4,
            significant_min_shared: 2,
            significant_coverage: 0.70,
            similarity_threshold: 0.85,
            near_miss_threshold: 0.40,
            near_miss_limit: 3,
        }
    }
}

/// Outcome of scoring a single term against a single candidate title.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchScore {
    pub criterion: MatchCriterion,
    pub confidence: f64,
}

impl MatchScore {
    const NO_MATCH: MatchScore = MatchScore {
        criterion: MatchCriterion::NoMatch,
        confidence: 0.0,
    };

    pub fn is_match(&self) -> bool {
        self.criterion != MatchCriterion::NoMatch
    }
}

/// Scores one watch term against one catalog title. Criteria are evaluated
/// in strict priority order and the first satisfied one wins; later stages
/// never override an earlier verdict. Never errors: malformed or empty
/// input scores `NoMatch`.
pub struct MatchScorer {
    config: MatchConfig,
    stopwords: HashSet<String>,
}

impl MatchScorer {
    pub fn new(config: MatchConfig) -> Self {
        let stopwords = config.stopwords.iter().map(|w| normalize(w)).collect();
        Self { config, stopwords }
    }

    pub fn score(&self, term: &str, candidate: &str) -> MatchScore {
        let term_norm = normalize(term);
        let cand_norm = normalize(candidate);
        if term_norm.is_empty() || cand_norm.is_empty() {
            return MatchScore::NO_MATCH;
        }

        // 1. Exact / substring
        if cand_norm.contains(&term_norm) {
            return MatchScore {
                criterion: MatchCriterion::Exact,
                confidence: 1.0,
            };
        }

        let term_words = self.content_words(&term_norm);
        let cand_words = self.content_words(&cand_norm);

        // 2. Subset-complete: every term word appears in the candidate.
        // Confidence rewards tighter titles over ones padded with extras.
        if !term_words.is_empty()
            && !cand_words.is_empty()
            && term_words.iter().all(|w| cand_words.contains(w))
        {
            return MatchScore {
                criterion: MatchCriterion::SubsetComplete,
                confidence: term_words.len() as f64 / cand_words.len() as f64,
            };
        }

        // 3. Significant-words: enough long words in common relative to the
        // term. Catches renamed listings that still carry the item's
        // distinctive vocabulary.
        if !term_words.is_empty() {
            let shared = term_words
                .iter()
                .filter(|w| w.chars().count() >= self.config.significant_word_len)
                .filter(|w| cand_words.contains(*w))
                .count();
            let coverage = shared as f64 / term_words.len() as f64;
            if shared >= self.config.significant_min_shared
                && coverage >= self.config.significant_coverage
            {
                return MatchScore {
                    criterion: MatchCriterion::SignificantWords,
                    confidence: coverage,
                };
            }
        }

        // 4. High-similarity over the full normalized strings.
        let ratio = self.similarity(&term_norm, &cand_norm);
        if ratio >= self.config.similarity_threshold {
            return MatchScore {
                criterion: MatchCriterion::HighSimilarity,
                confidence: ratio,
            };
        }

        MatchScore::NO_MATCH
    }

    /// Sequence-similarity ratio over already-normalized strings.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        strsim::normalized_levenshtein(a, b)
    }

    /// Stoplist-filtered word set with inflection folding, so that
    /// "Miniatura Preta" lines up with "Miniaturas Preto".
    fn content_words(&self, normalized: &str) -> HashSet<String> {
        words(normalized)
            .into_iter()
            .filter(|w| !self.stopwords.contains(w))
            .map(|w| fold_word(&w))
            .collect()
    }
}

/// Fold plural/gender endings so word-set comparisons survive the
/// "miniatura preta" vs "miniaturas preto" kind of inflection found in
/// marketplace titles. Words of three characters or fewer pass through.
fn fold_word(word: &str) -> String {
    let mut folded = word.to_string();
    if folded.chars().count() > 3 && folded.ends_with('s') {
        folded.pop();
    }
    if folded.chars().count() > 3 {
        if let Some(last) = folded.chars().last() {
            if matches!(last, 'a' | 'o' | 'e') {
                folded.pop();
            }
        }
    }
    folded
}

/// Maps a fixed watch-list onto one run's catalog. Owns nothing shared:
/// construct one per run and drop it with the run.
pub struct CatalogMatcher {
    scorer: MatchScorer,
    config: MatchConfig,
}

impl CatalogMatcher {
    pub fn new(config: MatchConfig) -> Self {
        Self {
            scorer: MatchScorer::new(config.clone()),
            config,
        }
    }

    /// One result per term, in input order. For each term every entry is
    /// scored and the strictly-highest confidence wins; on ties the entry
    /// seen first in catalog order is kept. An empty catalog yields
    /// all-unmatched results, never an error.
    pub fn match_all(&self, terms: &[WatchTerm], catalog: &[CatalogEntry]) -> Vec<MatchResult> {
        terms
            .iter()
            .map(|term| self.match_one(term, catalog))
            .collect()
    }

    fn match_one(&self, term: &WatchTerm, catalog: &[CatalogEntry]) -> MatchResult {
        let mut best: Option<(&CatalogEntry, MatchScore)> = None;

        for entry in catalog {
            let score = self.scorer.score(term.as_str(), &entry.title);
            if !score.is_match() {
                continue;
            }
            let better = match &best {
                Some((_, current)) => score.confidence > current.confidence,
                None => true,
            };
            if better {
                best = Some((entry, score));
            }
        }

        match best {
            Some((entry, score)) => {
                debug!(
                    term = term.as_str(),
                    title = %entry.title,
                    confidence = score.confidence,
                    criterion = ?score.criterion,
                    "matched watch term"
                );
                MatchResult::matched(term.clone(), entry.clone(), score.confidence, score.criterion)
            }
            None => MatchResult::unmatched(term.clone(), self.near_misses(term, catalog)),
        }
    }

    fn near_misses(&self, term: &WatchTerm, catalog: &[CatalogEntry]) -> Vec<NearMiss> {
        let term_norm = normalize(term.as_str());
        if term_norm.is_empty() {
            return Vec::new();
        }
        let mut misses: Vec<NearMiss> = catalog
            .iter()
            .filter_map(|entry| {
                let similarity = self.scorer.similarity(&term_norm, &normalize(&entry.title));
                (similarity >= self.config.near_miss_threshold).then(|| NearMiss {
                    title: entry.title.clone(),
                    identifier: entry.identifier.clone(),
                    similarity,
                })
            })
            .collect();
        // Stable order: best similarity first, catalog order breaks ties.
        misses.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
        misses.truncate(self.config.near_miss_limit);
        misses
    }
}
