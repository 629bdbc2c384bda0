use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::models::CatalogEntry;
use crate::normalize::normalize;
use crate::utils::error::{AppError, Result};

/// Turns one raw page body into catalog entries. The concrete markup
/// strategy is a collaborator concern; the orchestrator only sees this
/// seam.
pub trait EntryExtractor: Send + Sync {
    /// `position_offset` is the count of entries already produced by
    /// earlier pages, so positions number the whole result set.
    fn extract(&self, body: &str, position_offset: usize) -> Result<Vec<CatalogEntry>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Tried in order; the first selector that yields elements wins.
    /// Listing markup changes often enough that a single selector is a
    /// liability.
    pub entry_selectors: Vec<String>,
    /// Regex whose first match against the entry link becomes the
    /// identifier.
    pub id_pattern: String,
    /// Normalized substrings marking a sold-out tile.
    pub sold_out_markers: Vec<String>,
    /// Base for absolutizing relative links.
    pub base_url: Option<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            entry_selectors: vec![
                "li.ui-search-layout__item".to_string(),
                "div.ui-search-result__wrapper".to_string(),
                "article".to_string(),
            ],
            id_pattern: r"MLB-?\d+".to_string(),
            sold_out_markers: vec!["esgotado".to_string(), "sold out".to_string()],
            base_url: None,
        }
    }
}

pub struct CssEntryExtractor {
    config: ExtractConfig,
    id_regex: Regex,
    link_selector: Selector,
}

impl CssEntryExtractor {
    pub fn new(config: ExtractConfig) -> Result<Self> {
        let id_regex = Regex::new(&config.id_pattern)
            .map_err(|e| AppError::Extraction(format!("bad id pattern: {e}")))?;
        let link_selector =
            Selector::parse("a[href]").map_err(|e| AppError::Extraction(format!("{e:?}")))?;
        Ok(Self {
            config,
            id_regex,
            link_selector,
        })
    }

    fn extract_entry(&self, element: ElementRef<'_>, position: usize) -> Option<CatalogEntry> {
        let link_elem = element.select(&self.link_selector).next()?;

        let title = link_elem
            .value()
            .attr("title")
            .map(str::to_string)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| collect_text(link_elem));
        if title.trim().is_empty() {
            return None;
        }

        let href = link_elem.value().attr("href")?;
        let link = self.absolutize(href);

        let identifier = self
            .id_regex
            .find(&link)
            .map(|m| m.as_str().replace('-', ""))
            .unwrap_or_else(|| format!("pos-{position}"));

        let text = collect_text(element);
        let text_norm = normalize(&text);

        let mut entry = CatalogEntry::new(title.trim(), identifier, position).with_link(link);
        if self
            .config
            .sold_out_markers
            .iter()
            .any(|m| text_norm.contains(&normalize(m)))
        {
            entry = entry.sold_out();
        } else if let Some(price) = parse_price(&text) {
            entry = entry.with_price(price);
        }
        Some(entry)
    }

    fn absolutize(&self, href: &str) -> String {
        if href.starts_with("http") {
            return href.to_string();
        }
        match &self.config.base_url {
            Some(base) => match url::Url::parse(base).and_then(|b| b.join(href)) {
                Ok(joined) => joined.to_string(),
                Err(_) => href.to_string(),
            },
            None => href.to_string(),
        }
    }
}

impl EntryExtractor for CssEntryExtractor {
    fn extract(&self, body: &str, position_offset: usize) -> Result<Vec<CatalogEntry>> {
        let document = Html::parse_document(body);

        for selector_str in &self.config.entry_selectors {
            let selector = match Selector::parse(selector_str) {
                Ok(s) => s,
                Err(e) => {
                    warn!(selector = %selector_str, "invalid entry selector: {e:?}");
                    continue;
                }
            };

            let elements: Vec<ElementRef> = document.select(&selector).collect();
            if elements.is_empty() {
                continue;
            }
            debug!(
                selector = %selector_str,
                count = elements.len(),
                "entry selector matched"
            );

            let entries: Vec<CatalogEntry> = elements
                .iter()
                .enumerate()
                .filter_map(|(i, el)| self.extract_entry(*el, position_offset + i + 1))
                .collect();
            return Ok(entries);
        }

        Ok(Vec::new())
    }
}

fn collect_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

/// Parse a listing price out of free text. Currency-anchored on purpose:
/// bare digit runs (scale fractions like "1/43", model numbers) must never
/// turn into prices.
pub fn parse_price(text: &str) -> Option<Decimal> {
    // Brazilian thousands-dot + comma-cents first; it is the strictest.
    let br = Regex::new(r"R\$\s*(\d{1,3}(?:\.\d{3})*(?:,\d{2})?)").unwrap();
    if let Some(captures) = br.captures(text) {
        let raw = captures.get(1)?.as_str().replace('.', "").replace(',', ".");
        return Decimal::from_str(&raw).ok();
    }
    let symbol = Regex::new(r"[$€£]\s*(\d{1,3}(?:,\d{3})*(?:\.\d{2})?)").unwrap();
    symbol
        .captures(text)
        .and_then(|c| Decimal::from_str(&c.get(1)?.as_str().replace(',', "")).ok())
}

/// Pre-match listing filter: required terms, title exclusions, identifier
/// exclusions. All comparisons go through the normalizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Keep only entries whose title contains at least one of these.
    /// Empty list keeps everything.
    pub required_terms: Vec<String>,
    pub excluded_title_terms: Vec<String>,
    pub excluded_identifiers: Vec<String>,
}

pub struct EntryFilter {
    required: Vec<String>,
    excluded_titles: Vec<String>,
    excluded_ids: HashSet<String>,
}

impl EntryFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            required: config.required_terms.iter().map(|t| normalize(t)).collect(),
            excluded_titles: config
                .excluded_title_terms
                .iter()
                .map(|t| normalize(t))
                .collect(),
            excluded_ids: config
                .excluded_identifiers
                .iter()
                .map(|t| normalize(t))
                .collect(),
        }
    }

    pub fn apply(&self, entries: Vec<CatalogEntry>) -> Vec<CatalogEntry> {
        entries
            .into_iter()
            .filter(|entry| {
                let title = normalize(&entry.title);
                if self.excluded_ids.contains(&normalize(&entry.identifier)) {
                    return false;
                }
                if self.excluded_titles.iter().any(|t| title.contains(t.as_str())) {
                    return false;
                }
                if !self.required.is_empty()
                    && !self.required.iter().any(|t| title.contains(t.as_str()))
                {
                    return false;
                }
                true
            })
            .collect()
    }
}

/// Collapse duplicate identifiers across pages, keeping the first
/// occurrence (the one with the better position).
pub fn dedup_by_identifier(entries: Vec<CatalogEntry>) -> Vec<CatalogEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| seen.insert(entry.identifier.clone()))
        .collect()
}
