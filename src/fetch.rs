use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::CredentialProvider;
use crate::client::{PageClient, PageOutcome};
use crate::extract::EntryExtractor;
use crate::models::{CatalogEntry, FetchStats};
use crate::session::{AbortReason, NextStep, SessionMachine, SessionSignal};
use crate::utils::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub page_count: u32,
    /// Listing rows per page, used for offset-based pagination.
    pub entries_per_page: usize,
    /// `{base}` and `{offset}` are substituted; page 1 always uses the
    /// bare start URL.
    pub page_url_template: String,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_count: 5,
            entries_per_page: 50,
            page_url_template: "{base}_Desde_{offset}".to_string(),
            jitter_min_ms: 2000,
            jitter_max_ms: 4000,
        }
    }
}

/// Cooperative cancellation, observed at page boundaries. Cancelling never
/// discards what was already fetched.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a fetch pass produced. `complete` is false whenever any page was
/// abandoned; consumers must be able to tell "nothing listed" from
/// "could not finish".
#[derive(Debug)]
pub struct FetchOutcome {
    pub entries: Vec<CatalogEntry>,
    pub complete: bool,
    pub pages_fetched: u32,
    pub stats: FetchStats,
    pub failure: Option<String>,
}

enum PagePass {
    Entries(Vec<CatalogEntry>),
    Aborted(String),
}

/// Drives paginated retrieval through the session state machine. One
/// orchestrator per run; pages are fetched strictly one at a time, both
/// because the machine is not safe for concurrent transitions and to stay
/// inside the site's tolerance.
pub struct FetchOrchestrator {
    config: FetchConfig,
    session: SessionMachine,
    client: PageClient,
    extractor: Box<dyn EntryExtractor>,
    credentials: Box<dyn CredentialProvider>,
    cancel: CancelFlag,
}

impl FetchOrchestrator {
    pub fn new(
        config: FetchConfig,
        session: SessionMachine,
        client: PageClient,
        extractor: Box<dyn EntryExtractor>,
        credentials: Box<dyn CredentialProvider>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            config,
            session,
            client,
            extractor,
            credentials,
            cancel,
        }
    }

    /// Drain pages until `page_count` is reached or a page comes back
    /// empty. An empty *first* page is fatal: either the site changed
    /// under us or the start URL is wrong, and an empty success would
    /// mask it.
    pub async fn fetch_all(&mut self, start_url: &str) -> Result<FetchOutcome> {
        let mut entries: Vec<CatalogEntry> = Vec::new();
        let mut stats = FetchStats::default();
        let mut pages_fetched = 0u32;

        for page in 1..=self.config.page_count {
            if self.cancel.is_cancelled() {
                info!(page, "cancelled at page boundary");
                return Ok(self.incomplete(entries, pages_fetched, stats, "cancelled"));
            }

            if let NextStep::Abort(reason) = self.session.observe(SessionSignal::FetchRequested) {
                return Ok(self.incomplete(entries, pages_fetched, stats, &reason.to_string()));
            }

            let url = build_page_url(
                &self.config.page_url_template,
                start_url,
                page,
                self.config.entries_per_page,
            );

            let page_entries =
                match self.fetch_one_page(&url, page, entries.len(), &mut stats).await? {
                    PagePass::Entries(e) => e,
                    PagePass::Aborted(reason) => {
                        stats.pages_failed += 1;
                        return Ok(self.incomplete(entries, pages_fetched, stats, &reason));
                    }
                };

            if page_entries.is_empty() {
                if page == 1 {
                    return Err(AppError::NoCatalogData);
                }
                info!(page, "empty page, end of results");
                pages_fetched = page;
                break;
            }

            info!(
                page,
                count = page_entries.len(),
                total = entries.len() + page_entries.len(),
                "page fetched"
            );
            entries.extend(page_entries);
            pages_fetched = page;

            if page < self.config.page_count {
                tokio::time::sleep(self.jitter()).await;
            }
        }

        Ok(FetchOutcome {
            entries,
            complete: true,
            pages_fetched,
            stats,
            failure: None,
        })
    }

    /// Fetch a single page, absorbing retries and at most one login
    /// recovery. Retrying is a loop carrying its state in the session
    /// machine, never recursion.
    async fn fetch_one_page(
        &mut self,
        url: &str,
        page: u32,
        position_offset: usize,
        stats: &mut FetchStats,
    ) -> Result<PagePass> {
        loop {
            stats.attempts += 1;

            let step = match self.client.fetch_page(url).await {
                Ok(PageOutcome::Ok(body)) => {
                    self.session.observe(SessionSignal::PageOk);
                    stats.pages_ok += 1;
                    let extracted = self.extractor.extract(&body.body, position_offset)?;
                    return Ok(PagePass::Entries(extracted));
                }
                Ok(PageOutcome::Blocked { challenge_url }) => {
                    match self.session.observe(SessionSignal::BlockDetected) {
                        NextStep::BeginLogin => {
                            self.session.observe(SessionSignal::LoginStarted);
                            self.recover_credentials(&challenge_url).await
                        }
                        step => step,
                    }
                }
                Ok(PageOutcome::RateLimited) => {
                    warn!(page, "rate limited");
                    self.session.observe(SessionSignal::RateLimited)
                }
                Ok(PageOutcome::HttpError { status }) => {
                    warn!(page, status, "http error");
                    self.session.observe(SessionSignal::NetworkError)
                }
                Err(err) => {
                    warn!(page, error = %err, "transport error");
                    self.session.observe(SessionSignal::NetworkError)
                }
            };

            match step {
                NextStep::RetryAfter(delay) => {
                    info!(page, delay_ms = delay.as_millis() as u64, "backing off");
                    tokio::time::sleep(delay).await;
                }
                NextStep::Resume => {
                    // Credentialed client retries the page that triggered
                    // the block; earlier pages are never refetched.
                    self.session.observe(SessionSignal::FetchRequested);
                }
                NextStep::Proceed => {}
                NextStep::Abort(reason) => {
                    // Exhausted local retries surface with the page context
                    // attached; other aborts carry their reason as-is.
                    let message = match reason {
                        AbortReason::RetryBudgetExhausted => AppError::PageFetchFailed {
                            page,
                            attempts: self.session.retries_used(),
                            message: reason.to_string(),
                        }
                        .to_string(),
                        _ => reason.to_string(),
                    };
                    return Ok(PagePass::Aborted(message));
                }
                NextStep::BeginLogin => {
                    // Only produced for BlockDetected, handled above.
                    return Ok(PagePass::Aborted("unexpected login request".to_string()));
                }
            }
        }
    }

    async fn recover_credentials(&mut self, challenge_url: &str) -> NextStep {
        match self.credentials.recover(challenge_url).await {
            Ok(cookies) => {
                self.client.apply_cookies(cookies);
                self.session.observe(SessionSignal::CredentialsObtained)
            }
            Err(err) => {
                warn!(error = %err, "credential recovery failed");
                self.session.observe(SessionSignal::AuthenticationFailed)
            }
        }
    }

    fn incomplete(
        &self,
        entries: Vec<CatalogEntry>,
        pages_fetched: u32,
        stats: FetchStats,
        reason: &str,
    ) -> FetchOutcome {
        warn!(reason, pages_fetched, kept = entries.len(), "fetch incomplete");
        FetchOutcome {
            entries,
            complete: false,
            pages_fetched,
            stats,
            failure: Some(reason.to_string()),
        }
    }

    fn jitter(&self) -> Duration {
        let min = self.config.jitter_min_ms.min(self.config.jitter_max_ms);
        let max = self.config.jitter_max_ms.max(self.config.jitter_min_ms);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Page 1 is the bare start URL; later pages substitute into the
/// configured template, offset counting entries (1-based) like the target
/// site does.
pub fn build_page_url(template: &str, base: &str, page: u32, entries_per_page: usize) -> String {
    if page <= 1 {
        return base.to_string();
    }
    let offset = (page as usize - 1) * entries_per_page + 1;
    template
        .replace("{base}", base)
        .replace("{offset}", &offset.to_string())
}
