// Cross-component flows: fetch orchestration through the session state
// machine with scripted collaborators, and the full monitor run on top.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shelfwatch::AppError;
use shelfwatch::auth::{CredentialProvider, SessionCookies};
use shelfwatch::client::{ClientConfig, PageClient};
use shelfwatch::extract::{EntryExtractor, EntryFilter, FilterConfig};
use shelfwatch::fetch::{CancelFlag, FetchConfig, FetchOrchestrator};
use shelfwatch::history::HistoryStore;
use shelfwatch::matcher::{CatalogMatcher, MatchConfig};
use shelfwatch::models::{CatalogEntry, ItemObservation, RunReport, WatchTerm};
use shelfwatch::notify::Notifier;
use shelfwatch::run::Monitor;
use shelfwatch::session::{SessionConfig, SessionMachine};

/// Test extractor over a plain-text body: one "title|id|price" entry per
/// line. Keeps HTML out of flow tests.
struct LineExtractor;

impl EntryExtractor for LineExtractor {
    fn extract(&self, body: &str, position_offset: usize) -> shelfwatch::Result<Vec<CatalogEntry>> {
        Ok(body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(i, line)| {
                let mut parts = line.splitn(3, '|');
                let title = parts.next().unwrap_or_default().trim().to_string();
                let id = parts.next().unwrap_or_default().trim().to_string();
                let price = parts
                    .next()
                    .and_then(|p| Decimal::from_str(p.trim()).ok());
                let mut entry = CatalogEntry::new(title, id, position_offset + i + 1);
                if let Some(price) = price {
                    entry = entry.with_price(price);
                }
                entry
            })
            .collect())
    }
}

/// Scripted credential provider; counts recoveries and hands out a fixed
/// snapshot.
struct ScriptedCredentials {
    calls: Arc<AtomicU32>,
    succeed: bool,
}

#[async_trait]
impl CredentialProvider for ScriptedCredentials {
    async fn recover(&mut self, challenge_url: &str) -> shelfwatch::Result<SessionCookies> {
        assert!(challenge_url.contains("account-verification"));
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            let mut cookies = SessionCookies::new();
            cookies.insert("session", "abc");
            Ok(cookies)
        } else {
            Err(AppError::AuthenticationFailed("no code arrived".to_string()))
        }
    }
}

struct CountingNotifier {
    calls: Arc<AtomicU32>,
    last_complete: Arc<Mutex<Option<bool>>>,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(&self, report: &RunReport) -> shelfwatch::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_complete.lock().unwrap() = Some(report.complete);
        Ok(())
    }
}

struct SharedHistory(Arc<Mutex<Vec<ItemObservation>>>);

#[async_trait]
impl HistoryStore for SharedHistory {
    async fn record(&mut self, observation: ItemObservation) -> shelfwatch::Result<()> {
        self.0.lock().unwrap().push(observation);
        Ok(())
    }
}

fn fetch_config(page_count: u32) -> FetchConfig {
    FetchConfig {
        page_count,
        entries_per_page: 50,
        page_url_template: "{base}_Desde_{offset}".to_string(),
        jitter_min_ms: 0,
        jitter_max_ms: 0,
    }
}

fn session_config() -> SessionConfig {
    SessionConfig {
        max_retries: 3,
        backoff_base_ms: 10,
        backoff_cap_ms: 30,
        rate_limit_cooldown_ms: 10,
    }
}

fn client() -> PageClient {
    PageClient::new(ClientConfig {
        user_agent: "ShelfwatchTest/1.0".to_string(),
        request_timeout: 5,
        block_url_markers: vec!["account-verification".to_string()],
    })
    .unwrap()
}

fn orchestrator(
    page_count: u32,
    credentials: Box<dyn CredentialProvider>,
    cancel: CancelFlag,
) -> FetchOrchestrator {
    FetchOrchestrator::new(
        fetch_config(page_count),
        SessionMachine::new(session_config()),
        client(),
        Box::new(LineExtractor),
        credentials,
        cancel,
    )
}

fn no_credentials() -> Box<dyn CredentialProvider> {
    Box::new(ScriptedCredentials {
        calls: Arc::new(AtomicU32::new(0)),
        succeed: false,
    })
}

async fn mount_page(server: &MockServer, page_path: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_challenge(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/account-verification"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(server)
        .await;
}

#[tokio::test]
async fn happy_path_stops_at_empty_page() {
    let server = MockServer::start().await;
    mount_page(&server, "/list", "Goku Outfit|id-1|1500.00\nMystery Bundle|id-2|800.00").await;
    mount_page(&server, "/list_Desde_51", "").await;

    let mut orch = orchestrator(5, no_credentials(), CancelFlag::new());
    let outcome = orch
        .fetch_all(&format!("{}/list", server.uri()))
        .await
        .unwrap();

    assert!(outcome.complete);
    assert_eq!(outcome.entries.len(), 2);
    assert_eq!(outcome.entries[0].position, 1);
    assert!(outcome.failure.is_none());
}

#[tokio::test]
async fn empty_first_page_is_no_catalog_data_not_empty_success() {
    let server = MockServer::start().await;
    mount_page(&server, "/list", "").await;

    let mut orch = orchestrator(5, no_credentials(), CancelFlag::new());
    let err = orch
        .fetch_all(&format!("{}/list", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NoCatalogData));
}

#[tokio::test]
async fn block_on_page_three_logs_in_once_and_resumes_there() {
    let server = MockServer::start().await;
    mount_challenge(&server).await;
    mount_page(&server, "/list", "A|id-1|10.00").await;
    mount_page(&server, "/list_Desde_51", "B|id-2|20.00").await;

    // Page 3 blocks exactly once, then serves normally.
    Mock::given(method("GET"))
        .and(path("/list_Desde_101"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/account-verification"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_page(&server, "/list_Desde_101", "C|id-3|30.00").await;

    // Pages after the login must carry the transferred cookie snapshot.
    Mock::given(method("GET"))
        .and(path("/list_Desde_151"))
        .and(header("cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("D|id-4|40.00"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/list_Desde_201"))
        .and(header("cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("E|id-5|50.00"))
        .mount(&server)
        .await;

    let calls = Arc::new(AtomicU32::new(0));
    let credentials = Box::new(ScriptedCredentials {
        calls: Arc::clone(&calls),
        succeed: true,
    });

    let mut orch = orchestrator(5, credentials, CancelFlag::new());
    let outcome = orch
        .fetch_all(&format!("{}/list", server.uri()))
        .await
        .unwrap();

    assert!(outcome.complete);
    assert_eq!(outcome.pages_fetched, 5);
    let ids: Vec<&str> = outcome.entries.iter().map(|e| e.identifier.as_str()).collect();
    assert_eq!(ids, vec!["id-1", "id-2", "id-3", "id-4", "id-5"]);
    // One login sub-flow, ever.
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Earlier pages were not refetched after the login.
    let page_one_hits = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/list")
        .count();
    assert_eq!(page_one_hits, 1);
}

#[tokio::test]
async fn second_block_after_login_aborts_with_partial_entries() {
    let server = MockServer::start().await;
    mount_challenge(&server).await;
    mount_page(&server, "/list", "A|id-1|10.00").await;

    // Page 2 blocks on every request: once before the login, once after.
    Mock::given(method("GET"))
        .and(path("/list_Desde_51"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/account-verification"))
        .mount(&server)
        .await;

    let calls = Arc::new(AtomicU32::new(0));
    let credentials = Box::new(ScriptedCredentials {
        calls: Arc::clone(&calls),
        succeed: true,
    });

    let mut orch = orchestrator(5, credentials, CancelFlag::new());
    let outcome = orch
        .fetch_all(&format!("{}/list", server.uri()))
        .await
        .unwrap();

    assert!(!outcome.complete);
    assert_eq!(outcome.entries.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(
        outcome
            .failure
            .as_deref()
            .unwrap()
            .contains("blocked again after completed login")
    );
}

#[tokio::test]
async fn failed_authentication_returns_partial_entries() {
    let server = MockServer::start().await;
    mount_challenge(&server).await;
    mount_page(&server, "/list", "A|id-1|10.00").await;
    Mock::given(method("GET"))
        .and(path("/list_Desde_51"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/account-verification"))
        .mount(&server)
        .await;

    let mut orch = orchestrator(5, no_credentials(), CancelFlag::new());
    let outcome = orch
        .fetch_all(&format!("{}/list", server.uri()))
        .await
        .unwrap();

    assert!(!outcome.complete);
    assert_eq!(outcome.entries.len(), 1);
    assert!(
        outcome
            .failure
            .as_deref()
            .unwrap()
            .contains("authentication failed")
    );
}

#[tokio::test]
async fn retry_budget_exhaustion_keeps_accumulated_entries() {
    let server = MockServer::start().await;
    mount_page(&server, "/list", "A|id-1|10.00").await;
    Mock::given(method("GET"))
        .and(path("/list_Desde_51"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut orch = orchestrator(5, no_credentials(), CancelFlag::new());
    let outcome = orch
        .fetch_all(&format!("{}/list", server.uri()))
        .await
        .unwrap();

    assert!(!outcome.complete);
    assert_eq!(outcome.entries.len(), 1);
    assert!(
        outcome
            .failure
            .as_deref()
            .unwrap()
            .contains("retry budget exhausted")
    );
    assert!(outcome.stats.attempts > 1);
}

#[tokio::test]
async fn cancellation_at_page_boundary_returns_what_was_fetched() {
    let server = MockServer::start().await;
    mount_page(&server, "/list", "A|id-1|10.00").await;

    let cancel = CancelFlag::new();
    cancel.cancel();

    let mut orch = orchestrator(5, no_credentials(), cancel);
    let outcome = orch
        .fetch_all(&format!("{}/list", server.uri()))
        .await
        .unwrap();

    assert!(!outcome.complete);
    assert_eq!(outcome.failure.as_deref(), Some("cancelled"));
    assert!(outcome.entries.is_empty());
}

#[tokio::test]
async fn monitor_run_matches_notifies_and_records_history() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/list",
        "Dragon Ball Goku Outfit|id-1|1500.00\nMystery Bundle|id-2|800.00",
    )
    .await;
    mount_page(&server, "/list_Desde_51", "").await;

    let notify_calls = Arc::new(AtomicU32::new(0));
    let notified_complete = Arc::new(Mutex::new(None));
    let observations = Arc::new(Mutex::new(Vec::new()));

    let mut monitor = Monitor::new(
        format!("{}/list", server.uri()),
        vec![WatchTerm::from("Goku"), WatchTerm::from("Vegeta")],
        CatalogMatcher::new(MatchConfig::default()),
        EntryFilter::new(&FilterConfig::default()),
        orchestrator(5, no_credentials(), CancelFlag::new()),
        Box::new(CountingNotifier {
            calls: Arc::clone(&notify_calls),
            last_complete: Arc::clone(&notified_complete),
        }),
        Box::new(SharedHistory(Arc::clone(&observations))),
    );

    let report = monitor.run().await.unwrap();

    assert!(report.complete);
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].watch_term, WatchTerm::from("Goku"));
    assert!(report.results[0].is_match());
    assert!(!report.results[1].is_match());

    assert_eq!(notify_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*notified_complete.lock().unwrap(), Some(true));

    let observations = observations.lock().unwrap();
    assert_eq!(observations.len(), 2);
    assert_eq!(observations[0].watch_term_key, "goku");
    assert_eq!(observations[0].price, Some(Decimal::new(150000, 2)));
    assert_eq!(observations[1].price, None);
}

#[tokio::test]
async fn monitor_run_tags_no_catalog_data_as_failed_not_empty() {
    let server = MockServer::start().await;
    mount_page(&server, "/list", "").await;

    let mut monitor = Monitor::new(
        format!("{}/list", server.uri()),
        vec![WatchTerm::from("Goku")],
        CatalogMatcher::new(MatchConfig::default()),
        EntryFilter::new(&FilterConfig::default()),
        orchestrator(5, no_credentials(), CancelFlag::new()),
        Box::new(CountingNotifier {
            calls: Arc::new(AtomicU32::new(0)),
            last_complete: Arc::new(Mutex::new(None)),
        }),
        Box::new(SharedHistory(Arc::new(Mutex::new(Vec::new())))),
    );

    let report = monitor.run().await.unwrap();

    assert!(!report.complete);
    assert!(report.failure.is_some());
    // Distinguishable from "nothing matched": the failure tag is set and
    // the run is marked incomplete.
    assert_eq!(report.results.len(), 1);
    assert!(!report.results[0].is_match());
}
