use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use shelfwatch::auth::{BrowserAuthenticator, CredentialProvider, NoCredentials};
use shelfwatch::client::PageClient;
use shelfwatch::config::AppConfig;
use shelfwatch::extract::{CssEntryExtractor, EntryFilter};
use shelfwatch::fetch::{CancelFlag, FetchOrchestrator};
use shelfwatch::history::MemoryHistory;
use shelfwatch::matcher::CatalogMatcher;
use shelfwatch::models::WatchTerm;
use shelfwatch::notify::{EmailNotifier, LogNotifier, Notifier};
use shelfwatch::otp::{OtpRetriever, SpoolMailbox};
use shelfwatch::run::Monitor;
use shelfwatch::session::SessionMachine;

#[derive(Parser)]
#[command(name = "shelfwatch", about = "Watch-list monitoring for hostile product catalogs")]
struct Args {
    /// Override the configured page count.
    #[arg(long)]
    pages: Option<u32>,
    /// Override the configured watch-list (repeatable).
    #[arg(long = "term")]
    terms: Vec<String>,
    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shelfwatch=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(pages) = args.pages {
        config.fetch.page_count = pages;
    }
    if !args.terms.is_empty() {
        config.watch.terms = args.terms.clone();
    }
    config.validate()?;

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing current page");
                cancel.cancel();
            }
        });
    }

    let credentials: Box<dyn CredentialProvider> = match &config.otp.spool_dir {
        Some(dir) => Box::new(BrowserAuthenticator::new(
            config.login.clone(),
            OtpRetriever::new(config.otp.clone()),
            SpoolMailbox::new(dir.clone()),
        )),
        None => Box::new(NoCredentials),
    };

    let notifier: Box<dyn Notifier> = if config.notify.to_address.is_some() {
        Box::new(EmailNotifier::new(config.notify.clone()))
    } else {
        Box::new(LogNotifier)
    };

    let orchestrator = FetchOrchestrator::new(
        config.fetch.clone(),
        SessionMachine::new(config.session.clone()),
        PageClient::new(config.client.clone())?,
        Box::new(CssEntryExtractor::new(config.extract.clone())?),
        credentials,
        cancel,
    );

    let terms: Vec<WatchTerm> = config.watch.terms.iter().map(|t| t.as_str().into()).collect();
    let mut monitor = Monitor::new(
        config.watch.start_url.clone(),
        terms,
        CatalogMatcher::new(config.matching.clone()),
        EntryFilter::new(&config.filter),
        orchestrator,
        notifier,
        Box::new(MemoryHistory::new()),
    );

    let report = monitor.run().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    info!(
        matched = report.matched_count(),
        total = report.results.len(),
        complete = report.complete,
        "run finished"
    );

    if !report.complete {
        anyhow::bail!(
            "run incomplete: {}",
            report.failure.as_deref().unwrap_or("unknown failure")
        );
    }
    Ok(())
}
