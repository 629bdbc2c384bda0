use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::RunReport;
use crate::utils::error::{AppError, Result};

/// Delivery collaborator: consumes the finished report, owns formatting
/// and transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, report: &RunReport) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: Option<String>,
    pub from_name: String,
    pub to_address: Option<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 465,
            username: None,
            password: None,
            from_address: None,
            from_name: "Shelfwatch".to_string(),
            to_address: None,
        }
    }
}

/// Plain-text run summary over SMTP.
pub struct EmailNotifier {
    config: NotifyConfig,
}

impl EmailNotifier {
    pub fn new(config: NotifyConfig) -> Self {
        Self { config }
    }

    fn subject(report: &RunReport) -> String {
        let tag = if report.complete { "" } else { " [incomplete]" };
        format!(
            "Shelfwatch: {}/{} watch items found{}",
            report.matched_count(),
            report.results.len(),
            tag
        )
    }

    fn body(report: &RunReport) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "Run finished {} ({} catalog entries scanned)",
            report.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
            report.entries_seen
        ));
        if !report.complete {
            let reason = report.failure.as_deref().unwrap_or("unknown");
            lines.push(format!(
                "WARNING: run did not finish cleanly ({reason}); results below are partial."
            ));
        }
        lines.push(String::new());

        for result in &report.results {
            match &result.matched {
                Some(entry) => {
                    let price = entry
                        .price
                        .map(|p| format!("R$ {p}"))
                        .unwrap_or_else(|| "price unavailable".to_string());
                    lines.push(format!(
                        "[FOUND] {} -> {} ({}, confidence {:.2})",
                        result.watch_term.as_str(),
                        entry.title,
                        price,
                        result.confidence
                    ));
                    if let Some(link) = &entry.link {
                        lines.push(format!("        {link}"));
                    }
                }
                None => {
                    lines.push(format!("[  -  ] {}", result.watch_term.as_str()));
                    for miss in &result.near_misses {
                        lines.push(format!(
                            "        near miss: {} ({:.2})",
                            miss.title, miss.similarity
                        ));
                    }
                }
            }
        }

        lines.push(String::new());
        lines.push(format!(
            "Pages attempted: {}, ok: {}, failed: {}",
            report.stats.attempts, report.stats.pages_ok, report.stats.pages_failed
        ));
        lines.join("\n")
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, report: &RunReport) -> Result<()> {
        let from = self
            .config
            .from_address
            .as_deref()
            .ok_or_else(|| AppError::Notification("from_address not configured".to_string()))?;
        let to = self
            .config
            .to_address
            .as_deref()
            .ok_or_else(|| AppError::Notification("to_address not configured".to_string()))?;

        let message = Message::builder()
            .from(
                format!("{} <{}>", self.config.from_name, from)
                    .parse()
                    .map_err(|e| AppError::Notification(format!("bad from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| AppError::Notification(format!("bad to address: {e}")))?)
            .subject(Self::subject(report))
            .header(ContentType::TEXT_PLAIN)
            .body(Self::body(report))
            .map_err(|e| AppError::Notification(format!("message build failed: {e}")))?;

        let mut transport = SmtpTransport::relay(&self.config.smtp_host)
            .map_err(|e| AppError::Notification(format!("smtp relay: {e}")))?
            .port(self.config.smtp_port);

        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            transport = transport.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        transport
            .build()
            .send(&message)
            .map_err(|e| AppError::Notification(format!("smtp send failed: {e}")))?;

        info!(to, "report email sent");
        Ok(())
    }
}

/// Fallback notifier that writes the summary to the log. Used when SMTP
/// is not configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, report: &RunReport) -> Result<()> {
        info!(
            matched = report.matched_count(),
            total = report.results.len(),
            complete = report.complete,
            "run report"
        );
        for line in EmailNotifier::body(report).lines() {
            info!("{line}");
        }
        Ok(())
    }
}
