use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::normalize::normalize;
use crate::utils::error::{AppError, Result};

/// A one-time passcode: exactly six ASCII digits. Consumed by value when
/// typed into the challenge form; a code is never used twice.
#[derive(Debug, PartialEq, Eq)]
pub struct OtpCode(String);

impl OtpCode {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (trimmed.len() == 6 && trimmed.bytes().all(|b| b.is_ascii_digit()))
            .then(|| OtpCode(trimmed.to_string()))
    }

    /// Hand over the digits, consuming the code.
    pub fn into_digits(self) -> String {
        self.0
    }
}

/// One mailbox message as the retriever sees it. The mailbox collaborator
/// owns protocol details; we only need sender, arrival time and body text.
#[derive(Debug, Clone)]
pub struct MailMessage {
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub body: String,
}

/// Read-side mailbox collaborator: list recent messages, read bodies,
/// close. The retriever owns the connection for exactly one
/// authentication attempt.
#[async_trait]
pub trait Mailbox: Send {
    async fn recent_messages(&mut self, limit: usize) -> Result<Vec<MailMessage>>;
    async fn close(&mut self) -> Result<()>;
}

/// What to do when no disclaimer phrase is found in a message body.
/// `LastDigitRun` mirrors the historical behavior; `DisclaimerOnly`
/// refuses to guess and keeps polling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OtpFallback {
    LastDigitRun,
    DisclaimerOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpConfig {
    /// Substring matched against the normalized From header.
    pub expected_sender: String,
    /// Phrases whose trailing digit run is preferred, checked in order.
    pub disclaimer_phrases: Vec<String>,
    pub fallback: OtpFallback,
    pub max_attempts: u32,
    pub poll_interval_ms: u64,
    /// How many recent messages to scan per poll.
    pub scan_limit: usize,
    /// Directory the external mail bridge drops message files into. When
    /// unset, credential recovery is disabled for the run.
    pub spool_dir: Option<String>,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            expected_sender: "noreply".to_string(),
            disclaimer_phrases: vec!["nao compartilhe".to_string(), "do not share".to_string()],
            fallback: OtpFallback::LastDigitRun,
            max_attempts: 8,
            poll_interval_ms: 8000,
            scan_limit: 5,
            spool_dir: None,
        }
    }
}

/// Polls a mailbox for a fresh verification code.
pub struct OtpRetriever {
    config: OtpConfig,
    digit_run: Regex,
}

impl OtpRetriever {
    pub fn new(config: OtpConfig) -> Self {
        Self {
            config,
            digit_run: Regex::new(r"\b(\d{6})\b").unwrap(),
        }
    }

    /// Bounded poll loop. Only codes from messages that arrived after
    /// `sent_after` count; anything older belongs to a previous attempt.
    /// The mailbox is closed on both the success and the failure path.
    pub async fn wait_for_code<M: Mailbox + ?Sized>(
        &self,
        mailbox: &mut M,
        sent_after: DateTime<Utc>,
    ) -> Result<OtpCode> {
        let outcome = self.poll(mailbox, sent_after).await;
        if let Err(err) = mailbox.close().await {
            warn!(error = %err, "failed to close mailbox");
        }
        outcome
    }

    async fn poll<M: Mailbox + ?Sized>(
        &self,
        mailbox: &mut M,
        sent_after: DateTime<Utc>,
    ) -> Result<OtpCode> {
        let sender_key = normalize(&self.config.expected_sender);

        for attempt in 1..=self.config.max_attempts {
            debug!(attempt, max = self.config.max_attempts, "polling mailbox");

            let mut candidates: Vec<MailMessage> = mailbox
                .recent_messages(self.config.scan_limit)
                .await?
                .into_iter()
                .filter(|m| normalize(&m.sender).contains(&sender_key))
                .filter(|m| m.received_at > sent_after)
                .collect();

            // Most recent sender-matching message wins.
            candidates.sort_by(|a, b| b.received_at.cmp(&a.received_at));

            for message in &candidates {
                if let Some(code) = self.extract_code(&message.body) {
                    info!(received_at = %message.received_at, "verification code found");
                    return Ok(code);
                }
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
            }
        }

        Err(AppError::OtpNotFound {
            attempts: self.config.max_attempts,
        })
    }

    /// Deterministic extraction order: the digit run following the first
    /// disclaimer phrase present wins; otherwise the configured fallback
    /// applies.
    fn extract_code(&self, body: &str) -> Option<OtpCode> {
        let text = normalize(body);

        for phrase in &self.config.disclaimer_phrases {
            let phrase_norm = normalize(phrase);
            if phrase_norm.is_empty() {
                continue;
            }
            if let Some(idx) = text.find(&phrase_norm) {
                let tail = &text[idx + phrase_norm.len()..];
                if let Some(m) = self.digit_run.find(tail) {
                    return OtpCode::parse(m.as_str());
                }
            }
        }

        match self.config.fallback {
            OtpFallback::LastDigitRun => self
                .digit_run
                .find_iter(&text)
                .last()
                .and_then(|m| OtpCode::parse(m.as_str())),
            OtpFallback::DisclaimerOnly => None,
        }
    }
}

/// Mailbox over a spool directory: an external bridge (IMAP, Maildir
/// sync, whatever the deployment uses) drops one file per message. First
/// line is the From header, the rest is the body; arrival time is the
/// file's modification time.
pub struct SpoolMailbox {
    dir: std::path::PathBuf,
}

impl SpoolMailbox {
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read_message(path: &std::path::Path) -> Option<MailMessage> {
        let metadata = std::fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        let received_at: DateTime<Utc> = metadata.modified().ok()?.into();
        let content = std::fs::read_to_string(path).ok()?;
        let (first, rest) = content.split_once('\n')?;
        let sender = first.strip_prefix("From:").unwrap_or(first).trim().to_string();
        Some(MailMessage {
            sender,
            received_at,
            body: rest.to_string(),
        })
    }
}

#[async_trait]
impl Mailbox for SpoolMailbox {
    async fn recent_messages(&mut self, limit: usize) -> Result<Vec<MailMessage>> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| AppError::Mailbox(format!("spool dir {}: {e}", self.dir.display())))?;

        let mut messages: Vec<MailMessage> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| Self::read_message(&entry.path()))
            .collect();
        messages.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
