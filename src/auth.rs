use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::otp::{Mailbox, OtpRetriever};
use crate::utils::error::{AppError, Result};

/// Opaque key/value snapshot of an authenticated browser session. Copied
/// into the HTTP client, never shared with the browser that produced it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionCookies {
    entries: BTreeMap<String, String>,
}

impl SessionCookies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as a `Cookie:` header value. Ordering is stable (sorted by
    /// name) so requests are reproducible.
    pub fn header_value(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Produces credentials for a blocked session. The fetch orchestrator
/// depends only on this seam; how the credentials come to exist (browser
/// login, cached session file, operator paste) is the provider's business.
#[async_trait]
pub trait CredentialProvider: Send {
    async fn recover(&mut self, challenge_url: &str) -> Result<SessionCookies>;
}

/// Provider for runs without a configured mailbox: a block is immediately
/// terminal instead of recoverable.
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn recover(&mut self, _challenge_url: &str) -> Result<SessionCookies> {
        Err(AppError::AuthenticationFailed(
            "no mailbox configured for credential recovery".to_string(),
        ))
    }
}

/// Selector strategy for the challenge page. Site markup shifts under us,
/// so every selector is configuration: cascades are tried in order and the
/// first hit wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginConfig {
    /// Account email typed into the identification form, when present.
    pub account_email: String,
    pub email_input_selector: Option<String>,
    pub continue_button_selectors: Vec<String>,
    /// Buttons that request the emailed code.
    pub request_code_selectors: Vec<String>,
    /// Per-digit input selector; `{n}` is replaced with the 1-based digit
    /// position.
    pub digit_input_template: String,
    pub confirm_button_selectors: Vec<String>,
    pub element_timeout_secs: u64,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            account_email: String::new(),
            email_input_selector: Some("#user_id".to_string()),
            continue_button_selectors: vec!["button[type='submit']".to_string()],
            request_code_selectors: vec![
                "button[data-testid='send-code']".to_string(),
                "#code_validation button".to_string(),
            ],
            digit_input_template: "input[aria-label='Dígito {n}']".to_string(),
            confirm_button_selectors: vec![
                "button[data-testid='submit-button']".to_string(),
                "button[type='submit']".to_string(),
            ],
            element_timeout_secs: 10,
        }
    }
}

pub fn digit_selector(template: &str, position: usize) -> String {
    template.replace("{n}", &position.to_string())
}

/// Drives the access-challenge page in a headless browser, feeds it the
/// emailed one-time code, and hands back a cookie snapshot.
///
/// The mailbox is surrendered to the OTP retriever for the single
/// authentication attempt this type supports; the session machine
/// guarantees it is never asked twice in one run.
pub struct BrowserAuthenticator<M: Mailbox> {
    login: LoginConfig,
    retriever: OtpRetriever,
    mailbox: Option<M>,
}

impl<M: Mailbox> BrowserAuthenticator<M> {
    pub fn new(login: LoginConfig, retriever: OtpRetriever, mailbox: M) -> Self {
        Self {
            login,
            retriever,
            mailbox: Some(mailbox),
        }
    }

    fn launch_browser() -> Result<Browser> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .args(vec![
                OsStr::new("--no-sandbox"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
            ])
            .build()
            .map_err(|e| AppError::Browser(format!("failed to create launch options: {e}")))?;

        Browser::new(launch_options)
            .map_err(|e| AppError::Browser(format!("failed to launch browser: {e}")))
    }

    fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.login.element_timeout_secs)
    }

    /// Try a selector cascade; first clickable element wins.
    fn click_first(&self, tab: &Tab, selectors: &[String]) -> bool {
        for selector in selectors {
            match tab.wait_for_element_with_custom_timeout(selector, self.element_timeout()) {
                Ok(element) => {
                    if element.click().is_ok() {
                        debug!(%selector, "clicked");
                        return true;
                    }
                }
                Err(_) => continue,
            }
        }
        false
    }

    fn type_account_email(&self, tab: &Tab) -> Result<()> {
        let Some(selector) = &self.login.email_input_selector else {
            return Ok(());
        };
        // The identification step is optional: some challenges jump
        // straight to the code screen.
        let Ok(field) = tab.wait_for_element_with_custom_timeout(selector, self.element_timeout())
        else {
            debug!(%selector, "no email field on challenge page, skipping");
            return Ok(());
        };
        field
            .click()
            .map_err(|e| AppError::Browser(format!("email field click failed: {e}")))?;
        tab.type_str(&self.login.account_email)
            .map_err(|e| AppError::Browser(format!("typing email failed: {e}")))?;
        self.click_first(tab, &self.login.continue_button_selectors);
        Ok(())
    }

    fn request_code(&self, tab: &Tab) -> Result<()> {
        if self.click_first(tab, &self.login.request_code_selectors) {
            return Ok(());
        }
        // The code screen may already be showing its digit inputs.
        let first_digit = digit_selector(&self.login.digit_input_template, 1);
        if tab
            .wait_for_element_with_custom_timeout(&first_digit, self.element_timeout())
            .is_ok()
        {
            debug!("code inputs already visible, no request needed");
            return Ok(());
        }
        Err(AppError::AuthenticationFailed(
            "could not reach the code entry screen".to_string(),
        ))
    }

    fn type_code(&self, tab: &Tab, digits: &str) -> Result<()> {
        for (i, digit) in digits.chars().enumerate() {
            let selector = digit_selector(&self.login.digit_input_template, i + 1);
            let field = tab
                .wait_for_element_with_custom_timeout(&selector, self.element_timeout())
                .map_err(|e| AppError::Browser(format!("digit input {selector}: {e}")))?;
            field
                .click()
                .map_err(|e| AppError::Browser(format!("digit input click failed: {e}")))?;
            tab.type_str(&digit.to_string())
                .map_err(|e| AppError::Browser(format!("typing digit failed: {e}")))?;
        }
        if !self.click_first(tab, &self.login.confirm_button_selectors) {
            return Err(AppError::AuthenticationFailed(
                "confirm button not found after code entry".to_string(),
            ));
        }
        Ok(())
    }

    fn snapshot_cookies(&self, tab: &Tab) -> Result<SessionCookies> {
        let raw = tab
            .get_cookies()
            .map_err(|e| AppError::Browser(format!("cookie read failed: {e}")))?;
        let mut cookies = SessionCookies::new();
        for cookie in raw {
            cookies.insert(cookie.name, cookie.value);
        }
        if cookies.is_empty() {
            return Err(AppError::AuthenticationFailed(
                "authenticated session produced no cookies".to_string(),
            ));
        }
        Ok(cookies)
    }
}

#[async_trait]
impl<M: Mailbox> CredentialProvider for BrowserAuthenticator<M> {
    async fn recover(&mut self, challenge_url: &str) -> Result<SessionCookies> {
        let mut mailbox = self.mailbox.take().ok_or_else(|| {
            AppError::AuthenticationFailed(
                "credential recovery already consumed this run's mailbox".to_string(),
            )
        })?;

        // Codes older than this moment belong to previous attempts.
        let attempt_started = Utc::now();
        info!(%challenge_url, "starting credential recovery");

        let browser = Self::launch_browser()?;
        let tab = browser
            .new_tab()
            .map_err(|e| AppError::Browser(format!("failed to create tab: {e}")))?;

        tab.navigate_to(challenge_url)
            .map_err(|e| AppError::Browser(format!("navigation failed: {e}")))?;
        tab.wait_until_navigated()
            .map_err(|e| AppError::Browser(format!("challenge page load failed: {e}")))?;

        self.type_account_email(&tab)?;
        self.request_code(&tab)?;

        // The retriever owns the mailbox from here and closes it on both
        // success and failure.
        let code = self.retriever.wait_for_code(&mut mailbox, attempt_started).await?;

        self.type_code(&tab, &code.into_digits())?;
        if let Err(e) = tab.wait_until_navigated() {
            warn!(error = %e, "post-confirmation navigation did not settle");
        }

        let cookies = self.snapshot_cookies(&tab)?;
        info!(count = cookies.len(), "credential recovery complete");
        Ok(cookies)
    }
}
