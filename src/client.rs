use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::auth::SessionCookies;
use crate::utils::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub user_agent: String,
    pub request_timeout: u64,
    /// Substrings of the post-redirect URL that mark an access challenge
    /// (e.g. "account-verification"). Site-specific, so configuration.
    pub block_url_markers: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
                .to_string(),
            request_timeout: 20,
            block_url_markers: vec![
                "account-verification".to_string(),
                "security".to_string(),
            ],
        }
    }
}

/// One page request, classified. Transport-level failures (timeouts,
/// connection errors) surface as `Err` instead and are the caller's
/// retry concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Ok(PageBody),
    /// Redirected into an access challenge; carries the challenge URL the
    /// login sub-flow must drive.
    Blocked { challenge_url: String },
    RateLimited,
    HttpError { status: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBody {
    pub body: String,
    pub final_url: String,
}

/// Lightweight HTTP client for catalog pages. Starts anonymous; after a
/// successful login it carries a copied cookie snapshot from the browser
/// session; the two clients never share live state.
pub struct PageClient {
    http: reqwest::Client,
    config: ClientConfig,
    cookies: Option<SessionCookies>,
}

impl PageClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;
        Ok(Self {
            http,
            config,
            cookies: None,
        })
    }

    /// Install the credential snapshot. Subsequent requests are
    /// authenticated.
    pub fn apply_cookies(&mut self, cookies: SessionCookies) {
        info!(count = cookies.len(), "cookie snapshot applied to HTTP client");
        self.cookies = Some(cookies);
    }

    pub fn is_authenticated(&self) -> bool {
        self.cookies.is_some()
    }

    pub async fn fetch_page(&self, url: &str) -> Result<PageOutcome> {
        let mut request = self.http.get(url);
        if let Some(cookies) = &self.cookies {
            request = request.header(reqwest::header::COOKIE, cookies.header_value());
        }

        let response = request.send().await?;
        let status = response.status();
        let final_url = response.url().to_string();

        if self.is_block_url(&final_url) {
            debug!(%final_url, "request landed on access challenge");
            return Ok(PageOutcome::Blocked {
                challenge_url: final_url,
            });
        }

        if status.as_u16() == 429 {
            return Ok(PageOutcome::RateLimited);
        }

        if !status.is_success() {
            return Ok(PageOutcome::HttpError {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        Ok(PageOutcome::Ok(PageBody { body, final_url }))
    }

    fn is_block_url(&self, url: &str) -> bool {
        self.config
            .block_url_markers
            .iter()
            .any(|marker| url.contains(marker.as_str()))
    }
}
