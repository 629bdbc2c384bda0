use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Lifecycle of one run's session against the target site.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Fetching,
    Blocked,
    Authenticating,
    Authenticated,
    Failed,
}

/// Everything the fetch loop can observe, reduced to one signal each.
/// The transition function is total: every (state, signal) pair maps to
/// exactly one next state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    /// The orchestrator is about to request a page.
    FetchRequested,
    /// A page came back usable.
    PageOk,
    /// Timeout, non-2xx or body decoding failure.
    NetworkError,
    /// Explicit rate-limit response from the site.
    RateLimited,
    /// The response landed on an access-challenge redirect.
    BlockDetected,
    /// The login sub-flow has started driving the challenge page.
    LoginStarted,
    /// Credential recovery produced a usable cookie snapshot.
    CredentialsObtained,
    /// Credential recovery gave up (e.g. no OTP arrived).
    AuthenticationFailed,
}

/// What the orchestrator should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Proceed,
    /// Sleep, then retry the same page.
    RetryAfter(Duration),
    /// Run the credential-recovery sub-flow.
    BeginLogin,
    /// Credentials are in place; refetch the page that triggered the block.
    Resume,
    Abort(AbortReason),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    RetryBudgetExhausted,
    /// The site blocked again after a completed login; retrying would just
    /// loop the login flow.
    BlockedAfterLogin,
    AuthenticationFailed,
    /// A signal arrived that is impossible in the current state.
    ProtocolViolation,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::RetryBudgetExhausted => write!(f, "retry budget exhausted"),
            AbortReason::BlockedAfterLogin => write!(f, "blocked again after completed login"),
            AbortReason::AuthenticationFailed => write!(f, "authentication failed"),
            AbortReason::ProtocolViolation => write!(f, "unexpected session signal"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Global retry budget across the whole run, covering network errors
    /// and rate limits together.
    pub max_retries: u32,
    /// Linear backoff: attempt number times this base.
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Extra fixed cooldown inserted before backoff on a rate limit.
    pub rate_limit_cooldown_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            backoff_base_ms: 6000,
            backoff_cap_ms: 30000,
            rate_limit_cooldown_ms: 10000,
        }
    }
}

/// Session/authentication recovery state machine. Not safe for concurrent
/// transitions: one machine per run, driven from a single sequential
/// fetch loop.
///
/// Retry and backoff state live here as plain counters; recursion depth
/// never encodes the budget.
pub struct SessionMachine {
    config: SessionConfig,
    state: SessionState,
    /// Consecutive failures for the page currently being fetched; resets
    /// on success. Drives backoff growth.
    page_attempt: u32,
    /// Total retries consumed across the run.
    retries_used: u32,
    login_used: bool,
    abort_reason: Option<AbortReason>,
}

impl SessionMachine {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            page_attempt: 0,
            retries_used: 0,
            login_used: false,
            abort_reason: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn retries_used(&self) -> u32 {
        self.retries_used
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort_reason
    }

    /// Apply one observed signal. Returns what the fetch loop should do
    /// next.
    pub fn observe(&mut self, signal: SessionSignal) -> NextStep {
        use SessionSignal::*;
        use SessionState::*;

        let before = self.state;
        let step = match (self.state, signal) {
            // Failed is absorbing.
            (Failed, _) => NextStep::Abort(
                self.abort_reason.unwrap_or(AbortReason::ProtocolViolation),
            ),

            (Idle, FetchRequested) | (Authenticated, FetchRequested) => {
                self.state = Fetching;
                NextStep::Proceed
            }
            (Fetching, FetchRequested) => NextStep::Proceed,

            (Fetching, PageOk) => {
                self.page_attempt = 0;
                NextStep::Proceed
            }

            (Fetching, NetworkError) => self.consume_retry(Duration::ZERO),
            (Fetching, RateLimited) => {
                self.consume_retry(Duration::from_millis(self.config.rate_limit_cooldown_ms))
            }

            (Fetching, BlockDetected) => {
                self.state = Blocked;
                if self.login_used {
                    self.fail(AbortReason::BlockedAfterLogin)
                } else {
                    NextStep::BeginLogin
                }
            }

            (Blocked, LoginStarted) => {
                self.login_used = true;
                self.state = Authenticating;
                NextStep::Proceed
            }

            (Authenticating, CredentialsObtained) => {
                self.state = Authenticated;
                NextStep::Resume
            }
            (Authenticating, AuthenticationFailed) => self.fail(AbortReason::AuthenticationFailed),

            // Anything else is a driver bug, not a site condition.
            (_, signal) => {
                warn!(state = ?before, ?signal, "signal impossible in current state");
                self.fail(AbortReason::ProtocolViolation)
            }
        };

        if self.state != before {
            debug!(from = ?before, to = ?self.state, ?signal, "session transition");
        }
        step
    }

    fn consume_retry(&mut self, cooldown: Duration) -> NextStep {
        self.retries_used += 1;
        self.page_attempt += 1;
        if self.retries_used > self.config.max_retries {
            return self.fail(AbortReason::RetryBudgetExhausted);
        }
        NextStep::RetryAfter(cooldown + self.backoff())
    }

    /// Linear growth with the attempt number, capped.
    fn backoff(&self) -> Duration {
        let ms = (u64::from(self.page_attempt) * self.config.backoff_base_ms)
            .min(self.config.backoff_cap_ms);
        Duration::from_millis(ms)
    }

    fn fail(&mut self, reason: AbortReason) -> NextStep {
        self.state = SessionState::Failed;
        self.abort_reason.get_or_insert(reason);
        NextStep::Abort(reason)
    }
}
