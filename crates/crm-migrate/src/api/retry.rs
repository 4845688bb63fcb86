//! Retry classification and the bounded per-unit retry loop.
//!
//! A unit of work is one search page, one write chunk, one folder or one
//! upload. Each unit owns its own [`RetryState`]; nothing is shared between
//! units, so one unit giving up never affects the next.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::runlog::RunLog;

/// Maximum number of retries after the first attempt.
pub const MAX_RETRIES: u32 = 5;

/// Linear backoff step: retry `n` waits `n * RETRY_STEP`.
pub const RETRY_STEP: Duration = Duration::from_secs(2);

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The server answered with a non-success status.
    Status { status: u16, body: String },
    /// No response was received (connect, timeout, reset).
    Transport(String),
    /// A success response whose body could not be decoded.
    Decode(String),
}

impl CallError {
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        CallError::Status {
            status,
            body: body.into(),
        }
    }

    /// 429, any 5xx, and transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            CallError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            CallError::Transport(_) => true,
            CallError::Decode(_) => false,
        }
    }

    fn retry_label(&self) -> &'static str {
        match self {
            CallError::Status { status: 429, .. } => "Rate limit exceeded",
            CallError::Status { .. } => "Server error",
            _ => "Transport error",
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Status { status, body } if body.is_empty() => write!(f, "HTTP {}", status),
            CallError::Status { status, body } => write!(f, "HTTP {}: {}", status, body),
            CallError::Transport(msg) => write!(f, "transport failure: {}", msg),
            CallError::Decode(msg) => write!(f, "malformed response: {}", msg),
        }
    }
}

/// Retry counter for one unit of work. Passed and returned by value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What to do after a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then try again.
    Retry(Duration),
    /// Not retryable; drop the unit now.
    Fatal,
    /// Retryable, but the cap is reached; drop the unit.
    Capped,
}

/// Why a unit of work was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Fatal,
    Capped,
}

/// Terminal state of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome<T> {
    Success(T),
    Dropped {
        reason: DropReason,
        error: CallError,
        attempts: u32,
    },
}

impl<T> UnitOutcome<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            UnitOutcome::Success(value) => Some(value),
            UnitOutcome::Dropped { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Success(_))
    }
}

/// Classifies failures and computes linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            step: RETRY_STEP,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decide the next step for a failed call, returning the advanced state.
    pub fn decide(&self, error: &CallError, state: RetryState) -> (RetryDecision, RetryState) {
        if !error.is_retryable() {
            return (RetryDecision::Fatal, state);
        }
        if state.attempt >= self.max_retries {
            return (RetryDecision::Capped, state);
        }
        let next = RetryState {
            attempt: state.attempt + 1,
        };
        (RetryDecision::Retry(self.step * next.attempt), next)
    }

    /// Run `call` until it succeeds or the unit is dropped.
    ///
    /// The loop is bounded: at most `1 + max_retries` calls are made.
    pub async fn execute<T, F, Fut>(&self, unit: &str, log: &mut RunLog, mut call: F) -> UnitOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut state = RetryState::new();
        loop {
            let error = match call().await {
                Ok(value) => return UnitOutcome::Success(value),
                Err(e) => e,
            };

            let (decision, next) = self.decide(&error, state);
            match decision {
                RetryDecision::Retry(delay) => {
                    log.warn(format!(
                        "{} ({}). Retrying after {} seconds...",
                        error.retry_label(),
                        unit,
                        delay.as_secs()
                    ));
                    tokio::time::sleep(delay).await;
                    state = next;
                }
                RetryDecision::Capped => {
                    log.error(format!("Max retries reached. Skipping {}: {}", unit, error));
                    return UnitOutcome::Dropped {
                        reason: DropReason::Capped,
                        error,
                        attempts: state.attempt + 1,
                    };
                }
                RetryDecision::Fatal => {
                    log.error(format!("Error in {}: {}", unit, error));
                    return UnitOutcome::Dropped {
                        reason: DropReason::Fatal,
                        error,
                        attempts: state.attempt + 1,
                    };
                }
            }
        }
    }
}
