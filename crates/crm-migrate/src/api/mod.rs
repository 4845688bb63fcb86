//! Client layer for the destination CRM.
//!
//! - [`RetryPolicy`]: classifies failures, linear backoff, hard cap
//! - [`PaginatedSearchClient`]: cursor-following search
//! - [`BatchWriteClient`]: chunked create / associate
//! - [`FileManagerClient`]: folder creation and file uploads
//!
//! All clients issue one request at a time through a shared
//! [`CrmTransport`] and pause for a fixed [`Throttle`] after each unit of
//! work to stay under the destination's rate limit.

mod batch;
mod files;
mod retry;
mod search;
mod transport;

pub use batch::{
    AssociationCategory, AssociationInput, AssociationTarget, BatchInput, BatchOutcome,
    BatchWriteClient, OperationKind, WriteInput,
};
pub use files::FileManagerClient;
pub use retry::{
    CallError, DropReason, RetryDecision, RetryPolicy, RetryState, UnitOutcome, MAX_RETRIES,
    RETRY_STEP,
};
pub use search::{
    DestinationRecord, Filter, FilterGroup, Operator, PaginatedSearchClient, SearchRequest, Sort,
    SortDirection, MAX_FILTER_VALUES,
};
pub use transport::{CrmTransport, FileUpload, HttpTransport};

use std::time::Duration;

/// Fixed delay applied after every remote unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    delay: Duration,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// No delay at all.
    pub fn none() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}
