//! Source adapters.
//!
//! Each adapter fetches the current remote state of its configured scope and
//! normalizes it into [`SyncRecord`]s. Pagination and transient-error retries
//! happen inside the adapter; a scope either yields its complete result set or
//! is reported as a failure without affecting sibling scopes.

mod calendar;
mod credentials;
mod github;
mod http;
mod readwise;

pub use calendar::*;
pub use credentials::*;
pub use github::*;
pub use http::*;
pub use readwise::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::AppError;
use crate::models::{Source, SyncRecord};

/// A scope (repository, calendar, listing) that could not be fetched.
#[derive(Debug)]
pub struct ScopeFailure {
    pub scope: String,
    pub error: AppError,
}

/// Everything one fetch produced.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<SyncRecord>,
    pub failures: Vec<ScopeFailure>,
}

impl FetchOutcome {
    pub fn fail(&mut self, scope: impl Into<String>, error: AppError) {
        self.failures.push(ScopeFailure {
            scope: scope.into(),
            error,
        });
    }
}

/// A remote system of record.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    /// Configured scope entries, for logging.
    fn scopes(&self) -> Vec<String>;

    /// Whether `fetch` honours the `since` watermark.
    fn uses_watermark(&self) -> bool {
        false
    }

    /// Fetch the current state of every configured scope.
    async fn fetch(&self, since: Option<DateTime<Utc>>) -> FetchOutcome;
}
