//! Error types for the cache layer
//!
//! `RateLimited` and `NotGathered` are expected control-flow outcomes that
//! callers branch on, not failures; they are surfaced directly and never
//! logged as errors. `Upstream` passes the supplied fetch operation's failure
//! through unchanged. Persistence failures never reach this type: the
//! persistence layer logs them and degrades to in-memory-only.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::cache::{CacheCategory, GatherKind};

/// Which cooldown rejected an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    /// The purge cooldown of a category.
    Purge(CacheCategory),
    /// The bulk-refresh cooldown of a gather kind.
    Gather(GatherKind),
}

impl fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitScope::Purge(category) => write!(f, "purge of {category}"),
            RateLimitScope::Gather(kind) => write!(f, "gather of {kind}"),
        }
    }
}

/// Errors surfaced by cache read/write operations.
///
/// Cloneable so a single in-flight failure can resolve every waiter that
/// joined the shared fetch.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// A cooldown has not elapsed yet; recoverable by waiting until `retry_at`.
    #[error("{scope} is rate limited until {retry_at}")]
    RateLimited {
        scope: RateLimitScope,
        retry_at: DateTime<Utc>,
    },

    /// A read-only bulk read was requested before any gather succeeded.
    #[error("{kind} has not been gathered yet")]
    NotGathered { kind: GatherKind },

    /// The caller-supplied fetch operation failed; passed through unchanged.
    #[error("upstream request failed: {0}")]
    Upstream(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// The shared fetch task was torn down before producing a result.
    /// The in-flight registration is gone, so the next call retries.
    #[error("shared fetch was aborted before completing")]
    FetchAborted,
}

impl CacheError {
    /// Wraps an opaque upstream failure.
    pub(crate) fn upstream(err: crate::source::BoxError) -> Self {
        CacheError::Upstream(Arc::from(err))
    }

    /// The time after which a rate-limited operation may be retried.
    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        match self {
            CacheError::RateLimited { retry_at, .. } => Some(*retry_at),
            _ => None,
        }
    }
}
