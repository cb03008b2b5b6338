//! Purge cooldown ledger
//!
//! Tracks when each category was last manually invalidated. The cooldown
//! clock is driven solely by these records: fetches and gathers never touch
//! it, so a purge attempt right after an unrelated refresh is still judged
//! against the previous purge alone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::category::CacheCategory;
use crate::error::{CacheError, RateLimitScope};
use crate::lock;

#[derive(Debug, Default)]
struct PurgeState {
    last_purge: HashMap<CacheCategory, DateTime<Utc>>,
    dirty: bool,
}

/// Shared record of last-purge times, one per category.
#[derive(Clone, Default)]
pub(crate) struct PurgeLedger {
    state: Arc<Mutex<PurgeState>>,
}

impl PurgeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with `RateLimited` if the category's purge cooldown has not
    /// elapsed at `now`.
    pub fn check(&self, category: CacheCategory, now: DateTime<Utc>) -> Result<(), CacheError> {
        let state = lock(&self.state);
        if let Some(last) = state.last_purge.get(&category) {
            let retry_at = *last + category.purge_cooldown();
            if now < retry_at {
                return Err(CacheError::RateLimited {
                    scope: RateLimitScope::Purge(category),
                    retry_at,
                });
            }
        }
        Ok(())
    }

    /// Records a completed purge.
    pub fn record(&self, category: CacheCategory, now: DateTime<Utc>) {
        let mut state = lock(&self.state);
        state.last_purge.insert(category, now);
        state.dirty = true;
    }

    pub fn last(&self, category: CacheCategory) -> Option<DateTime<Utc>> {
        lock(&self.state).last_purge.get(&category).copied()
    }

    /// Snapshot for persistence, in a stable order.
    pub fn snapshot(&self) -> Vec<(CacheCategory, DateTime<Utc>)> {
        let state = lock(&self.state);
        CacheCategory::ALL
            .iter()
            .filter_map(|c| state.last_purge.get(c).map(|at| (*c, *at)))
            .collect()
    }

    /// Restores persisted records without marking the ledger dirty.
    pub fn restore(&self, records: Vec<(CacheCategory, DateTime<Utc>)>) {
        let mut state = lock(&self.state);
        state.last_purge.extend(records);
    }

    pub fn is_dirty(&self) -> bool {
        lock(&self.state).dirty
    }

    pub fn mark_clean(&self) {
        lock(&self.state).dirty = false;
    }
}
