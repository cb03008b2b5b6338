//! Gather records and bulk-refresh modes
//!
//! A gather record holds the one timestamp that makes "the whole collection"
//! fresh: it is committed only after every member resolved, so observing a
//! fresh record means every member was fresh at that instant. The ledger also
//! enforces the bulk-refresh cooldown, which is independent of both member
//! TTLs and purge cooldowns.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::category::{CacheCategory, GatherKind};
use crate::error::{CacheError, RateLimitScope};
use crate::lock;

/// How a bulk read should treat collection staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherMode {
    /// Return the cached collection if its gather record is fresh, otherwise
    /// run a gather.
    RefreshIfStale,
    /// Run a gather now even if the record is fresh (still cooldown-gated).
    ForceNow,
    /// Never touch the network: fail with `NotGathered` if no gather for this
    /// kind ever succeeded, otherwise return whatever is cached.
    ReadOnlyMustExist,
}

/// Inspection of one gather kind's record, without fetching anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatherStatus {
    pub kind: GatherKind,
    /// When the last gather committed, if any ever did.
    pub last_gather_at: Option<DateTime<Utc>>,
    /// When the gathered collection goes stale.
    pub fresh_until: Option<DateTime<Utc>>,
    /// Until when a new gather would be rejected as rate limited.
    pub cooldown_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct GatherState {
    last_gather: HashMap<GatherKind, DateTime<Utc>>,
    dirty: bool,
}

/// Shared record of last-gather times, one per bulk-capable kind.
#[derive(Clone, Default)]
pub(crate) struct GatherLedger {
    state: Arc<Mutex<GatherState>>,
}

impl GatherLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self, kind: GatherKind) -> Option<DateTime<Utc>> {
        lock(&self.state).last_gather.get(&kind).copied()
    }

    /// Whether the collection is fresh at `now`, judged by the gather record
    /// alone.
    pub fn is_fresh(&self, kind: GatherKind, now: DateTime<Utc>) -> bool {
        match self.last(kind) {
            Some(last) => now <= last + kind.spec().ttl,
            None => false,
        }
    }

    /// Fails with `RateLimited` if the kind's gather cooldown has not elapsed
    /// at `now`. A kind that has never gathered is never rate limited.
    pub fn check_cooldown(&self, kind: GatherKind, now: DateTime<Utc>) -> Result<(), CacheError> {
        if let Some(last) = self.last(kind) {
            let retry_at = last + kind.spec().cooldown;
            if now < retry_at {
                return Err(CacheError::RateLimited {
                    scope: RateLimitScope::Gather(kind),
                    retry_at,
                });
            }
        }
        Ok(())
    }

    /// Commits a completed gather. Called only after every member resolved.
    pub fn record(&self, kind: GatherKind, now: DateTime<Utc>) {
        let mut state = lock(&self.state);
        state.last_gather.insert(kind, now);
        state.dirty = true;
    }

    /// Forgets the record, e.g. because the member category was purged.
    pub fn invalidate(&self, kind: GatherKind) {
        let mut state = lock(&self.state);
        if state.last_gather.remove(&kind).is_some() {
            state.dirty = true;
        }
    }

    /// Forgets the records of every kind whose members live in `category`.
    pub fn invalidate_for_category(&self, category: CacheCategory) {
        for kind in GatherKind::ALL {
            if kind.spec().member_categories.contains(&category) {
                self.invalidate(kind);
            }
        }
    }

    /// Builds the inspection view for `kind`.
    pub fn status(&self, kind: GatherKind) -> GatherStatus {
        let last_gather_at = self.last(kind);
        let spec = kind.spec();
        GatherStatus {
            kind,
            last_gather_at,
            fresh_until: last_gather_at.map(|at| at + spec.ttl),
            cooldown_until: last_gather_at.map(|at| at + spec.cooldown),
        }
    }

    /// Snapshot for persistence, in a stable order.
    pub fn snapshot(&self) -> Vec<(GatherKind, DateTime<Utc>)> {
        let state = lock(&self.state);
        GatherKind::ALL
            .iter()
            .filter_map(|k| state.last_gather.get(k).map(|at| (*k, *at)))
            .collect()
    }

    /// Restores persisted records without marking the ledger dirty.
    pub fn restore(&self, records: Vec<(GatherKind, DateTime<Utc>)>) {
        let mut state = lock(&self.state);
        state.last_gather.extend(records);
    }

    pub fn is_dirty(&self) -> bool {
        lock(&self.state).dirty
    }

    pub fn mark_clean(&self) {
        lock(&self.state).dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_never_gathered_is_not_fresh_and_not_rate_limited() {
        let ledger = GatherLedger::new();
        let now = Utc::now();
        assert!(!ledger.is_fresh(GatherKind::AllPassageTexts, now));
        assert!(ledger.check_cooldown(GatherKind::AllPassageTexts, now).is_ok());
    }

    #[test]
    fn test_freshness_judged_by_record_alone() {
        let ledger = GatherLedger::new();
        let now = Utc::now();
        ledger.record(GatherKind::AllPassageTexts, now);

        let ttl = GatherKind::AllPassageTexts.spec().ttl;
        assert!(ledger.is_fresh(GatherKind::AllPassageTexts, now + ttl));
        assert!(!ledger.is_fresh(
            GatherKind::AllPassageTexts,
            now + ttl + Duration::seconds(1)
        ));
    }

    #[test]
    fn test_cooldown_reports_retry_time() {
        let ledger = GatherLedger::new();
        let now = Utc::now();
        ledger.record(GatherKind::AllCommentaries, now);

        let err = ledger
            .check_cooldown(GatherKind::AllCommentaries, now + Duration::minutes(1))
            .expect_err("cooldown active");
        assert_eq!(
            err.retry_at(),
            Some(now + GatherKind::AllCommentaries.spec().cooldown)
        );
    }

    #[test]
    fn test_invalidate_for_member_category() {
        let ledger = GatherLedger::new();
        let now = Utc::now();
        ledger.record(GatherKind::ArtworkIndex, now);
        ledger.record(GatherKind::ChapterIndex, now);

        ledger.invalidate_for_category(CacheCategory::Artworks);
        assert_eq!(ledger.last(GatherKind::ArtworkIndex), None);
        assert_eq!(ledger.last(GatherKind::ChapterIndex), Some(now));

        // Passages are chapter-index members alongside the chapters.
        ledger.invalidate_for_category(CacheCategory::Passages);
        assert_eq!(ledger.last(GatherKind::ChapterIndex), None);
    }

    #[test]
    fn test_status_exposes_deadlines() {
        let ledger = GatherLedger::new();
        let now = Utc::now();
        ledger.record(GatherKind::ArtworkIndex, now);

        let status = ledger.status(GatherKind::ArtworkIndex);
        let spec = GatherKind::ArtworkIndex.spec();
        assert_eq!(status.last_gather_at, Some(now));
        assert_eq!(status.fresh_until, Some(now + spec.ttl));
        assert_eq!(status.cooldown_until, Some(now + spec.cooldown));
    }
}
