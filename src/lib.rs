//! lorecache: a content cache and gather coordinator for a lore archive
//!
//! Sits between consumers and a slow, rate-limited upstream archive. Content
//! is cached per category with category-specific TTLs, explicit purges are
//! throttled by per-category cooldowns, concurrent fetches of the same item
//! are de-duplicated into a single upstream call, and bulk "gathers" refresh
//! whole collections behind one freshness timestamp. Everything survives
//! restarts through JSON files under a platform cache directory.
//!
//! Callers provide the upstream via [`ArchiveSource`] and go through
//! [`cache::CacheManager`] for every read.

pub mod cache;
pub mod data;
mod error;
pub mod source;

pub use cache::{CacheCategory, CacheManager, GatherKind, GatherMode, GatherStatus};
pub use error::{CacheError, RateLimitScope};
pub use source::{ArchiveSource, BoxError};

use std::sync::{Mutex, MutexGuard};

/// Locks a mutex, taking the data back if a panicking thread poisoned it.
/// Every guarded structure here stays valid under partial updates, so the
/// value is usable either way.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
