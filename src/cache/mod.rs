//! Caching layer: stores, coordinated fetches, gathers, and persistence
//!
//! The [`CacheManager`] is the entry point; the submodules hold the pieces it
//! composes. Per-key get-or-fetch lives in `collection`, shared in-flight
//! registration in `flight`, TTL storage in `store`, the purge and gather
//! ledgers in `purge` and `gather`, and the on-disk format in `persist`.

mod category;
mod collection;
mod flight;
mod gather;
mod manager;
mod persist;
mod purge;
mod store;

pub use category::{CacheCategory, CategorySpec, GatherKind, GatherSpec};
pub use gather::{GatherMode, GatherStatus};
pub use manager::CacheManager;
pub use store::CacheEntry;
