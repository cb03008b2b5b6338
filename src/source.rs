//! Upstream source boundary
//!
//! The cache never issues network requests itself. Callers supply an
//! [`ArchiveSource`] implementation whose methods are opaque async fetch
//! operations; the cache invokes each one at most once per stale key (see the
//! single-flight machinery in [`crate::cache`]) and neither retries nor
//! re-derives them. Failures pass through unchanged as
//! [`CacheError::Upstream`](crate::CacheError::Upstream).

use std::future::Future;

use crate::data::{
    Artwork, Chapter, Commentary, Media, NewsPost, Passage, PassageText, SearchHit, SearchQuery,
    Sketch, Splash, SplashPage,
};

/// Opaque error type produced by upstream fetch operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Upstream fetch operations for every content category.
///
/// Methods taking `Option<&str>` accept `None` to mean "the most recent
/// item"; the returned value carries its concrete name so the cache can store
/// it under both keys in lock-step.
pub trait ArchiveSource: Send + Sync + 'static {
    /// Fetches all current news posts.
    fn news(&self) -> impl Future<Output = Result<Vec<NewsPost>, BoxError>> + Send;

    /// Fetches metadata for one artwork, or the most recent one.
    fn artwork(
        &self,
        name: Option<&str>,
    ) -> impl Future<Output = Result<Artwork, BoxError>> + Send;

    /// Fetches the full artwork index.
    fn all_artworks(&self) -> impl Future<Output = Result<Vec<Artwork>, BoxError>> + Send;

    /// Fetches the binary media for one artwork.
    fn artwork_media(&self, name: &str) -> impl Future<Output = Result<Media, BoxError>> + Send;

    /// Fetches metadata for one sketch, or the most recent one.
    fn sketch(&self, name: Option<&str>)
        -> impl Future<Output = Result<Sketch, BoxError>> + Send;

    /// Fetches the full sketch index.
    fn all_sketches(&self) -> impl Future<Output = Result<Vec<Sketch>, BoxError>> + Send;

    /// Fetches the binary media for one sketch.
    fn sketch_media(&self, name: &str) -> impl Future<Output = Result<Media, BoxError>> + Send;

    /// Fetches the written commentary for one artwork.
    fn commentary(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Commentary, BoxError>> + Send;

    /// Fetches the full chapter index, passages included.
    fn chapters(&self) -> impl Future<Output = Result<Vec<Chapter>, BoxError>> + Send;

    /// Fetches metadata for one passage, or the most recent one.
    fn passage(
        &self,
        name: Option<&str>,
    ) -> impl Future<Output = Result<Passage, BoxError>> + Send;

    /// Fetches the full text of one passage, or the most recent one.
    fn passage_text(
        &self,
        name: Option<&str>,
    ) -> impl Future<Output = Result<PassageText, BoxError>> + Send;

    /// Fetches the splash currently shown on the front page.
    fn current_splash(&self) -> impl Future<Output = Result<Splash, BoxError>> + Send;

    /// Fetches one page of the full splash list.
    fn splash_page(&self, page: u32)
        -> impl Future<Output = Result<SplashPage, BoxError>> + Send;

    /// Runs a domain search.
    fn search(
        &self,
        query: &SearchQuery,
    ) -> impl Future<Output = Result<Vec<SearchHit>, BoxError>> + Send;
}
