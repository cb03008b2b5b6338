//! Cache manager facade over every content category
//!
//! Provides a `CacheManager` that owns one typed collection per category, the
//! purge and gather ledgers, and the persistence root, and performs every
//! upstream call through the caller-supplied [`ArchiveSource`]. Construct it
//! once at startup, call [`CacheManager::load`], share it by reference, and
//! [`CacheManager::flush`] it at shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use directories::ProjectDirs;
use futures::future::try_join_all;
use tracing::{debug, info, warn};

use super::category::{CacheCategory, GatherKind};
use super::collection::Collection;
use super::flight::FlightMap;
use super::gather::{GatherLedger, GatherMode, GatherStatus};
use super::persist::{self, MetaFile};
use super::purge::PurgeLedger;
use crate::data::{
    Artwork, Chapter, Commentary, ItemKey, Media, NewsPost, Passage, PassageText, SearchHit,
    SearchQuery, Sketch, Splash, SplashPage,
};
use crate::error::CacheError;
use crate::source::ArchiveSource;

/// Coordinates cached reads, purges, bulk gathers, and persistence for all
/// archive content.
///
/// Single-item reads go through per-key single-flight fetches; bulk reads go
/// through gather records so "is the whole collection fresh" is judged by one
/// timestamp committed only after every member resolved. All upstream access
/// happens through the supplied source, at most once per stale key.
pub struct CacheManager<S> {
    source: Arc<S>,
    root: PathBuf,
    news: Collection<(), Vec<NewsPost>>,
    artworks: Collection<ItemKey, Artwork>,
    artwork_media: Collection<String, Media>,
    sketches: Collection<ItemKey, Sketch>,
    sketch_media: Collection<String, Media>,
    commentaries: Collection<String, Commentary>,
    chapters: Collection<(), Vec<Chapter>>,
    passages: Collection<ItemKey, Passage>,
    passage_texts: Collection<ItemKey, PassageText>,
    search_results: Collection<SearchQuery, Vec<SearchHit>>,
    splash: Collection<(), Splash>,
    splash_pages: Collection<u32, SplashPage>,
    purges: PurgeLedger,
    gathers: GatherLedger,
    gather_flights: FlightMap<GatherKind, ()>,
}

impl<S: ArchiveSource> CacheManager<S> {
    /// Creates a manager using the platform cache directory
    /// (`~/.cache/lorecache/` on Linux, or the XDG equivalent elsewhere).
    ///
    /// Returns `None` if no cache directory can be determined.
    pub fn new(source: S) -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "lorecache")?;
        Some(Self::with_root(source, project_dirs.cache_dir()))
    }

    /// Creates a manager rooted at a specific directory.
    pub fn with_root(source: S, root: impl Into<PathBuf>) -> Self {
        Self {
            source: Arc::new(source),
            root: root.into(),
            news: Collection::new(CacheCategory::News),
            artworks: Collection::new(CacheCategory::Artworks),
            artwork_media: Collection::new(CacheCategory::ArtworkMedia),
            sketches: Collection::new(CacheCategory::Sketches),
            sketch_media: Collection::new(CacheCategory::SketchMedia),
            commentaries: Collection::new(CacheCategory::Commentaries),
            chapters: Collection::new(CacheCategory::Chapters),
            passages: Collection::new(CacheCategory::Passages),
            passage_texts: Collection::new(CacheCategory::PassageTexts),
            search_results: Collection::new(CacheCategory::SearchResults),
            splash: Collection::new(CacheCategory::Splash),
            splash_pages: Collection::new(CacheCategory::SplashPages),
            purges: PurgeLedger::new(),
            gathers: GatherLedger::new(),
            gather_flights: FlightMap::new(),
        }
    }

    /// Directory holding this manager's cache files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // --- single-item reads ---

    /// Returns the current news posts, fetching if stale.
    pub async fn news(&self) -> Result<Vec<NewsPost>, CacheError> {
        let source = Arc::clone(&self.source);
        self.news
            .get_or_fetch((), move || async move { source.news().await }, |_| None)
            .await
    }

    /// Returns one artwork's metadata; `None` means the most recent artwork.
    ///
    /// A "latest" fetch is cached under both the latest alias and the
    /// concrete name it resolved to.
    pub async fn artwork(&self, name: Option<&str>) -> Result<Artwork, CacheError> {
        let key = ItemKey::from_name(name);
        let source = Arc::clone(&self.source);
        let name = name.map(str::to_owned);
        self.artworks
            .get_or_fetch(
                key,
                move || async move { source.artwork(name.as_deref()).await },
                |artwork| Some(ItemKey::Name(artwork.name.clone())),
            )
            .await
    }

    /// Returns one artwork's binary media; `None` means the most recent
    /// artwork, resolved through the metadata cache first.
    pub async fn artwork_media(&self, name: Option<&str>) -> Result<Media, CacheError> {
        let name = match name {
            Some(name) => name.to_owned(),
            None => self.artwork(None).await?.name,
        };
        let source = Arc::clone(&self.source);
        let fetch_name = name.clone();
        self.artwork_media
            .get_or_fetch(
                name,
                move || async move { source.artwork_media(&fetch_name).await },
                |_| None,
            )
            .await
    }

    /// Returns one sketch's metadata; `None` means the most recent sketch.
    pub async fn sketch(&self, name: Option<&str>) -> Result<Sketch, CacheError> {
        let key = ItemKey::from_name(name);
        let source = Arc::clone(&self.source);
        let name = name.map(str::to_owned);
        self.sketches
            .get_or_fetch(
                key,
                move || async move { source.sketch(name.as_deref()).await },
                |sketch| Some(ItemKey::Name(sketch.name.clone())),
            )
            .await
    }

    /// Returns one sketch's binary media; `None` means the most recent
    /// sketch, resolved through the metadata cache first.
    pub async fn sketch_media(&self, name: Option<&str>) -> Result<Media, CacheError> {
        let name = match name {
            Some(name) => name.to_owned(),
            None => self.sketch(None).await?.name,
        };
        let source = Arc::clone(&self.source);
        let fetch_name = name.clone();
        self.sketch_media
            .get_or_fetch(
                name,
                move || async move { source.sketch_media(&fetch_name).await },
                |_| None,
            )
            .await
    }

    /// Returns the splash currently on the front page. The short TTL keeps
    /// it tracking the upstream rotation.
    pub async fn current_splash(&self) -> Result<Splash, CacheError> {
        let source = Arc::clone(&self.source);
        self.splash
            .get_or_fetch(
                (),
                move || async move { source.current_splash().await },
                |_| None,
            )
            .await
    }

    /// Returns one page of the full splash list, cached per page number.
    pub async fn splash_page(&self, page: u32) -> Result<SplashPage, CacheError> {
        let source = Arc::clone(&self.source);
        self.splash_pages
            .get_or_fetch(
                page,
                move || async move { source.splash_page(page).await },
                |_| None,
            )
            .await
    }

    /// Returns the written commentary for one artwork.
    pub async fn commentary(&self, name: &str) -> Result<Commentary, CacheError> {
        let source = Arc::clone(&self.source);
        let fetch_name = name.to_owned();
        self.commentaries
            .get_or_fetch(
                name.to_owned(),
                move || async move { source.commentary(&fetch_name).await },
                |_| None,
            )
            .await
    }

    /// Returns one passage's metadata; `None` means the most recent passage.
    pub async fn passage(&self, name: Option<&str>) -> Result<Passage, CacheError> {
        let key = ItemKey::from_name(name);
        let source = Arc::clone(&self.source);
        let name = name.map(str::to_owned);
        self.passages
            .get_or_fetch(
                key,
                move || async move { source.passage(name.as_deref()).await },
                |passage| Some(ItemKey::Name(passage.name.clone())),
            )
            .await
    }

    /// Returns one passage's full text; `None` means the most recent passage.
    pub async fn passage_text(&self, name: Option<&str>) -> Result<PassageText, CacheError> {
        let key = ItemKey::from_name(name);
        let source = Arc::clone(&self.source);
        let name = name.map(str::to_owned);
        self.passage_texts
            .get_or_fetch(
                key,
                move || async move { source.passage_text(name.as_deref()).await },
                |text| Some(ItemKey::Name(text.name.clone())),
            )
            .await
    }

    /// Runs a domain search, cached per `(term, kind)` query.
    pub async fn search(&self, query: SearchQuery) -> Result<Vec<SearchHit>, CacheError> {
        let source = Arc::clone(&self.source);
        let upstream_query = query.clone();
        self.search_results
            .get_or_fetch(
                query,
                move || async move { source.search(&upstream_query).await },
                |_| None,
            )
            .await
    }

    // --- bulk reads (gathers) ---

    /// Returns the full artwork index, newest first.
    ///
    /// Refreshing fetches the whole collection in one upstream call and
    /// populates the per-item entries in lock-step, so later single-item
    /// reads hit cache.
    pub async fn all_artworks(&self, mode: GatherMode) -> Result<Vec<Artwork>, CacheError> {
        let kind = GatherKind::ArtworkIndex;
        if self.should_gather(kind, mode)? {
            let source = Arc::clone(&self.source);
            let artworks = self.artworks.clone();
            let gathers = self.gathers.clone();
            self.gather_flights
                .run(kind, async move {
                    refresh_artwork_index(&source, &artworks, &gathers).await
                })
                .await?;
        }
        Ok(artwork_index_snapshot(&self.artworks))
    }

    /// Returns the full sketch index, sorted by name.
    pub async fn all_sketches(&self, mode: GatherMode) -> Result<Vec<Sketch>, CacheError> {
        let kind = GatherKind::SketchIndex;
        if self.should_gather(kind, mode)? {
            let source = Arc::clone(&self.source);
            let sketches = self.sketches.clone();
            let gathers = self.gathers.clone();
            self.gather_flights
                .run(kind, async move {
                    refresh_sketch_index(&source, &sketches, &gathers).await
                })
                .await?;
        }
        Ok(sketch_index_snapshot(&self.sketches))
    }

    /// Returns every chapter with its passages, in publication order.
    ///
    /// Refreshing also populates the per-passage entries, so later
    /// single-passage reads hit cache.
    pub async fn chapters(&self, mode: GatherMode) -> Result<Vec<Chapter>, CacheError> {
        let kind = GatherKind::ChapterIndex;
        if self.should_gather(kind, mode)? {
            let source = Arc::clone(&self.source);
            let chapters = self.chapters.clone();
            let passages = self.passages.clone();
            let gathers = self.gathers.clone();
            self.gather_flights
                .run(kind, async move {
                    refresh_chapter_index(&source, &chapters, &passages, &gathers).await
                })
                .await?;
        }
        Ok(self.chapters.peek(&()).unwrap_or_default())
    }

    /// Returns the commentary for every artwork that has one, paired with the
    /// artwork's name, in index order.
    ///
    /// Members are fetched concurrently through the per-item cache; the
    /// gather record commits only once every member resolved.
    pub async fn all_commentaries(
        &self,
        mode: GatherMode,
    ) -> Result<Vec<(String, Commentary)>, CacheError> {
        let kind = GatherKind::AllCommentaries;
        if self.should_gather(kind, mode)? {
            let source = Arc::clone(&self.source);
            let flights = self.gather_flights.clone();
            let artworks = self.artworks.clone();
            let commentaries = self.commentaries.clone();
            let gathers = self.gathers.clone();
            self.gather_flights
                .run(kind, async move {
                    refresh_all_commentaries(source, flights, artworks, commentaries, gathers)
                        .await
                })
                .await?;
        }
        Ok(commentary_snapshot(&self.artworks, &self.commentaries))
    }

    /// Returns the full text of every solved passage, in chapter order.
    pub async fn all_passage_texts(
        &self,
        mode: GatherMode,
    ) -> Result<Vec<PassageText>, CacheError> {
        let kind = GatherKind::AllPassageTexts;
        if self.should_gather(kind, mode)? {
            let source = Arc::clone(&self.source);
            let flights = self.gather_flights.clone();
            let chapters = self.chapters.clone();
            let passages = self.passages.clone();
            let passage_texts = self.passage_texts.clone();
            let gathers = self.gathers.clone();
            self.gather_flights
                .run(kind, async move {
                    refresh_all_passage_texts(
                        source,
                        flights,
                        chapters,
                        passages,
                        passage_texts,
                        gathers,
                    )
                    .await
                })
                .await?;
        }
        Ok(passage_text_snapshot(&self.chapters, &self.passage_texts))
    }

    /// Inspects a gather record without fetching anything.
    pub fn gather_status(&self, kind: GatherKind) -> GatherStatus {
        self.gathers.status(kind)
    }

    /// Decides whether a gather must run for `mode`, enforcing the cooldown
    /// and the read-only contract. The cooldown is checked before joining any
    /// in-flight gather, so callers arriving during a run still share it.
    fn should_gather(&self, kind: GatherKind, mode: GatherMode) -> Result<bool, CacheError> {
        let now = Utc::now();
        match mode {
            GatherMode::ReadOnlyMustExist => {
                if self.gathers.last(kind).is_none() {
                    Err(CacheError::NotGathered { kind })
                } else {
                    Ok(false)
                }
            }
            GatherMode::RefreshIfStale => {
                if self.gathers.is_fresh(kind, now) {
                    Ok(false)
                } else {
                    self.gathers.check_cooldown(kind, now)?;
                    Ok(true)
                }
            }
            GatherMode::ForceNow => {
                self.gathers.check_cooldown(kind, now)?;
                Ok(true)
            }
        }
    }

    // --- purging ---

    /// Empties one category (and its cascade dependents) ahead of its TTL.
    ///
    /// Unless `force` is set, purges are throttled per category; a purge
    /// inside the cooldown window fails with `RateLimited` carrying the time
    /// at which it would be accepted. Purging a category also invalidates any
    /// gather record whose members it held. Only an explicit purge moves the
    /// purge clock; fetches and gathers never touch it.
    pub fn purge(&self, category: CacheCategory, force: bool) -> Result<(), CacheError> {
        let now = Utc::now();
        if !force {
            self.purges.check(category, now)?;
        }

        self.clear_category(category);
        self.gathers.invalidate_for_category(category);
        for dependent in category.spec().cascade {
            self.clear_category(*dependent);
            self.gathers.invalidate_for_category(*dependent);
        }

        self.purges.record(category, now);
        info!(%category, force, "cache purged");
        Ok(())
    }

    fn clear_category(&self, category: CacheCategory) {
        match category {
            CacheCategory::News => self.news.clear(),
            CacheCategory::Artworks => self.artworks.clear(),
            CacheCategory::ArtworkMedia => self.artwork_media.clear(),
            CacheCategory::Sketches => self.sketches.clear(),
            CacheCategory::SketchMedia => self.sketch_media.clear(),
            CacheCategory::Commentaries => self.commentaries.clear(),
            CacheCategory::Chapters => self.chapters.clear(),
            CacheCategory::Passages => self.passages.clear(),
            CacheCategory::PassageTexts => self.passage_texts.clear(),
            CacheCategory::SearchResults => self.search_results.clear(),
            CacheCategory::Splash => self.splash.clear(),
            CacheCategory::SplashPages => self.splash_pages.clear(),
        }
    }

    // --- offline read helpers ---

    /// Names of every cached artwork, staleness ignored, sorted. Suitable for
    /// suggestion lists while offline.
    pub fn cached_artwork_names(&self) -> Vec<String> {
        let mut names = self.artworks.with_store(|store| {
            store
                .iter()
                .filter_map(|(key, _)| match key {
                    ItemKey::Name(name) => Some(name.clone()),
                    ItemKey::Latest => None,
                })
                .collect::<Vec<_>>()
        });
        names.sort_unstable();
        names
    }

    /// Names of every cached sketch, staleness ignored, sorted.
    pub fn cached_sketch_names(&self) -> Vec<String> {
        let mut names = self.sketches.with_store(|store| {
            store
                .iter()
                .filter_map(|(key, _)| match key {
                    ItemKey::Name(name) => Some(name.clone()),
                    ItemKey::Latest => None,
                })
                .collect::<Vec<_>>()
        });
        names.sort_unstable();
        names
    }

    /// Names of every cached passage, staleness ignored, sorted.
    pub fn cached_passage_names(&self) -> Vec<String> {
        let mut names = self.passages.with_store(|store| {
            store
                .iter()
                .filter_map(|(key, _)| match key {
                    ItemKey::Name(name) => Some(name.clone()),
                    ItemKey::Latest => None,
                })
                .collect::<Vec<_>>()
        });
        names.sort_unstable();
        names
    }

    // --- persistence ---

    /// Loads every persisted category and the bookkeeping file. Failures are
    /// logged and the affected category starts empty; loading never fails the
    /// caller.
    pub fn load(&self) {
        for category in CacheCategory::ALL {
            let result = match category {
                CacheCategory::News => self
                    .news
                    .with_store(|store| persist::load_store(store, &self.root)),
                CacheCategory::Artworks => self
                    .artworks
                    .with_store(|store| persist::load_store(store, &self.root)),
                CacheCategory::ArtworkMedia => self
                    .artwork_media
                    .with_store(|store| persist::load_media(store, &self.root)),
                CacheCategory::Sketches => self
                    .sketches
                    .with_store(|store| persist::load_store(store, &self.root)),
                CacheCategory::SketchMedia => self
                    .sketch_media
                    .with_store(|store| persist::load_media(store, &self.root)),
                CacheCategory::Commentaries => self
                    .commentaries
                    .with_store(|store| persist::load_store(store, &self.root)),
                CacheCategory::Chapters => self
                    .chapters
                    .with_store(|store| persist::load_store(store, &self.root)),
                CacheCategory::Passages => self
                    .passages
                    .with_store(|store| persist::load_store(store, &self.root)),
                CacheCategory::PassageTexts => self
                    .passage_texts
                    .with_store(|store| persist::load_store(store, &self.root)),
                CacheCategory::SearchResults => self
                    .search_results
                    .with_store(|store| persist::load_store(store, &self.root)),
                CacheCategory::Splash => self
                    .splash
                    .with_store(|store| persist::load_store(store, &self.root)),
                CacheCategory::SplashPages => self
                    .splash_pages
                    .with_store(|store| persist::load_store(store, &self.root)),
            };
            match result {
                Ok(true) => debug!(%category, "cache loaded"),
                Ok(false) => {}
                Err(err) => warn!(%category, error = %err, "cache load failed, starting empty"),
            }
        }

        match persist::load_meta(&self.root) {
            Ok(Some(meta)) => {
                self.purges.restore(meta.last_purge);
                self.gathers.restore(meta.last_gather);
                debug!("bookkeeping loaded");
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "bookkeeping load failed, starting empty"),
        }
    }

    /// Saves one category if it changed since the last save. On failure the
    /// dirty bit stays set so a later save retries.
    pub fn save(&self, category: CacheCategory) {
        let result = match category {
            CacheCategory::News => self
                .news
                .with_store(|store| persist::save_store(store, &self.root)),
            CacheCategory::Artworks => self
                .artworks
                .with_store(|store| persist::save_store(store, &self.root)),
            CacheCategory::ArtworkMedia => self
                .artwork_media
                .with_store(|store| persist::save_media(store, &self.root)),
            CacheCategory::Sketches => self
                .sketches
                .with_store(|store| persist::save_store(store, &self.root)),
            CacheCategory::SketchMedia => self
                .sketch_media
                .with_store(|store| persist::save_media(store, &self.root)),
            CacheCategory::Commentaries => self
                .commentaries
                .with_store(|store| persist::save_store(store, &self.root)),
            CacheCategory::Chapters => self
                .chapters
                .with_store(|store| persist::save_store(store, &self.root)),
            CacheCategory::Passages => self
                .passages
                .with_store(|store| persist::save_store(store, &self.root)),
            CacheCategory::PassageTexts => self
                .passage_texts
                .with_store(|store| persist::save_store(store, &self.root)),
            CacheCategory::SearchResults => self
                .search_results
                .with_store(|store| persist::save_store(store, &self.root)),
            CacheCategory::Splash => self
                .splash
                .with_store(|store| persist::save_store(store, &self.root)),
            CacheCategory::SplashPages => self
                .splash_pages
                .with_store(|store| persist::save_store(store, &self.root)),
        };
        match result {
            Ok(true) => debug!(%category, "cache saved"),
            Ok(false) => {}
            Err(err) => warn!(%category, error = %err, "cache save failed"),
        }
    }

    /// Saves every dirty category plus the bookkeeping file.
    pub fn save_all(&self) {
        for category in CacheCategory::ALL {
            self.save(category);
        }
        self.save_meta();
    }

    /// Shutdown hook: persists everything that changed.
    pub fn flush(&self) {
        self.save_all();
    }

    fn save_meta(&self) {
        if !self.purges.is_dirty() && !self.gathers.is_dirty() {
            return;
        }
        let meta = MetaFile::new(self.purges.snapshot(), self.gathers.snapshot());
        match persist::save_meta(&self.root, &meta) {
            Ok(()) => {
                self.purges.mark_clean();
                self.gathers.mark_clean();
                debug!("bookkeeping saved");
            }
            Err(err) => warn!(error = %err, "bookkeeping save failed"),
        }
    }
}

/// Fetches the artwork index once and populates per-item entries in
/// lock-step, the latest alias pointing at the first (newest) member.
async fn refresh_artwork_index<S: ArchiveSource>(
    source: &Arc<S>,
    artworks: &Collection<ItemKey, Artwork>,
    gathers: &GatherLedger,
) -> Result<(), CacheError> {
    let kind = GatherKind::ArtworkIndex;
    let index = match source.all_artworks().await {
        Ok(index) => index,
        Err(err) => {
            warn!(%kind, error = %err, "index fetch failed");
            return Err(CacheError::upstream(err));
        }
    };

    let now = Utc::now();
    artworks.with_store(|store| {
        store.put_many(
            index
                .iter()
                .map(|artwork| (ItemKey::Name(artwork.name.clone()), artwork.clone())),
            now,
        );
        if let Some(newest) = index.first() {
            store.put(ItemKey::Latest, newest.clone(), now);
        }
    });
    gathers.record(kind, now);
    info!(%kind, members = index.len(), "gather committed");
    Ok(())
}

/// Fetches the sketch index once and populates per-item entries in
/// lock-step, the latest alias pointing at the first (newest) member.
async fn refresh_sketch_index<S: ArchiveSource>(
    source: &Arc<S>,
    sketches: &Collection<ItemKey, Sketch>,
    gathers: &GatherLedger,
) -> Result<(), CacheError> {
    let kind = GatherKind::SketchIndex;
    let index = match source.all_sketches().await {
        Ok(index) => index,
        Err(err) => {
            warn!(%kind, error = %err, "index fetch failed");
            return Err(CacheError::upstream(err));
        }
    };

    let now = Utc::now();
    sketches.with_store(|store| {
        store.put_many(
            index
                .iter()
                .map(|sketch| (ItemKey::Name(sketch.name.clone()), sketch.clone())),
            now,
        );
        if let Some(newest) = index.first() {
            store.put(ItemKey::Latest, newest.clone(), now);
        }
    });
    gathers.record(kind, now);
    info!(%kind, members = index.len(), "gather committed");
    Ok(())
}

/// Fetches the chapter index once, storing the chapter list whole and every
/// passage individually, the latest alias pointing at the first passage.
async fn refresh_chapter_index<S: ArchiveSource>(
    source: &Arc<S>,
    chapters: &Collection<(), Vec<Chapter>>,
    passages: &Collection<ItemKey, Passage>,
    gathers: &GatherLedger,
) -> Result<(), CacheError> {
    let kind = GatherKind::ChapterIndex;
    let index = match source.chapters().await {
        Ok(index) => index,
        Err(err) => {
            warn!(%kind, error = %err, "index fetch failed");
            return Err(CacheError::upstream(err));
        }
    };

    let now = Utc::now();
    let all_passages: Vec<Passage> = index
        .iter()
        .flat_map(|chapter| chapter.passages.iter().cloned())
        .collect();
    let member_count = all_passages.len();

    chapters.with_store(|store| store.put((), index, now));
    passages.with_store(|store| {
        if let Some(newest) = all_passages.first() {
            store.put(ItemKey::Latest, newest.clone(), now);
        }
        store.put_many(
            all_passages
                .into_iter()
                .map(|passage| (ItemKey::Name(passage.name.clone()), passage)),
            now,
        );
    });
    gathers.record(kind, now);
    info!(%kind, members = member_count, "gather committed");
    Ok(())
}

/// Fan-out gather: one commentary per indexed artwork that has one, fetched
/// concurrently through the per-item cache. The record commits only after
/// every member resolved; any member failure aborts the commit.
async fn refresh_all_commentaries<S: ArchiveSource>(
    source: Arc<S>,
    flights: FlightMap<GatherKind, ()>,
    artworks: Collection<ItemKey, Artwork>,
    commentaries: Collection<String, Commentary>,
    gathers: GatherLedger,
) -> Result<(), CacheError> {
    let kind = GatherKind::AllCommentaries;

    // The member list comes from a fresh index.
    if !gathers.is_fresh(GatherKind::ArtworkIndex, Utc::now()) {
        let source = Arc::clone(&source);
        let artworks = artworks.clone();
        let gathers = gathers.clone();
        flights
            .run(GatherKind::ArtworkIndex, async move {
                refresh_artwork_index(&source, &artworks, &gathers).await
            })
            .await?;
    }

    let members: Vec<String> = artwork_index_snapshot(&artworks)
        .into_iter()
        .filter(|artwork| artwork.has_commentary)
        .map(|artwork| artwork.name)
        .collect();
    let member_count = members.len();

    let fetches = members.into_iter().map(|name| {
        let source = Arc::clone(&source);
        let commentaries = commentaries.clone();
        async move {
            let fetch_name = name.clone();
            commentaries
                .get_or_fetch(
                    name,
                    move || async move { source.commentary(&fetch_name).await },
                    |_| None,
                )
                .await
        }
    });
    try_join_all(fetches).await?;

    gathers.record(kind, Utc::now());
    info!(%kind, members = member_count, "gather committed");
    Ok(())
}

/// Fan-out gather: one full text per solved passage, fetched concurrently
/// through the per-item cache.
async fn refresh_all_passage_texts<S: ArchiveSource>(
    source: Arc<S>,
    flights: FlightMap<GatherKind, ()>,
    chapters: Collection<(), Vec<Chapter>>,
    passages: Collection<ItemKey, Passage>,
    passage_texts: Collection<ItemKey, PassageText>,
    gathers: GatherLedger,
) -> Result<(), CacheError> {
    let kind = GatherKind::AllPassageTexts;

    if !gathers.is_fresh(GatherKind::ChapterIndex, Utc::now()) {
        let source = Arc::clone(&source);
        let chapters = chapters.clone();
        let passages = passages.clone();
        let gathers = gathers.clone();
        flights
            .run(GatherKind::ChapterIndex, async move {
                refresh_chapter_index(&source, &chapters, &passages, &gathers).await
            })
            .await?;
    }

    let members: Vec<String> = passage_snapshot(&chapters)
        .into_iter()
        .filter(|passage| passage.solved)
        .map(|passage| passage.name)
        .collect();
    let member_count = members.len();

    let fetches = members.into_iter().map(|name| {
        let source = Arc::clone(&source);
        let passage_texts = passage_texts.clone();
        async move {
            let fetch_name = name.clone();
            passage_texts
                .get_or_fetch(
                    ItemKey::Name(name),
                    move || async move { source.passage_text(Some(&fetch_name)).await },
                    |_| None,
                )
                .await
        }
    });
    try_join_all(fetches).await?;

    gathers.record(kind, Utc::now());
    info!(%kind, members = member_count, "gather committed");
    Ok(())
}

/// Cached artwork index, staleness ignored, newest first (date descending,
/// then name). The latest alias is skipped so its target appears once.
fn artwork_index_snapshot(artworks: &Collection<ItemKey, Artwork>) -> Vec<Artwork> {
    let mut index = artworks.with_store(|store| {
        store
            .iter()
            .filter(|(key, _)| matches!(key, ItemKey::Name(_)))
            .map(|(_, entry)| entry.value.clone())
            .collect::<Vec<_>>()
    });
    index.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.name.cmp(&b.name)));
    index
}

/// Cached sketch index, staleness ignored, sorted by name. The latest alias
/// is skipped so its target appears once.
fn sketch_index_snapshot(sketches: &Collection<ItemKey, Sketch>) -> Vec<Sketch> {
    let mut index = sketches.with_store(|store| {
        store
            .iter()
            .filter(|(key, _)| matches!(key, ItemKey::Name(_)))
            .map(|(_, entry)| entry.value.clone())
            .collect::<Vec<_>>()
    });
    index.sort_by(|a, b| a.name.cmp(&b.name));
    index
}

/// Cached passages in chapter order, staleness ignored.
fn passage_snapshot(chapters: &Collection<(), Vec<Chapter>>) -> Vec<Passage> {
    chapters
        .peek(&())
        .unwrap_or_default()
        .into_iter()
        .flat_map(|chapter| chapter.passages)
        .collect()
}

/// Cached commentaries paired with their artwork names, in index order.
fn commentary_snapshot(
    artworks: &Collection<ItemKey, Artwork>,
    commentaries: &Collection<String, Commentary>,
) -> Vec<(String, Commentary)> {
    artwork_index_snapshot(artworks)
        .into_iter()
        .filter(|artwork| artwork.has_commentary)
        .filter_map(|artwork| {
            commentaries
                .peek(&artwork.name)
                .map(|commentary| (artwork.name, commentary))
        })
        .collect()
}

/// Cached passage texts for solved passages, in chapter order.
fn passage_text_snapshot(
    chapters: &Collection<(), Vec<Chapter>>,
    passage_texts: &Collection<ItemKey, PassageText>,
) -> Vec<PassageText> {
    passage_snapshot(chapters)
        .into_iter()
        .filter(|passage| passage.solved)
        .filter_map(|passage| passage_texts.peek(&ItemKey::Name(passage.name)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::BoxError;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Canned upstream with per-method call counters.
    #[derive(Default)]
    struct FakeArchive {
        news_calls: AtomicUsize,
        artwork_calls: AtomicUsize,
        index_calls: AtomicUsize,
        sketch_calls: AtomicUsize,
        sketch_index_calls: AtomicUsize,
        chapter_calls: AtomicUsize,
        commentary_calls: AtomicUsize,
        text_calls: AtomicUsize,
        splash_calls: AtomicUsize,
    }

    fn artwork(name: &str, date: &str, has_commentary: bool) -> Artwork {
        Artwork {
            name: name.to_owned(),
            title: name.to_uppercase(),
            date: date.to_owned(),
            image_url: format!("https://example.com/{name}.png"),
            thumb_url: format!("https://example.com/{name}_thumb.png"),
            canon: None,
            characters: vec![],
            has_commentary,
        }
    }

    fn sketch(name: &str) -> Sketch {
        Sketch {
            name: name.to_owned(),
            title: name.to_uppercase(),
            image_url: format!("https://example.com/sketch/{name}.png"),
            thumb_url: format!("https://example.com/sketch/{name}_thumb.png"),
        }
    }

    fn passage(name: &str, chapter: &str, solved: bool) -> Passage {
        Passage {
            name: name.to_owned(),
            title: name.to_uppercase(),
            chapter: chapter.to_owned(),
            solved,
        }
    }

    impl ArchiveSource for FakeArchive {
        fn news(&self) -> impl Future<Output = Result<Vec<NewsPost>, BoxError>> + Send {
            self.news_calls.fetch_add(1, Ordering::SeqCst);
            async {
                Ok(vec![NewsPost {
                    title: "update".to_owned(),
                    date: "2026-08-01".to_owned(),
                    version: None,
                    items: vec!["a thing changed".to_owned()],
                }])
            }
        }

        fn artwork(
            &self,
            name: Option<&str>,
        ) -> impl Future<Output = Result<Artwork, BoxError>> + Send {
            self.artwork_calls.fetch_add(1, Ordering::SeqCst);
            let name = name.unwrap_or("newest").to_owned();
            async move { Ok(artwork(&name, "2026-08-20", true)) }
        }

        fn all_artworks(&self) -> impl Future<Output = Result<Vec<Artwork>, BoxError>> + Send {
            self.index_calls.fetch_add(1, Ordering::SeqCst);
            async {
                Ok(vec![
                    artwork("newest", "2026-08-20", true),
                    artwork("older", "2026-07-01", false),
                ])
            }
        }

        fn artwork_media(
            &self,
            _name: &str,
        ) -> impl Future<Output = Result<Media, BoxError>> + Send {
            async {
                Ok(Media {
                    image: vec![0xff, 0xd8],
                    thumbnail: vec![0xff],
                })
            }
        }

        fn sketch(
            &self,
            name: Option<&str>,
        ) -> impl Future<Output = Result<Sketch, BoxError>> + Send {
            self.sketch_calls.fetch_add(1, Ordering::SeqCst);
            let name = name.unwrap_or("doodle").to_owned();
            async move { Ok(sketch(&name)) }
        }

        fn all_sketches(&self) -> impl Future<Output = Result<Vec<Sketch>, BoxError>> + Send {
            self.sketch_index_calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(vec![sketch("doodle"), sketch("study")]) }
        }

        fn sketch_media(
            &self,
            _name: &str,
        ) -> impl Future<Output = Result<Media, BoxError>> + Send {
            async {
                Ok(Media {
                    image: vec![0x89, 0x50],
                    thumbnail: vec![0x89],
                })
            }
        }

        fn commentary(
            &self,
            name: &str,
        ) -> impl Future<Output = Result<Commentary, BoxError>> + Send {
            self.commentary_calls.fetch_add(1, Ordering::SeqCst);
            let name = name.to_owned();
            async move {
                Ok(Commentary {
                    title: name.to_uppercase(),
                    body: Some(format!("notes on {name}")),
                })
            }
        }

        fn chapters(&self) -> impl Future<Output = Result<Vec<Chapter>, BoxError>> + Send {
            self.chapter_calls.fetch_add(1, Ordering::SeqCst);
            async {
                Ok(vec![Chapter {
                    name: "i".to_owned(),
                    title: "Chapter I".to_owned(),
                    passages: vec![passage("one", "i", true), passage("two", "i", false)],
                }])
            }
        }

        fn passage(
            &self,
            name: Option<&str>,
        ) -> impl Future<Output = Result<Passage, BoxError>> + Send {
            let name = name.unwrap_or("one").to_owned();
            async move { Ok(passage(&name, "i", true)) }
        }

        fn passage_text(
            &self,
            name: Option<&str>,
        ) -> impl Future<Output = Result<PassageText, BoxError>> + Send {
            self.text_calls.fetch_add(1, Ordering::SeqCst);
            let name = name.unwrap_or("one").to_owned();
            async move {
                Ok(PassageText {
                    name: name.clone(),
                    title: name.to_uppercase(),
                    languages: vec![],
                    characters: vec![],
                    body: "text".to_owned(),
                })
            }
        }

        fn current_splash(&self) -> impl Future<Output = Result<Splash, BoxError>> + Send {
            self.splash_calls.fetch_add(1, Ordering::SeqCst);
            async {
                Ok(Splash {
                    text: Some("hello".to_owned()),
                    ordinal: Some(7),
                })
            }
        }

        fn splash_page(
            &self,
            page: u32,
        ) -> impl Future<Output = Result<SplashPage, BoxError>> + Send {
            self.splash_calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(SplashPage {
                    page,
                    splashes: vec![Splash {
                        text: Some(format!("page {page}")),
                        ordinal: None,
                    }],
                })
            }
        }

        fn search(
            &self,
            query: &SearchQuery,
        ) -> impl Future<Output = Result<Vec<SearchHit>, BoxError>> + Send {
            let hit = SearchHit {
                kind: query.kind,
                name: "one".to_owned(),
                title: "ONE".to_owned(),
            };
            async move { Ok(vec![hit]) }
        }
    }

    fn manager() -> (TempDir, CacheManager<FakeArchive>) {
        let temp = TempDir::new().expect("temp dir");
        let manager = CacheManager::with_root(FakeArchive::default(), temp.path());
        (temp, manager)
    }

    #[tokio::test]
    async fn test_stale_entry_triggers_exactly_one_refetch() {
        let (_temp, manager) = manager();

        manager.news().await.expect("first fetch");
        assert_eq!(manager.source.news_calls.load(Ordering::SeqCst), 1);

        // Fresh: served from cache.
        manager.news().await.expect("cached read");
        assert_eq!(manager.source.news_calls.load(Ordering::SeqCst), 1);

        // Backdate past the TTL: next read refetches once.
        let stale = Utc::now() - CacheCategory::News.ttl() - chrono::Duration::seconds(1);
        let posts = manager.news.peek(&()).expect("cached posts");
        manager.news.with_store(|store| store.restore((), posts, stale));

        manager.news().await.expect("refetch");
        assert_eq!(manager.source.news_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_latest_artwork_cached_under_both_keys() {
        let (_temp, manager) = manager();

        let latest = manager.artwork(None).await.expect("latest");
        assert_eq!(latest.name, "newest");
        assert_eq!(manager.source.artwork_calls.load(Ordering::SeqCst), 1);

        // The concrete name now hits cache without another upstream call.
        let by_name = manager.artwork(Some("newest")).await.expect("by name");
        assert_eq!(by_name, latest);
        assert_eq!(manager.source.artwork_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_index_gather_populates_single_item_reads() {
        let (_temp, manager) = manager();

        let index = manager
            .all_artworks(GatherMode::RefreshIfStale)
            .await
            .expect("gather");
        assert_eq!(index.len(), 2);
        assert_eq!(index[0].name, "newest", "newest first");

        manager.artwork(Some("older")).await.expect("cached item");
        manager.artwork(None).await.expect("cached latest");
        assert_eq!(
            manager.source.artwork_calls.load(Ordering::SeqCst),
            0,
            "index gather already populated per-item entries"
        );
    }

    #[tokio::test]
    async fn test_sketch_index_gather_populates_single_item_reads() {
        let (_temp, manager) = manager();

        let index = manager
            .all_sketches(GatherMode::RefreshIfStale)
            .await
            .expect("gather");
        assert_eq!(index.len(), 2);
        assert_eq!(manager.source.sketch_index_calls.load(Ordering::SeqCst), 1);

        manager.sketch(Some("study")).await.expect("cached item");
        manager.sketch(None).await.expect("cached latest");
        assert_eq!(
            manager.source.sketch_calls.load(Ordering::SeqCst),
            0,
            "index gather already populated per-item entries"
        );
        assert_eq!(manager.cached_sketch_names(), vec!["doodle", "study"]);
    }

    #[tokio::test]
    async fn test_latest_sketch_cached_under_both_keys() {
        let (_temp, manager) = manager();

        let latest = manager.sketch(None).await.expect("latest");
        assert_eq!(latest.name, "doodle");

        let by_name = manager.sketch(Some("doodle")).await.expect("by name");
        assert_eq!(by_name, latest);
        assert_eq!(manager.source.sketch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_splash_reads_cache_within_short_ttl() {
        let (_temp, manager) = manager();

        let first = manager.current_splash().await.expect("fetch");
        let second = manager.current_splash().await.expect("cached read");
        assert_eq!(first, second);
        assert_eq!(manager.source.splash_calls.load(Ordering::SeqCst), 1);

        // Backdate past the five-minute TTL: next read refetches.
        let stale = Utc::now() - CacheCategory::Splash.ttl() - chrono::Duration::seconds(1);
        manager
            .splash
            .with_store(|store| store.restore((), first, stale));
        manager.current_splash().await.expect("refetch");
        assert_eq!(manager.source.splash_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_splash_pages_cached_per_page() {
        let (_temp, manager) = manager();

        let page_one = manager.splash_page(1).await.expect("page 1");
        let page_two = manager.splash_page(2).await.expect("page 2");
        assert_eq!(page_one.page, 1);
        assert_eq!(page_two.page, 2);

        manager.splash_page(1).await.expect("cached page 1");
        assert_eq!(manager.source.splash_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gather_record_commits_after_every_member() {
        let (_temp, manager) = manager();

        manager
            .all_commentaries(GatherMode::RefreshIfStale)
            .await
            .expect("gather");

        let last = manager
            .gathers
            .last(GatherKind::AllCommentaries)
            .expect("record committed");
        manager.commentaries.with_store(|store| {
            for (_, entry) in store.iter() {
                assert!(entry.fetched_at <= last, "member fetched before commit");
            }
        });
    }

    #[tokio::test]
    async fn test_fan_out_gather_fetches_only_flagged_members() {
        let (_temp, manager) = manager();

        let pairs = manager
            .all_commentaries(GatherMode::RefreshIfStale)
            .await
            .expect("gather");

        // Only "newest" has commentary in the canned index.
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "newest");
        assert_eq!(manager.source.commentary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.source.index_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_passage_text_gather_skips_unsolved() {
        let (_temp, manager) = manager();

        let texts = manager
            .all_passage_texts(GatherMode::RefreshIfStale)
            .await
            .expect("gather");

        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].name, "one");
        assert_eq!(manager.source.text_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_only_mode_never_touches_upstream() {
        let (_temp, manager) = manager();

        let err = manager
            .chapters(GatherMode::ReadOnlyMustExist)
            .await
            .expect_err("nothing gathered yet");
        assert!(matches!(
            err,
            CacheError::NotGathered {
                kind: GatherKind::ChapterIndex
            }
        ));
        assert_eq!(manager.source.chapter_calls.load(Ordering::SeqCst), 0);

        manager
            .chapters(GatherMode::RefreshIfStale)
            .await
            .expect("gather");
        let cached = manager
            .chapters(GatherMode::ReadOnlyMustExist)
            .await
            .expect("read back");
        assert_eq!(cached.len(), 1);
        assert_eq!(manager.source.chapter_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forced_gather_rate_limited_inside_cooldown() {
        let (_temp, manager) = manager();

        manager
            .all_artworks(GatherMode::ForceNow)
            .await
            .expect("first gather never limited");
        let err = manager
            .all_artworks(GatherMode::ForceNow)
            .await
            .expect_err("second forced gather inside cooldown");
        assert!(err.retry_at().is_some());

        // RefreshIfStale still serves the cached collection.
        let cached = manager
            .all_artworks(GatherMode::RefreshIfStale)
            .await
            .expect("cached");
        assert_eq!(cached.len(), 2);
        assert_eq!(manager.source.index_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_purge_cascades_and_invalidates_gather_record() {
        let (_temp, manager) = manager();

        manager
            .chapters(GatherMode::RefreshIfStale)
            .await
            .expect("gather");
        assert!(!manager.cached_passage_names().is_empty());

        manager
            .purge(CacheCategory::Chapters, false)
            .expect("purge");
        assert!(manager.chapters.peek(&()).is_none());
        assert!(manager.cached_passage_names().is_empty(), "cascade cleared");
        assert!(
            manager.gathers.last(GatherKind::ChapterIndex).is_none(),
            "gather record invalidated"
        );
    }

    #[tokio::test]
    async fn test_purge_cooldown_and_force_override() {
        let (_temp, manager) = manager();

        manager
            .purge(CacheCategory::News, false)
            .expect("first purge");
        let err = manager
            .purge(CacheCategory::News, false)
            .expect_err("second purge inside cooldown");
        let retry_at = err.retry_at().expect("retry time");
        assert!(retry_at > Utc::now());

        manager
            .purge(CacheCategory::News, true)
            .expect("forced purge ignores cooldown");
    }

    #[tokio::test]
    async fn test_fetch_never_moves_purge_clock() {
        let (_temp, manager) = manager();

        manager.news().await.expect("fetch");
        assert!(manager.purges.last(CacheCategory::News).is_none());
    }

    #[tokio::test]
    async fn test_gather_status_reports_deadlines() {
        let (_temp, manager) = manager();

        let before = manager.gather_status(GatherKind::ArtworkIndex);
        assert!(before.last_gather_at.is_none());
        assert!(before.cooldown_until.is_none());

        manager
            .all_artworks(GatherMode::RefreshIfStale)
            .await
            .expect("gather");

        let after = manager.gather_status(GatherKind::ArtworkIndex);
        let last = after.last_gather_at.expect("gathered");
        assert_eq!(
            after.fresh_until,
            Some(last + GatherKind::ArtworkIndex.spec().ttl)
        );
        assert_eq!(
            after.cooldown_until,
            Some(last + GatherKind::ArtworkIndex.spec().cooldown)
        );
    }
}
