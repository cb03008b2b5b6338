//! Category and gather descriptors
//!
//! One descriptor row per category drives TTL checks, purge cooldowns, purge
//! cascades and persistence file naming everywhere in the crate; adding a
//! category means adding a row here, not editing every operation that touches
//! it. Gather kinds get their own table with the bulk-refresh cooldowns.

use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Every cached content category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    News,
    Artworks,
    ArtworkMedia,
    Sketches,
    SketchMedia,
    Commentaries,
    Chapters,
    Passages,
    PassageTexts,
    SearchResults,
    Splash,
    SplashPages,
}

/// Static description of one category's temporal policies.
#[derive(Debug, Clone, Copy)]
pub struct CategorySpec {
    /// How long an entry stays fresh after its fetch completed.
    pub ttl: Duration,
    /// Minimum time between two unforced purges of this category.
    /// Never longer than the TTL.
    pub purge_cooldown: Duration,
    /// Categories cleared alongside this one on purge.
    pub cascade: &'static [CacheCategory],
    /// File stem used by the persistence layer.
    pub file_stem: &'static str,
}

impl CacheCategory {
    /// All categories, in persistence order.
    pub const ALL: [CacheCategory; 12] = [
        CacheCategory::News,
        CacheCategory::Artworks,
        CacheCategory::ArtworkMedia,
        CacheCategory::Sketches,
        CacheCategory::SketchMedia,
        CacheCategory::Commentaries,
        CacheCategory::Chapters,
        CacheCategory::Passages,
        CacheCategory::PassageTexts,
        CacheCategory::SearchResults,
        CacheCategory::Splash,
        CacheCategory::SplashPages,
    ];

    /// Returns the descriptor row for this category.
    pub fn spec(self) -> CategorySpec {
        match self {
            CacheCategory::News => CategorySpec {
                ttl: Duration::hours(4),
                purge_cooldown: Duration::minutes(20),
                cascade: &[],
                file_stem: "news",
            },
            CacheCategory::Artworks => CategorySpec {
                ttl: Duration::hours(4),
                purge_cooldown: Duration::minutes(20),
                cascade: &[],
                file_stem: "artworks",
            },
            CacheCategory::ArtworkMedia => CategorySpec {
                ttl: Duration::hours(24),
                purge_cooldown: Duration::hours(2),
                cascade: &[],
                file_stem: "artwork_media",
            },
            CacheCategory::Sketches => CategorySpec {
                ttl: Duration::hours(4),
                purge_cooldown: Duration::minutes(20),
                cascade: &[],
                file_stem: "sketches",
            },
            CacheCategory::SketchMedia => CategorySpec {
                ttl: Duration::hours(24),
                purge_cooldown: Duration::hours(2),
                cascade: &[],
                file_stem: "sketch_media",
            },
            CacheCategory::Commentaries => CategorySpec {
                ttl: Duration::hours(12),
                purge_cooldown: Duration::hours(1),
                cascade: &[],
                file_stem: "commentaries",
            },
            CacheCategory::Chapters => CategorySpec {
                ttl: Duration::hours(4),
                purge_cooldown: Duration::minutes(20),
                // The chapter index populates the passage entries, so
                // clearing it also clears them.
                cascade: &[CacheCategory::Passages],
                file_stem: "chapters",
            },
            CacheCategory::Passages => CategorySpec {
                ttl: Duration::hours(4),
                purge_cooldown: Duration::minutes(20),
                cascade: &[],
                file_stem: "passages",
            },
            CacheCategory::PassageTexts => CategorySpec {
                ttl: Duration::hours(12),
                purge_cooldown: Duration::hours(1),
                cascade: &[],
                file_stem: "passage_texts",
            },
            CacheCategory::SearchResults => CategorySpec {
                ttl: Duration::hours(4),
                purge_cooldown: Duration::minutes(20),
                cascade: &[],
                file_stem: "search_results",
            },
            // Splashes rotate quickly upstream, so both windows are short.
            CacheCategory::Splash => CategorySpec {
                ttl: Duration::minutes(5),
                purge_cooldown: Duration::minutes(5),
                cascade: &[],
                file_stem: "splash",
            },
            CacheCategory::SplashPages => CategorySpec {
                ttl: Duration::minutes(5),
                purge_cooldown: Duration::minutes(5),
                cascade: &[],
                file_stem: "splash_pages",
            },
        }
    }

    /// TTL shorthand.
    pub fn ttl(self) -> Duration {
        self.spec().ttl
    }

    /// Purge-cooldown shorthand.
    pub fn purge_cooldown(self) -> Duration {
        self.spec().purge_cooldown
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spec().file_stem)
    }
}

/// Bulk "gather the whole collection" operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatherKind {
    /// The full artwork index (one upstream call).
    ArtworkIndex,
    /// The full sketch index (one upstream call).
    SketchIndex,
    /// The full chapter index, which also populates passages (one upstream call).
    ChapterIndex,
    /// Commentary for every artwork (fan-out across the index).
    AllCommentaries,
    /// Full text for every solved passage (fan-out across the chapters).
    AllPassageTexts,
}

/// Static description of one gather kind's temporal policies.
#[derive(Debug, Clone, Copy)]
pub struct GatherSpec {
    /// How long a completed gather keeps the whole collection fresh.
    ///
    /// Judged solely against the gather record, independent of any single
    /// member's fetch time.
    pub ttl: Duration,
    /// Minimum time between two gathers of this kind.
    pub cooldown: Duration,
    /// The categories holding the gathered members; purging any of them
    /// invalidates the gather record.
    pub member_categories: &'static [CacheCategory],
}

impl GatherKind {
    /// All gather kinds, in persistence order.
    pub const ALL: [GatherKind; 5] = [
        GatherKind::ArtworkIndex,
        GatherKind::SketchIndex,
        GatherKind::ChapterIndex,
        GatherKind::AllCommentaries,
        GatherKind::AllPassageTexts,
    ];

    /// Returns the descriptor row for this gather kind.
    pub fn spec(self) -> GatherSpec {
        match self {
            GatherKind::ArtworkIndex => GatherSpec {
                ttl: Duration::hours(4),
                cooldown: Duration::minutes(20),
                member_categories: &[CacheCategory::Artworks],
            },
            GatherKind::SketchIndex => GatherSpec {
                ttl: Duration::hours(4),
                cooldown: Duration::minutes(20),
                member_categories: &[CacheCategory::Sketches],
            },
            GatherKind::ChapterIndex => GatherSpec {
                ttl: Duration::hours(4),
                cooldown: Duration::minutes(20),
                member_categories: &[CacheCategory::Chapters, CacheCategory::Passages],
            },
            GatherKind::AllCommentaries => GatherSpec {
                ttl: Duration::hours(24),
                cooldown: Duration::hours(2),
                member_categories: &[CacheCategory::Commentaries],
            },
            GatherKind::AllPassageTexts => GatherSpec {
                ttl: Duration::hours(24),
                cooldown: Duration::hours(2),
                member_categories: &[CacheCategory::PassageTexts],
            },
        }
    }
}

impl fmt::Display for GatherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GatherKind::ArtworkIndex => "artwork_index",
            GatherKind::SketchIndex => "sketch_index",
            GatherKind::ChapterIndex => "chapter_index",
            GatherKind::AllCommentaries => "all_commentaries",
            GatherKind::AllPassageTexts => "all_passage_texts",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purge_cooldown_never_exceeds_ttl() {
        for category in CacheCategory::ALL {
            let spec = category.spec();
            assert!(
                spec.purge_cooldown <= spec.ttl,
                "{category} cooldown must allow a purge once the entries go stale"
            );
        }
    }

    #[test]
    fn test_splash_categories_are_short_lived() {
        assert_eq!(CacheCategory::Splash.ttl(), Duration::minutes(5));
        assert_eq!(CacheCategory::Splash.purge_cooldown(), Duration::minutes(5));
        assert_eq!(CacheCategory::SplashPages.ttl(), Duration::minutes(5));
    }

    #[test]
    fn test_file_stems_are_unique() {
        let mut stems: Vec<_> = CacheCategory::ALL
            .iter()
            .map(|c| c.spec().file_stem)
            .collect();
        stems.sort_unstable();
        stems.dedup();
        assert_eq!(stems.len(), CacheCategory::ALL.len());
    }

    #[test]
    fn test_chapters_cascade_clears_passages() {
        assert_eq!(
            CacheCategory::Chapters.spec().cascade,
            &[CacheCategory::Passages]
        );
    }

    #[test]
    fn test_gather_member_categories_match() {
        assert_eq!(
            GatherKind::AllPassageTexts.spec().member_categories,
            &[CacheCategory::PassageTexts]
        );
        assert_eq!(
            GatherKind::ArtworkIndex.spec().member_categories,
            &[CacheCategory::Artworks]
        );
        assert_eq!(
            GatherKind::SketchIndex.spec().member_categories,
            &[CacheCategory::Sketches]
        );
        assert!(GatherKind::ChapterIndex
            .spec()
            .member_categories
            .contains(&CacheCategory::Passages));
    }
}
