//! Core data models for archive content
//!
//! This module contains the payload types served by the cache: news posts,
//! artworks with their binary media and commentary, chapters of passages with
//! full texts, and domain search results. How these are rendered for users,
//! and the upstream wire shapes they are parsed from, are both out of scope;
//! the cache only stores and returns them.

use serde::{Deserialize, Serialize};

/// Identifies an item in a category that supports a "latest" alias.
///
/// A request with no identifier ("give me the most recent one") is cached
/// under [`ItemKey::Latest`] and, in lock-step, under the concrete
/// [`ItemKey::Name`] it resolved to, so a later lookup by either key hits the
/// same cached value without a second fetch.
///
/// Keys are persisted structurally (as tagged JSON), never as delimited
/// strings, so names containing arbitrary characters survive a round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKey {
    /// The most recently published item, whatever it currently is.
    Latest,
    /// A concrete item identified by name.
    Name(String),
}

impl ItemKey {
    /// Builds a key from an optional name, mapping `None` to [`ItemKey::Latest`].
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some(name) => ItemKey::Name(name.to_owned()),
            None => ItemKey::Latest,
        }
    }
}

/// A single news post from the archive front page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsPost {
    /// Post title
    pub title: String,
    /// Publication date as shown by the archive
    pub date: String,
    /// Site version announced by the post, if any
    pub version: Option<String>,
    /// Individual change lines
    pub items: Vec<String>,
}

/// Metadata for one artwork in the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artwork {
    /// Identifying name (stable slug)
    pub name: String,
    /// Display title
    pub title: String,
    /// Publication date as shown by the archive
    pub date: String,
    /// URL of the full-size image
    pub image_url: String,
    /// URL of the thumbnail
    pub thumb_url: String,
    /// Canon the artwork belongs to, if any
    pub canon: Option<String>,
    /// Characters depicted
    pub characters: Vec<String>,
    /// Whether written commentary exists for this artwork
    pub has_commentary: bool,
}

/// Binary contents of an artwork or sketch: the full image and its thumbnail.
///
/// Media is deliberately not serialized into the category index file; the
/// persistence layer writes each payload as paired sibling files so the index
/// stays small and loadable on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Media {
    /// Encoded full-size image bytes
    pub image: Vec<u8>,
    /// Encoded thumbnail bytes
    pub thumbnail: Vec<u8>,
}

/// Metadata for one sketch in the sketchbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sketch {
    /// Identifying name (stable slug)
    pub name: String,
    /// Display title
    pub title: String,
    /// URL of the full-size image
    pub image_url: String,
    /// URL of the thumbnail
    pub thumb_url: String,
}

/// Written commentary attached to an artwork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commentary {
    /// Title of the artwork the commentary belongs to
    pub title: String,
    /// Commentary body, absent when the author has not written one
    pub body: Option<String>,
}

/// A chapter of the episodic, holding its passages in publication order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// Identifying name
    pub name: String,
    /// Display title
    pub title: String,
    /// Passages belonging to this chapter
    pub passages: Vec<Passage>,
}

/// Metadata for one passage of the episodic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Identifying name (stable slug)
    pub name: String,
    /// Display title
    pub title: String,
    /// Name of the chapter this passage belongs to
    pub chapter: String,
    /// Whether the passage has been unlocked; only solved passages have text
    pub solved: bool,
}

/// Full text of a solved passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageText {
    /// Identifying name of the passage
    pub name: String,
    /// Display title
    pub title: String,
    /// Languages appearing in the text
    pub languages: Vec<String>,
    /// Characters speaking in the text
    pub characters: Vec<String>,
    /// The text body
    pub body: String,
}

/// The splash line shown on the archive front page.
///
/// Both fields are absent when no splash is currently displayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Splash {
    /// Splash text
    pub text: Option<String>,
    /// Position in the full splash list
    pub ordinal: Option<u64>,
}

/// One page of the full splash list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplashPage {
    /// Page number, as requested
    pub page: u32,
    /// Splashes on this page
    pub splashes: Vec<Splash>,
}

/// What a domain search should match against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    Artwork,
    Passage,
    PassageLine,
}

/// A domain search request; used as a composite cache key.
///
/// Persisted as a structured value rather than a `term|kind` string, so a
/// term containing the delimiter cannot be confused with a different query
/// after a persistence round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchQuery {
    /// The term to search for
    pub term: String,
    /// The kind of content to search
    pub kind: SearchKind,
}

impl SearchQuery {
    pub fn new(term: impl Into<String>, kind: SearchKind) -> Self {
        Self {
            term: term.into(),
            kind,
        }
    }
}

/// One result of a domain search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// What kind of content matched
    pub kind: SearchKind,
    /// Identifying name of the matched item
    pub name: String,
    /// Display title of the matched item
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_key_from_name() {
        assert_eq!(ItemKey::from_name(None), ItemKey::Latest);
        assert_eq!(
            ItemKey::from_name(Some("red-tower")),
            ItemKey::Name("red-tower".to_owned())
        );
    }

    #[test]
    fn test_item_key_serializes_structurally() {
        let latest = serde_json::to_string(&ItemKey::Latest).expect("serialize latest");
        let named =
            serde_json::to_string(&ItemKey::Name("a|b".to_owned())).expect("serialize name");

        // The two forms must stay distinguishable even for hostile names.
        assert_ne!(latest, named);
        let back: ItemKey = serde_json::from_str(&named).expect("deserialize name");
        assert_eq!(back, ItemKey::Name("a|b".to_owned()));
    }

    #[test]
    fn test_search_query_roundtrip_with_delimiter_in_term() {
        let query = SearchQuery::new("red|tower / spire", SearchKind::PassageLine);
        let json = serde_json::to_string(&query).expect("serialize query");
        let back: SearchQuery = serde_json::from_str(&json).expect("deserialize query");
        assert_eq!(back, query);
    }
}
