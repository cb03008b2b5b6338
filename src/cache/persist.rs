//! Durable persistence for category stores and bookkeeping
//!
//! One JSON file per category under the cache root, written atomically: the
//! new contents go to a staging file, any existing file rotates to a `.bak`
//! sibling, then the staging file is renamed into place. Binary media is not
//! embedded in its index; each payload is written as paired sibling files
//! under a per-category subdirectory, referenced from a small index of
//! `(key, filename, fetched_at)` rows that is loadable on its own. A media
//! save only rewrites payloads whose entry changed since the previous index,
//! and removes content files the new index no longer references.
//!
//! Saves are no-ops while a store is clean. Load failures are the caller's
//! to log and treat as "category absent"; they must never block startup.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use super::category::{CacheCategory, GatherKind};
use super::store::Store;
use crate::data::Media;

/// Bumped when the on-disk layout changes; mismatched files are ignored.
const FORMAT_VERSION: u32 = 1;

/// Internal persistence failure. Never crosses the read/write API boundary;
/// the manager logs it and the affected category degrades to in-memory-only.
#[derive(Debug, Error)]
pub(crate) enum PersistError {
    #[error("cache file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache (de)serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted form of one category: a version tag plus structured
/// `(key, fetched_at, value)` rows. Rows rather than a JSON map, so keys
/// keep their structure instead of being flattened to strings.
#[derive(Serialize)]
struct StoredCategoryRef<'a, K, V> {
    version: u32,
    entries: Vec<StoredEntryRef<'a, K, V>>,
}

#[derive(Serialize)]
struct StoredEntryRef<'a, K, V> {
    key: &'a K,
    fetched_at: DateTime<Utc>,
    value: &'a V,
}

#[derive(Deserialize)]
struct StoredCategory<K, V> {
    version: u32,
    entries: Vec<StoredEntry<K, V>>,
}

#[derive(Deserialize)]
struct StoredEntry<K, V> {
    key: K,
    fetched_at: DateTime<Utc>,
    value: V,
}

/// Index for a binary media category: content lives in sibling files.
#[derive(Serialize, Deserialize)]
struct MediaIndex {
    version: u32,
    entries: Vec<MediaIndexEntry>,
}

#[derive(Serialize, Deserialize, Clone)]
struct MediaIndexEntry {
    key: String,
    file: String,
    fetched_at: DateTime<Utc>,
}

/// Persisted bookkeeping: last-gather and last-purge timestamps.
#[derive(Serialize, Deserialize)]
pub(crate) struct MetaFile {
    version: u32,
    pub last_purge: Vec<(CacheCategory, DateTime<Utc>)>,
    pub last_gather: Vec<(GatherKind, DateTime<Utc>)>,
}

impl MetaFile {
    pub fn new(
        last_purge: Vec<(CacheCategory, DateTime<Utc>)>,
        last_gather: Vec<(GatherKind, DateTime<Utc>)>,
    ) -> Self {
        Self {
            version: FORMAT_VERSION,
            last_purge,
            last_gather,
        }
    }
}

/// Path of a category's JSON file under the cache root.
pub(crate) fn category_path(root: &Path, category: CacheCategory) -> PathBuf {
    root.join(format!("{}.json", category.spec().file_stem))
}

/// Path of the bookkeeping file under the cache root.
pub(crate) fn meta_path(root: &Path) -> PathBuf {
    root.join("meta.json")
}

fn media_dir(root: &Path, category: CacheCategory) -> PathBuf {
    root.join(category.spec().file_stem)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Writes `contents` atomically: staging file, `.bak` rotation, rename.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let staging = sibling(path, ".tmp");
    fs::write(&staging, contents)?;
    if path.exists() {
        fs::rename(path, sibling(path, ".bak"))?;
    }
    fs::rename(&staging, path)?;
    Ok(())
}

/// Writes `contents` through a staging file without keeping a backup.
/// Used for media payloads, which are redundant with the upstream anyway.
fn write_replace(path: &Path, contents: &[u8]) -> Result<(), PersistError> {
    let staging = sibling(path, ".tmp");
    fs::write(&staging, contents)?;
    fs::rename(&staging, path)?;
    Ok(())
}

/// Reads and parses a JSON file, returning `None` if it does not exist.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Saves a category store if dirty. Returns whether anything was written.
pub(crate) fn save_store<K, V>(store: &mut Store<K, V>, root: &Path) -> Result<bool, PersistError>
where
    K: Eq + Hash + Serialize,
    V: Serialize,
{
    if !store.is_dirty() {
        return Ok(false);
    }

    let stored = StoredCategoryRef {
        version: FORMAT_VERSION,
        entries: store
            .iter()
            .map(|(key, entry)| StoredEntryRef {
                key,
                fetched_at: entry.fetched_at,
                value: &entry.value,
            })
            .collect(),
    };
    let json = serde_json::to_string_pretty(&stored)?;
    write_atomic(&category_path(root, store.category()), json.as_bytes())?;

    store.mark_clean();
    Ok(true)
}

/// Loads a category store from disk if a file exists. Entries past their TTL
/// are restored anyway so best-effort reads can serve them immediately after
/// a restart. Returns whether a file was found.
pub(crate) fn load_store<K, V>(store: &mut Store<K, V>, root: &Path) -> Result<bool, PersistError>
where
    K: Eq + Hash + DeserializeOwned,
    V: DeserializeOwned,
{
    let path = category_path(root, store.category());
    let Some(stored) = read_json::<StoredCategory<K, V>>(&path)? else {
        return Ok(false);
    };
    if stored.version != FORMAT_VERSION {
        return Ok(false);
    }

    for entry in stored.entries {
        store.restore(entry.key, entry.value, entry.fetched_at);
    }
    Ok(true)
}

/// Turns a cache key into a filesystem-safe stem, deduplicated against stems
/// already taken. The index maps key to filename, so sanitization never has
/// to be reversible.
fn media_stem(key: &str, used: &mut HashSet<String>) -> String {
    let mut stem: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        stem = "item".to_owned();
    }
    if used.contains(&stem) {
        let mut n = 2;
        while used.contains(&format!("{stem}-{n}")) {
            n += 1;
        }
        stem = format!("{stem}-{n}");
    }
    used.insert(stem.clone());
    stem
}

/// Saves a media store if dirty: paired content files plus a compact index.
///
/// The previous index is consulted so a save is incremental: an entry whose
/// `fetched_at` is unchanged keeps its existing files untouched, and content
/// files no longer referenced by any entry are removed along with their
/// staging leftovers.
pub(crate) fn save_media(
    store: &mut Store<String, Media>,
    root: &Path,
) -> Result<bool, PersistError> {
    if !store.is_dirty() {
        return Ok(false);
    }

    let index_path = category_path(root, store.category());
    let dir = media_dir(root, store.category());
    fs::create_dir_all(&dir)?;

    let previous: HashMap<String, MediaIndexEntry> = read_json::<MediaIndex>(&index_path)
        .unwrap_or(None)
        .filter(|index| index.version == FORMAT_VERSION)
        .map(|index| {
            index
                .entries
                .into_iter()
                .map(|row| (row.key.clone(), row))
                .collect()
        })
        .unwrap_or_default();

    let mut used = HashSet::new();
    let mut entries = Vec::with_capacity(store.len());
    for (key, entry) in store.iter() {
        let prior = previous.get(key).filter(|row| !used.contains(&row.file));
        let stem = match prior {
            Some(row) => {
                used.insert(row.file.clone());
                row.file.clone()
            }
            None => media_stem(key, &mut used),
        };
        let image_path = dir.join(format!("{stem}.img"));
        let thumb_path = dir.join(format!("{stem}.thumb"));
        // A matching fetch timestamp means the payload on disk is current.
        let unchanged = prior.is_some_and(|row| row.fetched_at == entry.fetched_at)
            && image_path.exists()
            && thumb_path.exists();
        if !unchanged {
            write_replace(&image_path, &entry.value.image)?;
            write_replace(&thumb_path, &entry.value.thumbnail)?;
        }
        entries.push(MediaIndexEntry {
            key: key.clone(),
            file: stem,
            fetched_at: entry.fetched_at,
        });
    }

    let expected: HashSet<String> = entries
        .iter()
        .flat_map(|row| [format!("{}.img", row.file), format!("{}.thumb", row.file)])
        .collect();
    for dir_entry in fs::read_dir(&dir)? {
        let dir_entry = dir_entry?;
        let name = dir_entry.file_name();
        if !expected.contains(name.to_string_lossy().as_ref()) {
            fs::remove_file(dir_entry.path())?;
        }
    }

    let index = MediaIndex {
        version: FORMAT_VERSION,
        entries,
    };
    let json = serde_json::to_string_pretty(&index)?;
    write_atomic(&index_path, json.as_bytes())?;

    store.mark_clean();
    Ok(true)
}

/// Loads a media store from its index; rows whose content files went
/// missing are skipped rather than failing the whole category.
pub(crate) fn load_media(
    store: &mut Store<String, Media>,
    root: &Path,
) -> Result<bool, PersistError> {
    let path = category_path(root, store.category());
    let Some(index) = read_json::<MediaIndex>(&path)? else {
        return Ok(false);
    };
    if index.version != FORMAT_VERSION {
        return Ok(false);
    }

    let dir = media_dir(root, store.category());
    for row in index.entries {
        let image_path = dir.join(format!("{}.img", row.file));
        let thumb_path = dir.join(format!("{}.thumb", row.file));
        if !image_path.exists() || !thumb_path.exists() {
            continue;
        }
        let media = Media {
            image: fs::read(&image_path)?,
            thumbnail: fs::read(&thumb_path)?,
        };
        store.restore(row.key, media, row.fetched_at);
    }
    Ok(true)
}

/// Saves the bookkeeping file.
pub(crate) fn save_meta(root: &Path, meta: &MetaFile) -> Result<(), PersistError> {
    let json = serde_json::to_string_pretty(meta)?;
    write_atomic(&meta_path(root), json.as_bytes())
}

/// Loads the bookkeeping file, `None` if absent or from another layout.
pub(crate) fn load_meta(root: &Path) -> Result<Option<MetaFile>, PersistError> {
    Ok(read_json::<MetaFile>(&meta_path(root))?.filter(|meta| meta.version == FORMAT_VERSION))
}
