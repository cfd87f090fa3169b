//! Reading the references of a note and resolving them to files.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use itertools::Itertools;
use tracing::warn;

use crate::canvas;
use crate::error::Result;
use crate::host::{CachedMetadata, FileStore, Host, MetadataCache};
use crate::path;
use crate::reference::{Reference, ReferenceKind, ResolvedTarget};
use crate::wait::ConsistencyWait;

/// Turns link text into the file it points at, as seen from a source note.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve_link(&self, link_path: &str, source_path: &str) -> Result<Option<String>>;
}

/// Resolution through the host's metadata cache.
pub struct CacheResolver<'a> {
    cache: &'a dyn MetadataCache,
}

impl<'a> CacheResolver<'a> {
    pub fn new(cache: &'a dyn MetadataCache) -> CacheResolver<'a> {
        CacheResolver { cache }
    }
}

#[async_trait]
impl Resolve for CacheResolver<'_> {
    async fn resolve_link(&self, link_path: &str, source_path: &str) -> Result<Option<String>> {
        self.cache.get_first_linkpath_dest(link_path, source_path).await
    }
}

/// Resolution against a fixed set of vault files, e.g. the vault as it was
/// before a rename.
#[derive(Debug, Clone, Default)]
pub struct SnapshotResolver {
    files: BTreeSet<String>,
}

impl SnapshotResolver {
    pub fn new(files: BTreeSet<String>) -> SnapshotResolver {
        SnapshotResolver { files }
    }

    pub async fn current(store: &dyn FileStore) -> Result<SnapshotResolver> {
        Ok(SnapshotResolver::new(store.all_files().await?.into_iter().collect()))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains(path)
    }
}

#[async_trait]
impl Resolve for SnapshotResolver {
    async fn resolve_link(&self, link_path: &str, source_path: &str) -> Result<Option<String>> {
        Ok(path::first_linkpath_dest(link_path, source_path, &self.files))
    }
}

pub async fn resolve(
    resolver: &dyn Resolve,
    reference: &Reference,
    note_path: &str,
) -> Result<ResolvedTarget> {
    let target = reference.link_target();
    let file = resolver.resolve_link(&target.link_path, note_path).await?;
    Ok(ResolvedTarget {
        absolute_path: path::to_absolute(&target.link_path, note_path),
        subpath: target.subpath,
        file,
    })
}

/// Waits until the cache entry of `path` is at least as new as the file.
/// `None` when the file does not exist (anymore).
pub async fn fresh_cache(
    host: &Host,
    path: &str,
    wait: &ConsistencyWait,
) -> Result<Option<CachedMetadata>> {
    let store = host.store.as_ref();
    let cache = host.cache.as_ref();
    wait.until(&format!("metadata cache of {path}"), move || async move {
        let Some(stat) = store.stat(path).await? else {
            return Ok(Some(None));
        };
        match cache.get_cache(path).await? {
            Some(entry) if entry.mtime >= stat.mtime => Ok(Some(Some(entry))),
            _ => Ok(None),
        }
    })
    .await
}

/// Sorts by start offset and keeps only the first reference at any offset.
/// Hosts have been seen reporting the same footnote link twice.
pub fn dedup_by_start(mut references: Vec<Reference>) -> Vec<Reference> {
    references.sort_by_key(|reference| reference.start);
    references.dedup_by_key(|reference| reference.start);
    references
}

pub fn references_from_cache(entry: &CachedMetadata) -> Vec<Reference> {
    let links = entry
        .links
        .iter()
        .map(|reference| Reference::from_cache(reference, ReferenceKind::Link));
    let embeds = entry
        .embeds
        .iter()
        .map(|reference| Reference::from_cache(reference, ReferenceKind::Embed));
    dedup_by_start(links.chain(embeds).collect())
}

/// References of a note ordered by offset. Canvas references come from the
/// canvas JSON and are not patchable; other files have none.
pub async fn scan(host: &Host, path: &str, wait: &ConsistencyWait) -> Result<Vec<Reference>> {
    if path::is_canvas(path) {
        let text = host.store.read(path).await?;
        return canvas::extract_references(path, &text);
    }
    if !path::is_markdown(path) {
        return Ok(vec![]);
    }
    Ok(fresh_cache(host, path, wait)
        .await?
        .map(|entry| references_from_cache(&entry))
        .unwrap_or_default())
}

/// Markdown notes and canvases, sorted.
pub async fn list_notes(store: &dyn FileStore) -> Result<Vec<String>> {
    Ok(store
        .all_files()
        .await?
        .into_iter()
        .filter(|file| path::is_note(file))
        .sorted()
        .collect())
}

/// For each file of `targets` that something links to, the notes linking to
/// it.
pub async fn backlinks(
    host: &Host,
    resolver: &dyn Resolve,
    targets: &BTreeSet<String>,
    wait: &ConsistencyWait,
) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let mut found: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    if targets.is_empty() {
        return Ok(found);
    }
    for note in list_notes(host.store.as_ref()).await? {
        let references = match scan(host, &note, wait).await {
            Ok(references) => references,
            Err(err) => {
                warn!("Skipping {note} while searching backlinks: {err}");
                continue;
            }
        };
        for reference in references {
            let resolved = match resolve(resolver, &reference, &note).await {
                Ok(resolved) => resolved,
                Err(err) => {
                    warn!("Skipping a reference in {note} while searching backlinks: {err}");
                    continue;
                }
            };
            if let Some(file) = resolved.file.filter(|file| targets.contains(file)) {
                found.entry(file).or_default().insert(note.clone());
            }
        }
    }
    Ok(found)
}
