//! A metadata cache that parses Markdown notes when asked.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::{CachedMetadata, FileStore, MetadataCache};
use crate::error::Result;
use crate::path;

/// Never stale: every lookup reads the file. Canvases and non-note files have
/// no cache entry.
pub struct ParsingCache {
    store: Arc<dyn FileStore>,
    auto_update_links: AtomicBool,
}

impl ParsingCache {
    pub fn new(store: Arc<dyn FileStore>) -> ParsingCache {
        ParsingCache {
            store,
            auto_update_links: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl MetadataCache for ParsingCache {
    async fn get_cache(&self, path: &str) -> Result<Option<CachedMetadata>> {
        if !path::is_markdown(path) {
            return Ok(None);
        }
        // stat before read: a concurrent write then shows up as an older mtime,
        // never as fresh metadata over stale text
        let Some(stat) = self.store.stat(path).await? else {
            return Ok(None);
        };
        let text = self.store.read(path).await?;
        Ok(Some(CachedMetadata::from_text(&text, stat.mtime)))
    }

    async fn get_first_linkpath_dest(
        &self,
        link_path: &str,
        source_path: &str,
    ) -> Result<Option<String>> {
        let files: BTreeSet<String> = self.store.all_files().await?.into_iter().collect();
        Ok(path::first_linkpath_dest(link_path, source_path, &files))
    }

    fn auto_update_links(&self) -> bool {
        self.auto_update_links.load(Ordering::SeqCst)
    }

    fn set_auto_update_links(&self, enabled: bool) {
        self.auto_update_links.store(enabled, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryStore;

    #[tokio::test]
    async fn test_cache_entries() {
        let store = Arc::new(MemoryStore::with_files([
            ("Notes/A.md", "![[img.png]]"),
            ("Notes/img.png", "png"),
            ("board.canvas", "{}"),
        ]));
        let cache = ParsingCache::new(store.clone());

        let entry = cache.get_cache("Notes/A.md").await.unwrap().unwrap();
        assert_eq!(entry.embeds.len(), 1);
        assert_eq!(entry.mtime, store.stat("Notes/A.md").await.unwrap().unwrap().mtime);
        assert!(cache.get_cache("board.canvas").await.unwrap().is_none());
        assert!(cache.get_cache("missing.md").await.unwrap().is_none());

        assert_eq!(
            cache
                .get_first_linkpath_dest("img.png", "Notes/A.md")
                .await
                .unwrap()
                .as_deref(),
            Some("Notes/img.png")
        );
    }
}
