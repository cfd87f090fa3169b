//! Removing folders left empty by moves and deletes.

use std::cmp::Reverse;

use tracing::{info, warn};

use crate::config::EmptyFolderBehavior;
use crate::error::Result;
use crate::host::FileStore;
use crate::path;

pub async fn is_empty_folder(store: &dyn FileStore, folder: &str) -> Result<bool> {
    let listing = store.list(folder).await?;
    Ok(listing.files.is_empty() && listing.folders.is_empty())
}

async fn delete_if_empty(store: &dyn FileStore, folder: &str) -> Result<bool> {
    if folder.is_empty()
        || !store.exists(folder).await?
        || store.stat(folder).await?.is_some()
        || !is_empty_folder(store, folder).await?
    {
        return Ok(false);
    }
    match store.delete(folder).await {
        Ok(()) => {
            info!("Removed empty folder {folder}");
            Ok(true)
        }
        Err(err) => {
            warn!("Could not remove empty folder {folder}: {err}");
            Ok(false)
        }
    }
}

/// Removes `folder` if it is empty and, with
/// [`EmptyFolderBehavior::DeleteWithEmptyParents`], every ancestor that
/// becomes empty as a result. The vault root is never removed.
pub async fn cleanup(
    store: &dyn FileStore,
    folder: &str,
    behavior: EmptyFolderBehavior,
) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    if behavior == EmptyFolderBehavior::Keep {
        return Ok(removed);
    }

    let mut current = folder.to_string();
    while delete_if_empty(store, &current).await? {
        removed.push(current.clone());
        if behavior == EmptyFolderBehavior::DeleteEmpty {
            break;
        }
        current = path::parent(&current).to_string();
    }
    Ok(removed)
}

/// Removes every empty folder below `root` that `include` accepts, deepest
/// first, so that folders holding only empty folders go too. `root` itself is
/// removed when it ends up empty, unless it is the vault root.
pub async fn delete_empty_folders(
    store: &dyn FileStore,
    root: &str,
    include: &(dyn Fn(&str) -> bool + Sync),
) -> Result<Vec<String>> {
    let mut folders = Vec::new();
    let mut pending = vec![root.to_string()];
    while let Some(folder) = pending.pop() {
        let listing = store.list(&folder).await?;
        pending.extend(listing.folders.iter().cloned());
        folders.extend(listing.folders);
    }
    folders.sort_by_key(|folder| Reverse(folder.matches('/').count()));
    folders.push(root.to_string());

    let mut removed = Vec::new();
    for folder in folders.into_iter().filter(|folder| include(folder)) {
        if delete_if_empty(store, &folder).await? {
            removed.push(folder);
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryStore;

    async fn store_with_empty_chain() -> MemoryStore {
        let store = MemoryStore::with_files([("a/keep.md", "")]);
        store.create_folder("a/b/c").await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_cleanup_behaviors() {
        let store = store_with_empty_chain().await;
        assert!(cleanup(&store, "a/b/c", EmptyFolderBehavior::Keep)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            cleanup(&store, "a/b/c", EmptyFolderBehavior::DeleteEmpty)
                .await
                .unwrap(),
            vec!["a/b/c"]
        );

        let store = store_with_empty_chain().await;
        assert_eq!(
            cleanup(&store, "a/b/c", EmptyFolderBehavior::DeleteWithEmptyParents)
                .await
                .unwrap(),
            vec!["a/b/c", "a/b"]
        );
        assert_eq!(store.folders(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_cleanup_ignores_missing_and_non_empty() {
        let store = store_with_empty_chain().await;
        assert!(cleanup(&store, "a", EmptyFolderBehavior::DeleteEmpty)
            .await
            .unwrap()
            .is_empty());
        assert!(cleanup(&store, "gone", EmptyFolderBehavior::DeleteEmpty)
            .await
            .unwrap()
            .is_empty());
        assert!(cleanup(&store, "a/keep.md", EmptyFolderBehavior::DeleteEmpty)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_empty_folders() {
        let store = store_with_empty_chain().await;
        store.create_folder("x/y").await.unwrap();
        let removed = delete_empty_folders(&store, "", &|_| true).await.unwrap();
        assert_eq!(removed, vec!["a/b/c", "x/y", "a/b", "x"]);
        assert_eq!(store.folders(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_delete_empty_folders_respects_filter() {
        let store = store_with_empty_chain().await;
        store.create_folder("x/y").await.unwrap();
        let removed = delete_empty_folders(&store, "", &|folder| !folder.starts_with('x'))
            .await
            .unwrap();
        assert_eq!(removed, vec!["a/b/c", "a/b"]);
        assert_eq!(store.folders(), vec!["a", "x", "x/y"]);
    }
}
