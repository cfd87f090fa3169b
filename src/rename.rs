//! Reacting to renames and deletes reported by the host.
//!
//! By the time [`handle_rename`] runs, the host has already moved the file.
//! References are therefore resolved against a snapshot of the vault as it was
//! before the rename (current files, with every move of the session undone),
//! then re-rendered against the vault as it is now.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::{debug, error, info, warn};

use crate::attachments;
use crate::canvas;
use crate::config::EmptyFolderBehavior;
use crate::error::Result;
use crate::folders;
use crate::host::{ensure_parent_folder, CachedMetadata, MetadataCache};
use crate::patch::{self, TextEdit};
use crate::path;
use crate::reference::Reference;
use crate::rewrite::{self, PathStyle, RewriteContext, Retarget};
use crate::scanner::{self, Resolve, SnapshotResolver};
use crate::syntax;
use crate::vault::Vault;

/// Old path to new path, one entry per file moved by one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMap {
    entries: BTreeMap<String, String>,
}

impl PathMap {
    pub fn new() -> PathMap {
        PathMap::default()
    }

    /// Records a move. A path moves at most once: returns `false` and keeps
    /// the first entry when `old_path` is already mapped.
    pub fn insert(&mut self, old_path: &str, new_path: &str) -> bool {
        if self.entries.contains_key(old_path) {
            return false;
        }
        self.entries
            .insert(old_path.to_string(), new_path.to_string());
        true
    }

    pub fn get(&self, old_path: &str) -> Option<&str> {
        self.entries.get(old_path).map(String::as_str)
    }

    pub fn old_path_of(&self, new_path: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, new)| new.as_str() == new_path)
            .map(|(old, _)| old.as_str())
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The file set as it was before the moves: new paths out, old paths in.
    pub fn undo(&self, current: impl IntoIterator<Item = String>) -> BTreeSet<String> {
        let moved_to: BTreeSet<&String> = self.entries.values().collect();
        current
            .into_iter()
            .filter(|file| !moved_to.contains(file))
            .chain(self.entries.keys().cloned())
            .collect()
    }
}

/// Paths whose rename is being handled. Claims are released on drop.
pub(crate) struct InFlight<'a> {
    paths: &'a Mutex<BTreeSet<String>>,
    claimed: Vec<String>,
}

impl<'a> InFlight<'a> {
    pub(crate) fn new(paths: &'a Mutex<BTreeSet<String>>) -> InFlight<'a> {
        InFlight {
            paths,
            claimed: Vec::new(),
        }
    }

    /// `false` when another operation already handles `path`.
    pub(crate) fn claim(&mut self, path: &str) -> bool {
        let mut paths = self.paths.lock().unwrap_or_else(|e| e.into_inner());
        if !paths.insert(path.to_string()) {
            return false;
        }
        self.claimed.push(path.to_string());
        true
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut paths = self.paths.lock().unwrap_or_else(|e| e.into_inner());
        for path in &self.claimed {
            paths.remove(path);
        }
    }
}

/// Keeps the host's own link updater off while alive.
pub(crate) struct AutoLinkPause<'a> {
    cache: &'a dyn MetadataCache,
    previous: bool,
}

impl<'a> AutoLinkPause<'a> {
    pub(crate) fn new(cache: &'a dyn MetadataCache) -> AutoLinkPause<'a> {
        let previous = cache.auto_update_links();
        cache.set_auto_update_links(false);
        AutoLinkPause { cache, previous }
    }
}

impl Drop for AutoLinkPause<'_> {
    fn drop(&mut self) {
        self.cache.set_auto_update_links(self.previous);
    }
}

/// One rename-event's worth of moves, and the reference updates they require.
pub struct RenameSession<'a> {
    vault: &'a Vault,
    map: PathMap,
}

impl<'a> RenameSession<'a> {
    pub fn new(vault: &'a Vault, map: PathMap) -> RenameSession<'a> {
        RenameSession { vault, map }
    }

    pub fn map(&self) -> &PathMap {
        &self.map
    }

    pub fn into_map(self) -> PathMap {
        self.map
    }

    /// Resolver for the vault as it was before the session's moves.
    pub async fn before_resolver(&self) -> Result<SnapshotResolver> {
        let current = self.vault.host().store.all_files().await?;
        Ok(SnapshotResolver::new(self.map.undo(current)))
    }

    fn rewrite_context(&self) -> RewriteContext {
        RewriteContext {
            drop_redundant_alias: self.vault.settings().update_filename_aliases,
            ..RewriteContext::default()
        }
    }

    /// Edits that re-point the references of `note` broken by the session's
    /// moves. References to files that did not move are only touched when the
    /// note itself moved and their link text is relative or stopped resolving.
    pub async fn note_edits(
        &self,
        before: &SnapshotResolver,
        note: &str,
        references: &[Reference],
    ) -> Result<Vec<TextEdit>> {
        let after = self.vault.resolver();
        let context = self.rewrite_context();
        let old_note = self.map.old_path_of(note).unwrap_or(note);

        let mut edits = Vec::new();
        for reference in references.iter().filter(|reference| reference.is_patchable()) {
            let target = reference.link_target();
            let Some(old_target) = before.resolve_link(&target.link_path, old_note).await? else {
                continue;
            };
            let new_target = self.map.get(&old_target).unwrap_or(&old_target);
            if new_target == old_target {
                if note == old_note {
                    continue;
                }
                // Only relative link text depends on where the note lives.
                let style = rewrite::infer_style(reference, old_note, &old_target);
                let still = after.resolve_link(&target.link_path, note).await?;
                if style != PathStyle::Relative && still.as_deref() == Some(old_target.as_str()) {
                    continue;
                }
            }

            let retarget = Retarget {
                old_source: old_note,
                source: note,
                old_target: &old_target,
                new_target,
            };
            if let Some(edit) =
                rewrite::rewrite_reference(&after, reference, &retarget, &context).await?
            {
                debug!("{note}: {} -> {}", edit.old_content, edit.new_content);
                edits.push(edit);
            }
        }
        Ok(edits)
    }

    async fn text_edits(&self, before: &SnapshotResolver, note: &str, text: &str) -> Result<Vec<TextEdit>> {
        let references = syntax::parse_references(text)
            .iter()
            .map(Reference::from_parsed)
            .collect::<Vec<_>>();
        self.note_edits(before, note, &references).await
    }

    /// Rewrites the references of one note (Markdown or canvas). Returns the
    /// number of references changed.
    pub async fn update_note(&self, before: &SnapshotResolver, note: &str) -> Result<usize> {
        let host = self.vault.host();
        let cache_wait = self.vault.cache_wait();
        let changed = AtomicUsize::new(0);
        let changed_ref = &changed;

        let written = if path::is_canvas(note) {
            let moved = self.map.entries();
            patch::apply_edits(
                host.store.as_ref(),
                note,
                &self.vault.patch_wait(),
                move |text| async move {
                    changed_ref.store(0, Ordering::SeqCst);
                    let new_text = canvas::rewrite(note, &text, moved, move |node_text| async move {
                        let mut edits = self.text_edits(before, note, &node_text).await?;
                        changed_ref.fetch_add(edits.len(), Ordering::SeqCst);
                        Ok(patch::splice(note, &node_text, &mut edits)?.unwrap_or(node_text))
                    })
                    .await?;
                    Ok(new_text
                        .map(|new_text| patch::whole_text_edit(&text, &new_text))
                        .unwrap_or_default())
                },
            )
            .await?
        } else {
            patch::apply_edits(
                host.store.as_ref(),
                note,
                &self.vault.patch_wait(),
                move |_text| {
                    let cache_wait = cache_wait;
                    async move {
                        let references = scanner::scan(host, note, &cache_wait).await?;
                        let edits = self.note_edits(before, note, &references).await?;
                        changed_ref.store(edits.len(), Ordering::SeqCst);
                        Ok(edits)
                    }
                },
            )
            .await?
        };

        if !written {
            return Ok(0);
        }
        Ok(changed.load(Ordering::SeqCst).max(1))
    }

    /// Moves `from` to `to` (or the next free name next to it) and records
    /// the move.
    async fn move_file(&mut self, in_flight: &mut InFlight<'_>, from: &str, to: &str) -> Result<()> {
        let settings = self.vault.settings();
        let store = self.vault.host().store.as_ref();
        let to =
            attachments::prepare_destination(store, to, settings.delete_existing_files_when_moving)
                .await?;
        ensure_parent_folder(store, &to).await?;
        store.rename(from, &to).await?;
        in_flight.claim(from);
        self.map.insert(from, &to);
        info!("Moved {from} to {to}");
        Ok(())
    }

    /// Moves the attachments of a renamed note along with it.
    async fn move_attachments(
        &mut self,
        in_flight: &mut InFlight<'_>,
        old_note: &str,
        new_note: &str,
    ) -> Result<Vec<String>> {
        let host = self.vault.host();
        let policy = host.attachments.as_ref();
        if !policy.depends_on_note_path() {
            return Ok(vec![]);
        }
        let (Some(old_folder), Some(new_folder)) = (
            policy.attachment_folder(old_note),
            policy.attachment_folder(new_note),
        ) else {
            return Ok(vec![]);
        };
        if old_folder == new_folder {
            return Ok(vec![]);
        }

        let mut moves = Vec::new();
        if policy.is_dedicated_folder() && !old_folder.is_empty() {
            for file in host.store.all_files().await? {
                if file == new_note || !path::is_within(&file, &old_folder) {
                    continue;
                }
                let target = path::join(&new_folder, &file[old_folder.len() + 1..]);
                moves.push((file, target));
            }
        } else {
            let before = self.before_resolver().await?;
            let mut candidates = BTreeSet::new();
            for reference in scanner::scan(host, new_note, &self.vault.cache_wait()).await? {
                let target = reference.link_target();
                if let Some(file) = before.resolve_link(&target.link_path, old_note).await? {
                    if !path::is_note(&file) && self.vault.is_included(&file) {
                        candidates.insert(file);
                    }
                }
            }
            let backlinks = scanner::backlinks(
                host,
                &self.vault.resolver(),
                &candidates,
                &self.vault.cache_wait(),
            )
            .await?;
            for file in candidates {
                let shared = backlinks
                    .get(&file)
                    .is_some_and(|notes| notes.iter().any(|note| note != new_note));
                if shared {
                    debug!("Leaving {file} in place, other notes use it");
                    continue;
                }
                match policy.attachment_file_path(&file, new_note) {
                    Some(target) if target != file => moves.push((file, target)),
                    Some(_) => {}
                    None => warn!("No attachment path for {file} of {new_note}"),
                }
            }
        }

        for (from, to) in moves {
            self.move_file(in_flight, &from, &to).await?;
        }

        let store = host.store.as_ref();
        let behavior = self.vault.settings().empty_folder_behavior;
        if behavior == EmptyFolderBehavior::Keep {
            return Ok(vec![]);
        }
        let mut removed = Vec::new();
        if policy.is_dedicated_folder() && store.exists(&old_folder).await? {
            removed = folders::delete_empty_folders(store, &old_folder, &|_| true).await?;
        }
        if removed.last() != Some(&old_folder) {
            removed.extend(folders::cleanup(store, &old_folder, behavior).await?);
        } else if behavior == EmptyFolderBehavior::DeleteWithEmptyParents {
            removed.extend(folders::cleanup(store, path::parent(&old_folder), behavior).await?);
        }
        Ok(removed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameOutcome {
    /// The event was a re-entrant rename of a path already being handled.
    pub ignored: bool,
    pub renames: PathMap,
    pub updated_notes: Vec<String>,
    pub links_changed: usize,
    pub removed_folders: Vec<String>,
}

impl RenameOutcome {
    fn ignored() -> RenameOutcome {
        RenameOutcome {
            ignored: true,
            ..RenameOutcome::default()
        }
    }
}

/// Handles the host having renamed `old_path` to `new_path`: moves the
/// note's attachments when configured, re-points every reference broken by
/// the moves, and cleans up folders left empty.
pub async fn handle_rename(vault: &Vault, old_path: &str, new_path: &str) -> Result<RenameOutcome> {
    let mut in_flight = InFlight::new(vault.in_flight());
    if !in_flight.claim(old_path) {
        debug!("Ignoring rename of {old_path}, it is already being handled");
        return Ok(RenameOutcome::ignored());
    }
    let host = vault.host();
    let _pause = AutoLinkPause::new(host.cache.as_ref());

    let mut map = PathMap::new();
    map.insert(old_path, new_path);
    let mut session = RenameSession::new(vault, map);

    let mut removed_folders = Vec::new();
    let mut failure = None;
    if path::is_markdown(new_path) && vault.settings().move_attachments_with_note {
        match session.move_attachments(&mut in_flight, old_path, new_path).await {
            Ok(removed) => removed_folders.extend(removed),
            Err(err) => {
                error!(
                    "Moving attachments of {new_path} stopped after {} file(s): {err}",
                    session.map().len().saturating_sub(1)
                );
                failure = Some(err);
            }
        }
    }

    let before = session.before_resolver().await?;
    let mut updated_notes = Vec::new();
    let mut links_changed = 0;
    for note in scanner::list_notes(host.store.as_ref()).await? {
        if note != new_path && !vault.is_included(&note) {
            continue;
        }
        match session.update_note(&before, &note).await {
            Ok(0) => {}
            Ok(changed) => {
                updated_notes.push(note);
                links_changed += changed;
            }
            Err(err) => error!("Failed to update links in {note}: {err}"),
        }
    }

    let old_folder = path::parent(old_path);
    if old_folder != path::parent(new_path) {
        removed_folders.extend(
            folders::cleanup(
                host.store.as_ref(),
                old_folder,
                vault.settings().empty_folder_behavior,
            )
            .await?,
        );
    }

    info!(
        "Renamed {old_path} to {new_path}: {} file(s) moved, {links_changed} link(s) in {} note(s) updated",
        session.map().len(),
        updated_notes.len()
    );
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(RenameOutcome {
        ignored: false,
        renames: session.into_map(),
        updated_notes,
        links_changed,
        removed_folders,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted_attachments: Vec<String>,
    pub removed_folders: Vec<String>,
}

/// Handles the host having deleted `deleted_path`. `previous_cache` is the
/// note's metadata from before the delete.
pub async fn handle_delete(
    vault: &Vault,
    deleted_path: &str,
    previous_cache: Option<&CachedMetadata>,
) -> Result<DeleteOutcome> {
    let mut outcome = DeleteOutcome::default();
    if !path::is_note(deleted_path) {
        return Ok(outcome);
    }
    let host = vault.host();
    let settings = vault.settings();

    if let Some(previous) = previous_cache.filter(|_| settings.delete_attachments_with_note) {
        let resolver = vault.resolver();
        let mut candidates = BTreeSet::new();
        for reference in scanner::references_from_cache(previous) {
            let resolved = scanner::resolve(&resolver, &reference, deleted_path).await?;
            if let Some(file) = resolved.file {
                if !path::is_note(&file) && vault.is_included(&file) {
                    candidates.insert(file);
                }
            }
        }
        let backlinks =
            scanner::backlinks(host, &resolver, &candidates, &vault.cache_wait()).await?;
        for file in candidates {
            if let Some(notes) = backlinks.get(&file) {
                debug!("Keeping {file}, still used by {notes:?}");
                continue;
            }
            match host.store.trash(&file).await {
                Ok(()) => {
                    info!("Deleted {file} with {deleted_path}");
                    outcome.deleted_attachments.push(file);
                }
                Err(err) => warn!("Could not delete {file}: {err}"),
            }
        }
    }

    let policy = host.attachments.as_ref();
    if let Some(folder) = policy
        .attachment_folder(deleted_path)
        .filter(|folder| policy.depends_on_note_path() && !folder.is_empty())
    {
        outcome.removed_folders =
            folders::cleanup(host.store.as_ref(), &folder, settings.empty_folder_behavior).await?;
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::error::Error;
    use crate::host::{FileStat, FileStore, Listing, MemoryStore};
    use crate::test_utils::{vault_with_files, vault_with_settings, vault_with_store};

    #[test]
    fn test_path_map() {
        let mut map = PathMap::new();
        assert!(map.insert("A.md", "B.md"));
        assert!(!map.insert("A.md", "C.md"));
        assert!(map.insert("A/img.png", "B/img.png"));
        assert_eq!(map.get("A.md"), Some("B.md"));
        assert_eq!(map.old_path_of("B/img.png"), Some("A/img.png"));
        assert_eq!(map.len(), 2);

        let before = map.undo(["B.md".to_string(), "B/img.png".to_string(), "C.md".to_string()]);
        assert_eq!(
            before.into_iter().collect::<Vec<_>>(),
            vec!["A.md", "A/img.png", "C.md"]
        );
    }

    #[test]
    fn test_in_flight_claims_are_released() {
        let paths = Mutex::new(BTreeSet::new());
        {
            let mut first = InFlight::new(&paths);
            assert!(first.claim("A.md"));
            let mut second = InFlight::new(&paths);
            assert!(!second.claim("A.md"));
            assert!(second.claim("B.md"));
        }
        assert!(paths.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_auto_link_pause_restores() {
        let (vault, _store) = vault_with_files(&[]);
        let cache = vault.host().cache.as_ref();
        cache.set_auto_update_links(true);
        {
            let _pause = AutoLinkPause::new(cache);
            assert!(!cache.auto_update_links());
        }
        assert!(cache.auto_update_links());
    }

    #[tokio::test]
    async fn test_rename_updates_backlinks() {
        let (vault, store) = vault_with_files(&[
            ("Notes/B.md", "# B"),
            ("Other/C.md", "See [[A]] and [a](../Notes/A.md#Part) and [[Unrelated]]"),
            ("Unrelated.md", ""),
        ]);
        store.insert("Notes/Renamed.md", "# A\n\n## Part");

        let outcome = vault.handle_rename("Notes/A.md", "Notes/Renamed.md").await.unwrap();
        assert!(!outcome.ignored);
        assert_eq!(outcome.updated_notes, vec!["Other/C.md"]);
        assert_eq!(outcome.links_changed, 2);
        assert_eq!(
            store.content("Other/C.md").as_deref(),
            Some("See [[Renamed]] and [a](../Notes/Renamed.md#Part) and [[Unrelated]]")
        );
    }

    #[tokio::test]
    async fn test_moved_note_fixes_its_own_relative_links() {
        let (vault, store) = vault_with_files(&[
            ("Notes/img.png", "png"),
            ("Notes/B.md", ""),
            ("Archive/placeholder.md", ""),
        ]);
        store.insert("Archive/A.md", "![](img.png) [[B]] [b](B.md)");

        let outcome = vault.handle_rename("Notes/A.md", "Archive/A.md").await.unwrap();
        assert_eq!(outcome.updated_notes, vec!["Archive/A.md"]);
        assert_eq!(
            store.content("Archive/A.md").as_deref(),
            Some("![](../Notes/img.png) [[B]] [b](../Notes/B.md)")
        );
    }

    #[tokio::test]
    async fn test_rename_moves_dedicated_attachment_folder() {
        let settings = Settings {
            show_backup_warning: false,
            move_attachments_with_note: true,
            ..Settings::default()
        };
        let (vault, store) = vault_with_settings(
            &[
                ("A/img.png", "png"),
                ("A/sub/doc.pdf", "pdf"),
                ("C.md", "[[A]] ![](A/img.png)"),
            ],
            settings,
        );
        store.insert("B.md", "![[img.png]] ![](A/sub/doc.pdf)");

        let outcome = vault.handle_rename("A.md", "B.md").await.unwrap();
        assert_eq!(outcome.renames.get("A.md"), Some("B.md"));
        assert_eq!(outcome.renames.get("A/img.png"), Some("B/img.png"));
        assert_eq!(outcome.renames.get("A/sub/doc.pdf"), Some("B/sub/doc.pdf"));
        assert_eq!(outcome.removed_folders, vec!["A/sub", "A"]);
        assert_eq!(
            store.content("B.md").as_deref(),
            Some("![[img.png]] ![](B/sub/doc.pdf)")
        );
        assert_eq!(store.content("C.md").as_deref(), Some("[[B]] ![](B/img.png)"));
        assert!(!store.exists("A").await.unwrap());
    }

    /// Memory store whose `rename` fails from the `fail_at`-th call on.
    struct FailingRenames {
        inner: Arc<MemoryStore>,
        calls: AtomicUsize,
        fail_at: usize,
    }

    #[async_trait]
    impl FileStore for FailingRenames {
        async fn read(&self, path: &str) -> Result<String> {
            self.inner.read(path).await
        }

        async fn write(&self, path: &str, expected: &str, text: &str) -> Result<()> {
            self.inner.write(path, expected, text).await
        }

        async fn create(&self, path: &str, text: &str) -> Result<()> {
            self.inner.create(path, text).await
        }

        async fn rename(&self, from: &str, to: &str) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.fail_at {
                return Err(Error::Store(format!("cannot move {from}")));
            }
            self.inner.rename(from, to).await
        }

        async fn copy(&self, from: &str, to: &str) -> Result<()> {
            self.inner.copy(from, to).await
        }

        async fn delete(&self, path: &str) -> Result<()> {
            self.inner.delete(path).await
        }

        async fn create_folder(&self, path: &str) -> Result<()> {
            self.inner.create_folder(path).await
        }

        async fn list(&self, dir: &str) -> Result<Listing> {
            self.inner.list(dir).await
        }

        async fn exists(&self, path: &str) -> Result<bool> {
            self.inner.exists(path).await
        }

        async fn stat(&self, path: &str) -> Result<Option<FileStat>> {
            self.inner.stat(path).await
        }
    }

    #[tokio::test]
    async fn test_partial_attachment_move_still_updates_links() {
        let inner = Arc::new(MemoryStore::with_files([
            ("A/img.png", "png"),
            ("A/x.pdf", "pdf"),
            ("B.md", ""),
            ("C.md", "[[A]] ![](A/img.png) ![](A/x.pdf)"),
        ]));
        let store = Arc::new(FailingRenames {
            inner: inner.clone(),
            calls: AtomicUsize::new(0),
            fail_at: 2,
        });
        let settings = Settings {
            show_backup_warning: false,
            move_attachments_with_note: true,
            ..Settings::default()
        };
        let vault = vault_with_store(store, settings);

        let result = vault.handle_rename("A.md", "B.md").await;
        assert!(matches!(result, Err(Error::Store(_))));
        assert_eq!(inner.content("B/img.png").as_deref(), Some("png"));
        assert_eq!(inner.content("A/x.pdf").as_deref(), Some("pdf"));
        assert_eq!(
            inner.content("C.md").as_deref(),
            Some("[[B]] ![](B/img.png) ![](A/x.pdf)")
        );
        assert!(vault.in_flight().lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scattered_attachments_follow_unless_shared() {
        let settings = Settings {
            attachment_folder: "./".to_string(),
            show_backup_warning: false,
            move_attachments_with_note: true,
            ..Settings::default()
        };
        let (vault, store) = vault_with_settings(
            &[
                ("Notes/own.png", "png"),
                ("Notes/shared.png", "png"),
                ("Notes/Other.md", "![](shared.png)"),
                ("Archive/.keep.md", ""),
            ],
            settings,
        );
        store.insert("Archive/A.md", "![](own.png) ![](shared.png)");

        let outcome = vault.handle_rename("Notes/A.md", "Archive/A.md").await.unwrap();
        assert_eq!(outcome.renames.get("Notes/own.png"), Some("Archive/own.png"));
        assert_eq!(outcome.renames.get("Notes/shared.png"), None);
        assert_eq!(
            store.content("Archive/A.md").as_deref(),
            Some("![](own.png) ![](../Notes/shared.png)")
        );
    }

    #[tokio::test]
    async fn test_reentrant_rename_is_ignored() {
        let (vault, _store) = vault_with_files(&[("B.md", "")]);
        let mut busy = InFlight::new(vault.in_flight());
        assert!(busy.claim("A.md"));

        let outcome = vault.handle_rename("A.md", "B.md").await.unwrap();
        assert!(outcome.ignored);
        drop(busy);
        assert!(!vault.handle_rename("A.md", "B.md").await.unwrap().ignored);
    }

    #[tokio::test]
    async fn test_rename_restores_auto_update_links() {
        let (vault, _store) = vault_with_files(&[("B.md", "")]);
        vault.host().cache.set_auto_update_links(true);
        vault.handle_rename("A.md", "B.md").await.unwrap();
        assert!(vault.host().cache.auto_update_links());
    }

    #[tokio::test]
    async fn test_canvas_backlinks_are_rewritten() {
        let (vault, store) = vault_with_files(&[(
            "board.canvas",
            r#"{"nodes":[{"id":"1","type":"file","file":"Notes/A.md"},{"id":"2","type":"text","text":"see [[A]]"}]}"#,
        )]);
        store.insert("Notes/B.md", "");

        let outcome = vault.handle_rename("Notes/A.md", "Notes/B.md").await.unwrap();
        assert_eq!(outcome.updated_notes, vec!["board.canvas"]);
        let canvas: serde_json::Value =
            serde_json::from_str(&store.content("board.canvas").unwrap()).unwrap();
        assert_eq!(canvas["nodes"][0]["file"], "Notes/B.md");
        assert_eq!(canvas["nodes"][1]["text"], "see [[B]]");
    }

    #[tokio::test]
    async fn test_delete_with_note() {
        let settings = Settings {
            show_backup_warning: false,
            delete_attachments_with_note: true,
            ..Settings::default()
        };
        let (vault, store) = vault_with_settings(
            &[
                ("A/img.png", "png"),
                ("shared.png", "png"),
                ("Other.md", "![[shared.png]]"),
            ],
            settings,
        );
        let previous = CachedMetadata::from_text("![[A/img.png]] ![[shared.png]]", 1);

        let outcome = vault.handle_delete("A.md", Some(&previous)).await.unwrap();
        assert_eq!(outcome.deleted_attachments, vec!["A/img.png"]);
        assert_eq!(outcome.removed_folders, vec!["A"]);
        assert!(store.exists("shared.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_keeps_attachments_by_default() {
        let (vault, store) = vault_with_files(&[("A/img.png", "png")]);
        let previous = CachedMetadata::from_text("![[A/img.png]]", 1);
        let outcome = vault.handle_delete("A.md", Some(&previous)).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::default());
        assert!(store.exists("A/img.png").await.unwrap());
    }
}
