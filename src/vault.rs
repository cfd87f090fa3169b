//! The engine entry point: host events and vault-wide batch operations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::attachments::{self, CollectContext, CollectOutcome};
use crate::canvas;
use crate::checker::{self, ConsistencyReport};
use crate::config::{PathFilter, Settings};
use crate::error::{Error, Result};
use crate::folders;
use crate::host::{ensure_parent_folder, CachedMetadata, Host};
use crate::patch;
use crate::path;
use crate::reference::Reference;
use crate::rename::{self, DeleteOutcome, RenameOutcome};
use crate::rewrite::{self, Conversion};
use crate::scanner::{self, CacheResolver};
use crate::syntax;
use crate::wait::ConsistencyWait;

/// Counts reported at the end of a batch operation. Merged summaries count
/// per pass, so a note changed by two passes counts twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub notes_processed: usize,
    pub notes_changed: usize,
    pub notes_failed: usize,
    pub links_changed: usize,
    pub attachments_moved: usize,
    /// The batch stopped early, on request or because a shared attachment was
    /// answered with `Cancel`.
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn is_unchanged(&self) -> bool {
        self.notes_changed == 0 && self.attachments_moved == 0
    }

    pub fn merge(&mut self, other: BatchSummary) {
        self.notes_processed += other.notes_processed;
        self.notes_changed += other.notes_changed;
        self.notes_failed += other.notes_failed;
        self.links_changed += other.links_changed;
        self.attachments_moved += other.attachments_moved;
        self.cancelled |= other.cancelled;
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cancelled {
            write!(f, "Cancelled after {} note(s). ", self.notes_processed)?;
        }
        if self.is_unchanged() {
            write!(f, "No changes were needed")?;
        } else {
            write!(
                f,
                "Updated {} link(s) in {} note(s), moved {} attachment(s)",
                self.links_changed, self.notes_changed, self.attachments_moved
            )?;
        }
        if self.notes_failed > 0 {
            write!(f, " ({} note(s) failed, see log)", self.notes_failed)?;
        }
        Ok(())
    }
}

pub struct Vault {
    host: Host,
    settings: Settings,
    filter: PathFilter,
    in_flight: Mutex<BTreeSet<String>>,
}

impl Vault {
    pub fn new(host: Host, settings: Settings) -> Vault {
        let filter = settings.path_filter();
        Vault {
            host,
            settings,
            filter,
            in_flight: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_included(&self, path: &str) -> bool {
        self.filter.is_included(path)
    }

    /// Resolver for the vault as it is now.
    pub fn resolver(&self) -> CacheResolver<'_> {
        CacheResolver::new(self.host.cache.as_ref())
    }

    pub fn cache_wait(&self) -> ConsistencyWait {
        self.settings.cache_wait()
    }

    pub fn patch_wait(&self) -> ConsistencyWait {
        self.settings.patch_wait()
    }

    pub(crate) fn in_flight(&self) -> &Mutex<BTreeSet<String>> {
        &self.in_flight
    }

    fn is_in_flight(&self, path: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(path)
    }

    /// Included notes, sorted. The consistency report is not a note of its
    /// own.
    pub async fn notes(&self) -> Result<Vec<String>> {
        Ok(scanner::list_notes(self.host.store.as_ref())
            .await?
            .into_iter()
            .filter(|note| self.is_included(note) && *note != self.settings.consistency_report_file)
            .collect())
    }

    pub async fn handle_rename(&self, old_path: &str, new_path: &str) -> Result<RenameOutcome> {
        rename::handle_rename(self, old_path, new_path).await
    }

    pub async fn handle_delete(
        &self,
        path: &str,
        previous_cache: Option<&CachedMetadata>,
    ) -> Result<DeleteOutcome> {
        rename::handle_delete(self, path, previous_cache).await
    }

    /// Collects the attachments of a note the host reports as changed, when
    /// auto-collect is on. Notes taking part in a rename are left alone.
    pub async fn handle_metadata_changed(&self, note: &str) -> Result<Option<CollectOutcome>> {
        if !self.settings.auto_collect_attachments || !path::is_note(note) || self.is_in_flight(note) {
            return Ok(None);
        }
        let mut ctx = CollectContext::new(false);
        attachments::collect_attachments(self, note, &mut ctx)
            .await
            .map(Some)
    }

    /// Collects attachments for each of `notes` in order, sharing one prompt
    /// state across the batch.
    pub async fn collect_attachments(
        &self,
        notes: &[String],
        cancel: &CancellationToken,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let mut ctx = CollectContext::new(true);
        ctx.cancel = cancel.clone();
        for note in notes {
            if cancel.is_cancelled() || ctx.aborted {
                summary.cancelled = true;
                break;
            }
            summary.notes_processed += 1;
            match attachments::collect_attachments(self, note, &mut ctx).await {
                Ok(outcome) => {
                    summary.attachments_moved += outcome.files_moved();
                    summary.links_changed += outcome.links_changed;
                    if outcome.links_changed > 0 {
                        summary.notes_changed += 1;
                    }
                }
                Err(Error::Cancelled) => {
                    summary.cancelled = true;
                    break;
                }
                Err(err) => {
                    summary.notes_failed += 1;
                    error!("Failed to collect attachments of {note}: {err}");
                }
            }
        }
        summary.cancelled |= ctx.aborted;
        info!("Collect attachments: {summary}");
        summary
    }

    /// Applies `conversion` to one note. Returns the number of references
    /// rewritten.
    pub async fn convert_note(&self, note: &str, conversion: Conversion) -> Result<usize> {
        let host = &self.host;
        let resolver = self.resolver();
        let resolver = &resolver;
        let cache_wait = self.cache_wait();
        let changed = AtomicUsize::new(0);
        let changed_ref = &changed;

        let written = if path::is_canvas(note) {
            let unmoved = BTreeMap::new();
            let unmoved = &unmoved;
            patch::apply_edits(host.store.as_ref(), note, &self.patch_wait(), move |text| async move {
                changed_ref.store(0, Ordering::SeqCst);
                let new_text = canvas::rewrite(note, &text, unmoved, move |node_text| async move {
                    let references = syntax::parse_references(&node_text)
                        .iter()
                        .map(Reference::from_parsed)
                        .collect::<Vec<_>>();
                    let mut edits =
                        rewrite::conversion_edits(resolver, note, &references, conversion, true)
                            .await?;
                    changed_ref.fetch_add(edits.len(), Ordering::SeqCst);
                    Ok(patch::splice(note, &node_text, &mut edits)?.unwrap_or(node_text))
                })
                .await?;
                Ok(new_text
                    .map(|new_text| patch::whole_text_edit(&text, &new_text))
                    .unwrap_or_default())
            })
            .await?
        } else {
            patch::apply_edits(host.store.as_ref(), note, &self.patch_wait(), move |_text| async move {
                let references = scanner::scan(host, note, &cache_wait).await?;
                let edits =
                    rewrite::conversion_edits(resolver, note, &references, conversion, true).await?;
                changed_ref.store(edits.len(), Ordering::SeqCst);
                Ok(edits)
            })
            .await?
        };

        if !written {
            return Ok(0);
        }
        Ok(changed.load(Ordering::SeqCst).max(1))
    }

    pub async fn convert(
        &self,
        conversion: Conversion,
        notes: &[String],
        cancel: &CancellationToken,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for note in notes {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            summary.notes_processed += 1;
            match self.convert_note(note, conversion).await {
                Ok(0) => {}
                Ok(changed) => {
                    summary.notes_changed += 1;
                    summary.links_changed += changed;
                }
                Err(err) => {
                    summary.notes_failed += 1;
                    error!("Failed to convert links in {note}: {err}");
                }
            }
        }
        info!("{conversion:?}: {summary}");
        summary
    }

    /// Removes empty folders below `root` (`""` for the whole vault) outside
    /// the excluded paths.
    pub async fn delete_empty_folders(&self, root: &str) -> Result<Vec<String>> {
        let include = |folder: &str| self.is_included(folder);
        folders::delete_empty_folders(self.host.store.as_ref(), root, &include).await
    }

    /// Every normalization pass, in order: wikilinks and wiki embeds to
    /// Markdown, embed then link paths to relative, attachment collection,
    /// empty-folder removal.
    pub async fn reorganize(&self, cancel: &CancellationToken) -> Result<BatchSummary> {
        const CONVERSIONS: [Conversion; 4] = [
            Conversion::WikilinksToMarkdown,
            Conversion::WikiEmbedsToMarkdown,
            Conversion::EmbedsToRelative,
            Conversion::LinksToRelative,
        ];

        let mut summary = BatchSummary::default();
        for conversion in CONVERSIONS {
            let notes = self.notes().await?;
            summary.merge(self.convert(conversion, &notes, cancel).await);
            if summary.cancelled {
                return Ok(summary);
            }
        }

        let notes = self.notes().await?;
        summary.merge(self.collect_attachments(&notes, cancel).await);
        if summary.cancelled {
            return Ok(summary);
        }

        let removed = self.delete_empty_folders("").await?;
        info!("Reorganized vault: {summary}, removed {} empty folder(s)", removed.len());
        Ok(summary)
    }

    /// Checks every included note and writes the report to the configured
    /// report file.
    pub async fn check_consistency(&self) -> Result<ConsistencyReport> {
        let notes = self.notes().await?;
        let resolver = self.resolver();
        let report = checker::check(
            &self.host,
            &resolver,
            &notes,
            &self.settings.consistency_report_file,
            &self.cache_wait(),
        )
        .await;
        self.write_report(&report.render()).await?;
        Ok(report)
    }

    async fn write_report(&self, text: &str) -> Result<()> {
        let store = self.host.store.as_ref();
        let report_file = &self.settings.consistency_report_file;
        if !store.exists(report_file).await? {
            ensure_parent_folder(store, report_file).await?;
            return store.create(report_file, text).await;
        }
        let old = store.read(report_file).await?;
        if old != text {
            store.write(report_file, &old, text).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::host::FileStore;
    use crate::test_utils::{unlocked, vault_with_files, vault_with_settings};

    #[tokio::test]
    async fn test_convert_wiki_embeds() {
        let (vault, store) = vault_with_files(&[
            ("Notes/A.md", "Before ![[img.png]] after [[B]]\n"),
            ("Notes/B.md", ""),
            ("Notes/img.png", "png"),
        ]);
        let notes = vault.notes().await.unwrap();
        let summary = vault
            .convert(Conversion::WikiEmbedsToMarkdown, &notes, &CancellationToken::new())
            .await;
        assert_eq!(summary.notes_changed, 1);
        assert_eq!(summary.links_changed, 1);
        assert_eq!(
            store.content("Notes/A.md").as_deref(),
            Some("Before ![](img.png) after [[B]]\n")
        );

        let again = vault
            .convert(Conversion::WikiEmbedsToMarkdown, &notes, &CancellationToken::new())
            .await;
        assert!(again.is_unchanged());
        assert_eq!(again.to_string(), "No changes were needed");
    }

    #[tokio::test]
    async fn test_convert_canvas_text_nodes() {
        let (vault, store) = vault_with_files(&[
            (
                "board.canvas",
                r#"{"nodes":[{"id":"1","type":"text","text":"see [[B]]"}]}"#,
            ),
            ("B.md", ""),
        ]);
        let changed = vault
            .convert_note("board.canvas", Conversion::WikilinksToMarkdown)
            .await
            .unwrap();
        assert_eq!(changed, 1);
        let canvas: serde_json::Value =
            serde_json::from_str(&store.content("board.canvas").unwrap()).unwrap();
        assert_eq!(canvas["nodes"][0]["text"], "see [](B.md)");
    }

    #[tokio::test]
    async fn test_batch_stops_when_cancelled() {
        let (vault, store) = vault_with_files(&[("A.md", "[[B]]"), ("B.md", "")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let notes = vault.notes().await.unwrap();
        let summary = vault
            .convert(Conversion::WikilinksToMarkdown, &notes, &cancel)
            .await;
        assert!(summary.cancelled);
        assert_eq!(summary.notes_processed, 0);
        assert_eq!(store.content("A.md").as_deref(), Some("[[B]]"));
        assert!(summary.to_string().starts_with("Cancelled after 0 note(s)."));
    }

    #[tokio::test]
    async fn test_batch_continues_past_failures() {
        let (vault, store) = vault_with_files(&[("A.md", "[[C]]"), ("C.md", "")]);
        let notes = vec!["Gone.md".to_string(), "A.md".to_string()];
        let summary = vault
            .convert(Conversion::WikilinksToMarkdown, &notes, &CancellationToken::new())
            .await;
        assert_eq!(summary.notes_processed, 2);
        assert_eq!(summary.notes_failed, 1);
        assert_eq!(store.content("A.md").as_deref(), Some("[](C.md)"));
    }

    #[tokio::test]
    async fn test_reorganize() {
        let settings = Settings {
            include_paths: vec![],
            exclude_paths: vec!["Templates/".into()],
            ..Settings::default()
        };
        let (vault, store) = vault_with_settings(
            &[
                ("Notes/A.md", "[[Other/B|Bee]] ![[pic.png]]"),
                ("Other/B.md", "[[A]]"),
                ("pic.png", "png"),
                ("Templates/T.md", "[[A]]"),
            ],
            settings,
        );
        store.create_folder("Empty/Nested").await.unwrap();
        store.create_folder("Templates/Empty").await.unwrap();

        let summary = vault.reorganize(&CancellationToken::new()).await.unwrap();
        assert!(!summary.cancelled);
        assert_eq!(summary.attachments_moved, 1);
        assert_eq!(
            store.content("Notes/A.md").as_deref(),
            Some("[Bee](../Other/B.md) ![](A/pic.png)")
        );
        assert_eq!(store.content("Other/B.md").as_deref(), Some("[](../Notes/A.md)"));
        assert_eq!(store.content("Templates/T.md").as_deref(), Some("[[A]]"));
        assert!(!store.exists("Empty").await.unwrap());
        assert!(store.exists("Templates/Empty").await.unwrap());
    }

    #[tokio::test]
    async fn test_check_consistency_writes_report() {
        let (vault, store) = vault_with_files(&[("A.md", "[x](missing.md)")]);
        let report = vault.check_consistency().await.unwrap();
        assert_eq!(report.total(), 1);
        let written = store.content("consistency-report.md").unwrap();
        assert!(written.contains("## [[A.md]]\n\n- (line 1): `[x](missing.md)`"));

        store.insert("A.md", "fixed");
        let report = vault.check_consistency().await.unwrap();
        assert_eq!(report.total(), 0);
        assert!(!store
            .content("consistency-report.md")
            .unwrap()
            .contains("missing.md"));
    }

    #[tokio::test]
    async fn test_auto_collect_on_metadata_change() {
        let files = [("A.md", "![](img.png)"), ("img.png", "png")];
        let (vault, store) = vault_with_files(&files);
        assert_eq!(vault.handle_metadata_changed("A.md").await.unwrap(), None);
        assert!(store.exists("img.png").await.unwrap());

        let settings = unlocked(Settings {
            auto_collect_attachments: true,
            ..Settings::default()
        });
        let (vault, store) = vault_with_settings(&files, settings);
        let outcome = vault.handle_metadata_changed("A.md").await.unwrap().unwrap();
        assert_eq!(outcome.files_moved(), 1);
        assert_eq!(store.content("A.md").as_deref(), Some("![](A/img.png)"));
    }

    #[test]
    fn test_summary_display() {
        let summary = BatchSummary {
            notes_processed: 3,
            notes_changed: 2,
            links_changed: 5,
            attachments_moved: 1,
            notes_failed: 1,
            cancelled: false,
        };
        assert_eq!(
            summary.to_string(),
            "Updated 5 link(s) in 2 note(s), moved 1 attachment(s) (1 note(s) failed, see log)"
        );
    }
}
