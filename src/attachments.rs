//! Collecting the attachments of a note into its attachment folder.

use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MultiReferenceMode;
use crate::error::{Error, Result};
use crate::folders;
use crate::host::{ensure_parent_folder, FileStore, UserPrompt};
use crate::path;
use crate::rename::{PathMap, RenameSession};
use crate::scanner;
use crate::vault::Vault;

/// How shared attachments are handled for the rest of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeDecision {
    #[default]
    Undecided,
    /// Chosen for the current attachment only.
    Decided(MultiReferenceMode),
    /// Chosen for every remaining attachment of the batch.
    Sticky(MultiReferenceMode),
}

/// State threaded through one collect run, possibly spanning many notes.
#[derive(Debug, Clone, Default)]
pub struct CollectContext {
    pub decision: ModeDecision,
    /// Set when a shared attachment was answered with `Cancel`; the batch
    /// stops at the next note.
    pub aborted: bool,
    /// The user asked for this collect explicitly rather than it running on
    /// its own.
    pub is_forced: bool,
    /// Checked before each attachment.
    pub cancel: CancellationToken,
}

impl CollectContext {
    pub fn new(is_forced: bool) -> CollectContext {
        CollectContext {
            is_forced,
            ..CollectContext::default()
        }
    }

    /// Mode for an attachment that `backlinks` other notes use as well.
    pub async fn decide(
        &mut self,
        default: MultiReferenceMode,
        prompt: &dyn UserPrompt,
        attachment: &str,
        backlinks: &[String],
    ) -> MultiReferenceMode {
        if let ModeDecision::Sticky(mode) = self.decision {
            return mode;
        }
        if default != MultiReferenceMode::Prompt {
            self.decision = ModeDecision::Decided(default);
            return default;
        }

        let choice = prompt
            .select_mode(attachment, backlinks, self.is_forced)
            .await;
        let mode = match choice.mode {
            MultiReferenceMode::Prompt => MultiReferenceMode::Skip,
            mode => mode,
        };
        self.decision = if choice.sticky {
            ModeDecision::Sticky(mode)
        } else {
            ModeDecision::Decided(mode)
        };
        mode
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentMoveResult {
    pub old_attachment_path: String,
    /// `None` when the attachment already sits where it belongs.
    pub new_attachment_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectOutcome {
    pub moves: Vec<AttachmentMoveResult>,
    pub links_changed: usize,
    /// Notes still pointing at an attachment that was moved away from them.
    pub stale_backlinks: BTreeSet<String>,
}

impl CollectOutcome {
    pub fn files_moved(&self) -> usize {
        self.moves
            .iter()
            .filter(|result| result.new_attachment_path.is_some())
            .count()
    }
}

/// Frees `destination` for an incoming file: deletes the occupant when
/// `delete_existing` is set, otherwise picks the next available name.
pub async fn prepare_destination(
    store: &dyn FileStore,
    destination: &str,
    delete_existing: bool,
) -> Result<String> {
    if !store.exists(destination).await? {
        return Ok(destination.to_string());
    }
    if delete_existing {
        info!("Replacing existing {destination}");
        store.delete(destination).await?;
        return Ok(destination.to_string());
    }
    store.get_available_path(destination).await
}

/// Attachment files `note` references, first reference first, each once.
async fn referenced_attachments(vault: &Vault, note: &str) -> Result<Vec<String>> {
    let resolver = vault.resolver();
    let mut seen = BTreeSet::new();
    let mut attachments = Vec::new();
    for reference in scanner::scan(vault.host(), note, &vault.cache_wait()).await? {
        let resolved = scanner::resolve(&resolver, &reference, note).await?;
        let Some(file) = resolved.file else {
            debug!("{note}: {} does not resolve", reference.raw_original);
            continue;
        };
        if path::is_note(&file) || !seen.insert(file.clone()) {
            continue;
        }
        if !vault.is_included(&file) {
            debug!("{file} is excluded");
            continue;
        }
        attachments.push(file);
    }
    Ok(attachments)
}

/// Moves (or copies) every attachment of `note` into the note's attachment
/// folder and re-points the note's references.
///
/// An attachment other notes use too is handled per the configured
/// [`MultiReferenceMode`]; `Cancel` sets `ctx.aborted` and stops. When the
/// store rejects a move or `ctx.cancel` fires, the references to the files
/// already moved are still updated before the error is returned.
pub async fn collect_attachments(
    vault: &Vault,
    note: &str,
    ctx: &mut CollectContext,
) -> Result<CollectOutcome> {
    let mut outcome = CollectOutcome::default();
    if !path::is_note(note) || !vault.is_included(note) {
        return Ok(outcome);
    }
    let host = vault.host();
    let store = host.store.as_ref();
    let settings = vault.settings();

    let attachments = referenced_attachments(vault, note).await?;
    let candidates = attachments.iter().cloned().collect::<BTreeSet<_>>();
    let backlinks = scanner::backlinks(host, &vault.resolver(), &candidates, &vault.cache_wait()).await?;

    let mut map = PathMap::new();
    let mut vacated = BTreeSet::new();
    let mut failure = None;
    for attachment in attachments {
        if ctx.cancel.is_cancelled() {
            info!("Collecting attachments of {note} interrupted before {attachment}");
            failure = Some(Error::Cancelled);
            break;
        }
        let Some(destination) = host.attachments.attachment_file_path(&attachment, note) else {
            warn!("No attachment folder for {note}, skipping {attachment}");
            continue;
        };
        if destination == attachment {
            outcome.moves.push(AttachmentMoveResult {
                old_attachment_path: attachment,
                new_attachment_path: None,
            });
            continue;
        }

        let others = backlinks
            .get(&attachment)
            .map(|notes| {
                notes
                    .iter()
                    .filter(|other| other.as_str() != note)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let mode = if others.is_empty() {
            MultiReferenceMode::Move
        } else {
            ctx.decide(
                settings.collect_attachment_used_by_multiple_notes_mode,
                host.prompt.as_ref(),
                &attachment,
                &others,
            )
            .await
        };

        let result = match mode {
            MultiReferenceMode::Cancel => {
                info!("Collecting attachments of {note} cancelled at {attachment}");
                ctx.aborted = true;
                break;
            }
            MultiReferenceMode::Skip | MultiReferenceMode::Prompt => {
                debug!("Skipping {attachment}, also used by {others:?}");
                continue;
            }
            MultiReferenceMode::Copy => {
                transfer(store, &attachment, &destination, settings.delete_existing_files_when_moving, true)
                    .await
            }
            MultiReferenceMode::Move => {
                transfer(store, &attachment, &destination, settings.delete_existing_files_when_moving, false)
                    .await
            }
        };
        match result {
            Ok(new_path) => {
                if mode == MultiReferenceMode::Move {
                    vacated.insert(path::parent(&attachment).to_string());
                    if !others.is_empty() {
                        warn!("{attachment} moved to {new_path}, {others:?} still link the old path");
                        outcome.stale_backlinks.extend(others);
                    }
                }
                map.insert(&attachment, &new_path);
                outcome.moves.push(AttachmentMoveResult {
                    old_attachment_path: attachment,
                    new_attachment_path: Some(new_path),
                });
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    if !map.is_empty() {
        let session = RenameSession::new(vault, map);
        let before = session.before_resolver().await?;
        outcome.links_changed = session.update_note(&before, note).await?;
    }
    for folder in vacated {
        folders::cleanup(store, &folder, settings.empty_folder_behavior).await?;
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(outcome),
    }
}

async fn transfer(
    store: &dyn FileStore,
    from: &str,
    to: &str,
    delete_existing: bool,
    copy: bool,
) -> Result<String> {
    let to = prepare_destination(store, to, delete_existing).await?;
    ensure_parent_folder(store, &to).await?;
    if copy {
        store.copy(from, &to).await?;
        info!("Copied {from} to {to}");
    } else {
        store.rename(from, &to).await?;
        info!("Moved {from} to {to}");
    }
    Ok(to)
}
