//! User-invocable commands as a flat table.
//!
//! Each [`CommandSpec`] says which selections it applies to and how it runs on
//! one. Expanding a selection into notes is a pure function over the vault's
//! file list.

use std::fmt;

use futures::future::BoxFuture;
use futures::FutureExt;
use itertools::Itertools;
use tokio_util::sync::CancellationToken;

use crate::checker::ConsistencyReport;
use crate::error::Result;
use crate::path;
use crate::rewrite::Conversion;
use crate::vault::{BatchSummary, Vault};

/// What the user invoked a command on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Note(String),
    Folder(String),
    Notes(Vec<String>),
    Vault,
}

impl Selection {
    /// The notes of `files` the selection covers, sorted and unique.
    pub fn expand(&self, files: &[String]) -> Vec<String> {
        let notes = files.iter().filter(|file| path::is_note(file));
        match self {
            Selection::Note(note) => notes.filter(|file| *file == note).cloned().collect(),
            Selection::Folder(folder) => notes
                .filter(|file| path::is_within(file, folder))
                .sorted()
                .cloned()
                .collect(),
            Selection::Notes(selected) => notes
                .filter(|file| selected.contains(file))
                .sorted()
                .dedup()
                .cloned()
                .collect(),
            Selection::Vault => notes.sorted().dedup().cloned().collect(),
        }
    }

    fn is_single_note(&self) -> bool {
        matches!(self, Selection::Note(note) if path::is_note(note))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    Summary(BatchSummary),
    Report(ConsistencyReport),
    RemovedFolders(Vec<String>),
}

impl fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutput::Summary(summary) => write!(f, "{summary}"),
            CommandOutput::Report(report) if report.total() == 0 => {
                write!(f, "No problems found")
            }
            CommandOutput::Report(report) => write!(f, "Found {} problem(s)", report.total()),
            CommandOutput::RemovedFolders(folders) if folders.is_empty() => {
                write!(f, "No empty folders")
            }
            CommandOutput::RemovedFolders(folders) => {
                write!(f, "Removed {} empty folder(s)", folders.len())
            }
        }
    }
}

pub type RunFn = for<'a> fn(
    &'a Vault,
    &'a Selection,
    &'a CancellationToken,
) -> BoxFuture<'a, Result<CommandOutput>>;

pub struct CommandSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub applies_to: fn(&Selection) -> bool,
    pub run: RunFn,
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec").field("id", &self.id).finish()
    }
}

fn any_selection(_: &Selection) -> bool {
    true
}

fn vault_only(selection: &Selection) -> bool {
    *selection == Selection::Vault
}

fn folder_or_vault(selection: &Selection) -> bool {
    matches!(selection, Selection::Folder(_) | Selection::Vault)
}

async fn selected_notes(vault: &Vault, selection: &Selection) -> Result<Vec<String>> {
    let notes = vault.notes().await?;
    Ok(selection.expand(&notes))
}

fn collect<'a>(
    vault: &'a Vault,
    selection: &'a Selection,
    cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<CommandOutput>> {
    async move {
        let notes = selected_notes(vault, selection).await?;
        Ok(CommandOutput::Summary(vault.collect_attachments(&notes, cancel).await))
    }
    .boxed()
}

fn convert_with<'a>(
    conversion: Conversion,
    vault: &'a Vault,
    selection: &'a Selection,
    cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<CommandOutput>> {
    async move {
        let notes = selected_notes(vault, selection).await?;
        Ok(CommandOutput::Summary(vault.convert(conversion, &notes, cancel).await))
    }
    .boxed()
}

fn wikilinks_to_markdown<'a>(
    vault: &'a Vault,
    selection: &'a Selection,
    cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<CommandOutput>> {
    convert_with(Conversion::WikilinksToMarkdown, vault, selection, cancel)
}

fn wiki_embeds_to_markdown<'a>(
    vault: &'a Vault,
    selection: &'a Selection,
    cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<CommandOutput>> {
    convert_with(Conversion::WikiEmbedsToMarkdown, vault, selection, cancel)
}

fn embeds_to_relative<'a>(
    vault: &'a Vault,
    selection: &'a Selection,
    cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<CommandOutput>> {
    convert_with(Conversion::EmbedsToRelative, vault, selection, cancel)
}

fn links_to_relative<'a>(
    vault: &'a Vault,
    selection: &'a Selection,
    cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<CommandOutput>> {
    convert_with(Conversion::LinksToRelative, vault, selection, cancel)
}

const REORGANIZE_QUESTION: &str =
    "Reorganize the whole vault? Every note may be rewritten and attachments moved.";

/// Asks first: a declined confirmation reports a cancelled, empty batch.
fn reorganize<'a>(
    vault: &'a Vault,
    _selection: &'a Selection,
    cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<CommandOutput>> {
    async move {
        if !vault.host().prompt.confirm(REORGANIZE_QUESTION).await {
            return Ok(CommandOutput::Summary(BatchSummary {
                cancelled: true,
                ..BatchSummary::default()
            }));
        }
        vault.reorganize(cancel).await.map(CommandOutput::Summary)
    }
    .boxed()
}

fn delete_empty_folders<'a>(
    vault: &'a Vault,
    selection: &'a Selection,
    _cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<CommandOutput>> {
    async move {
        let root = match selection {
            Selection::Folder(folder) => folder.as_str(),
            _ => "",
        };
        let removed = vault.delete_empty_folders(root).await?;
        Ok(CommandOutput::RemovedFolders(removed))
    }
    .boxed()
}

fn check_consistency<'a>(
    vault: &'a Vault,
    _selection: &'a Selection,
    _cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<CommandOutput>> {
    async move { vault.check_consistency().await.map(CommandOutput::Report) }.boxed()
}

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        id: "collect-attachments",
        name: "Collect attachments",
        applies_to: any_selection,
        run: collect,
    },
    CommandSpec {
        id: "replace-wikilinks-with-markdown",
        name: "Replace wikilinks with Markdown links",
        applies_to: any_selection,
        run: wikilinks_to_markdown,
    },
    CommandSpec {
        id: "replace-wiki-embeds-with-markdown",
        name: "Replace wiki embeds with Markdown embeds",
        applies_to: any_selection,
        run: wiki_embeds_to_markdown,
    },
    CommandSpec {
        id: "convert-embeds-to-relative",
        name: "Convert embed paths to relative",
        applies_to: any_selection,
        run: embeds_to_relative,
    },
    CommandSpec {
        id: "convert-links-to-relative",
        name: "Convert link paths to relative",
        applies_to: any_selection,
        run: links_to_relative,
    },
    CommandSpec {
        id: "reorganize-vault",
        name: "Reorganize vault",
        applies_to: vault_only,
        run: reorganize,
    },
    CommandSpec {
        id: "delete-empty-folders",
        name: "Delete empty folders",
        applies_to: folder_or_vault,
        run: delete_empty_folders,
    },
    CommandSpec {
        id: "check-consistency",
        name: "Check consistency",
        applies_to: vault_only,
        run: check_consistency,
    },
];

pub fn find(id: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|command| command.id == id)
}

/// Commands offered for `selection`. A single non-note file gets none.
pub fn applicable(selection: &Selection) -> Vec<&'static CommandSpec> {
    if matches!(selection, Selection::Note(_)) && !selection.is_single_note() {
        return vec![];
    }
    COMMANDS
        .iter()
        .filter(|command| (command.applies_to)(selection))
        .collect()
}
