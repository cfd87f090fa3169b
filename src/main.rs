//! linkkeeper CLI
//!
//! Runs the engine's commands against a vault on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{stdin, stdout, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use linkkeeper::commands::{self, CommandOutput, Selection};
use linkkeeper::config::{MultiReferenceMode, Settings};
use linkkeeper::host::{
    ensure_parent_folder, FileStore, Host, LocalStore, ModeChoice, NonInteractive, ParsingCache,
    TemplatePolicy, UserPrompt,
};
use linkkeeper::vault::Vault;

#[derive(Parser)]
#[command(name = "linkkeeper")]
#[command(author, version, about = "Keeps links and attachments in a Markdown vault consistent", long_about = None)]
struct Cli {
    /// Root directory of the vault
    vault: PathBuf,

    /// Never ask: confirmations are accepted and shared attachments skipped
    #[arg(short = 'y', long)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the consistency report
    Check,
    /// Move attachments next to the notes that use them
    Collect {
        /// Note or folder, relative to the vault root; the whole vault if omitted
        path: Option<String>,
    },
    /// Rewrite references in one style
    Convert {
        kind: ConvertKind,
        /// Note or folder, relative to the vault root; the whole vault if omitted
        path: Option<String>,
    },
    /// Run every normalization pass over the vault
    Reorganize,
    /// Rename a file and update everything that points at it
    Rename { old: String, new: String },
    /// Delete empty folders
    DeleteEmptyFolders,
}

#[derive(Clone, Copy, ValueEnum)]
enum ConvertKind {
    Wikilinks,
    WikiEmbeds,
    RelativeEmbeds,
    RelativeLinks,
}

impl ConvertKind {
    fn command_id(self) -> &'static str {
        match self {
            ConvertKind::Wikilinks => "replace-wikilinks-with-markdown",
            ConvertKind::WikiEmbeds => "replace-wiki-embeds-with-markdown",
            ConvertKind::RelativeEmbeds => "convert-embeds-to-relative",
            ConvertKind::RelativeLinks => "convert-links-to-relative",
        }
    }
}

/// Answers for `--yes`.
struct AssumeYes;

#[async_trait]
impl UserPrompt for AssumeYes {
    async fn confirm(&self, _message: &str) -> bool {
        true
    }

    async fn select_mode(
        &self,
        attachment_path: &str,
        backlinks: &[String],
        is_forced: bool,
    ) -> ModeChoice {
        NonInteractive
            .select_mode(attachment_path, backlinks, is_forced)
            .await
    }
}

/// Asks on the terminal.
struct TerminalPrompt {
    lines: Mutex<tokio::io::Lines<BufReader<tokio::io::Stdin>>>,
}

impl TerminalPrompt {
    fn new() -> TerminalPrompt {
        TerminalPrompt {
            lines: Mutex::new(BufReader::new(stdin()).lines()),
        }
    }

    async fn ask(&self, question: &str) -> String {
        let mut out = stdout();
        let _ = out.write_all(question.as_bytes()).await;
        let _ = out.flush().await;
        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(Some(line)) => line.trim().to_lowercase(),
            _ => String::new(),
        }
    }
}

#[async_trait]
impl UserPrompt for TerminalPrompt {
    async fn confirm(&self, message: &str) -> bool {
        matches!(self.ask(&format!("{message} [y/N] ")).await.as_str(), "y" | "yes")
    }

    async fn select_mode(
        &self,
        attachment_path: &str,
        backlinks: &[String],
        is_forced: bool,
    ) -> ModeChoice {
        let mut question = format!("{attachment_path} is also used by:\n");
        for backlink in backlinks {
            question.push_str(&format!("  {backlink}\n"));
        }
        if is_forced {
            question.push_str("(the whole batch is being collected)\n");
        }
        question.push_str("[s]kip, [c]opy, [m]ove or [a]bort? Add ! to apply to all: ");

        let answer = self.ask(&question).await;
        let sticky = answer.ends_with('!');
        let mode = match answer.trim_end_matches('!') {
            "c" | "copy" => MultiReferenceMode::Copy,
            "m" | "move" => MultiReferenceMode::Move,
            "a" | "abort" => MultiReferenceMode::Cancel,
            _ => MultiReferenceMode::Skip,
        };
        ModeChoice { mode, sticky }
    }
}

fn build_vault(root: &Path, assume_yes: bool) -> anyhow::Result<Vault> {
    let settings = Settings::new(root)?;
    let store: Arc<dyn FileStore> = Arc::new(LocalStore::new(root));
    let prompt: Arc<dyn UserPrompt> = if assume_yes {
        Arc::new(AssumeYes)
    } else {
        Arc::new(TerminalPrompt::new())
    };
    let host = Host::new(
        store.clone(),
        Arc::new(ParsingCache::new(store)),
        Arc::new(TemplatePolicy::new(settings.attachment_folder.clone())),
        prompt,
    );
    Ok(Vault::new(host, settings))
}

async fn selection(vault: &Vault, path: Option<String>) -> anyhow::Result<Selection> {
    let Some(path) = path else {
        return Ok(Selection::Vault);
    };
    let path = linkkeeper::path::normalize(&path);
    let store = vault.host().store.as_ref();
    if !store.exists(&path).await? {
        return Err(anyhow!("{path} does not exist in the vault"));
    }
    let siblings = store.list(linkkeeper::path::parent(&path)).await?;
    if siblings.folders.contains(&path) {
        Ok(Selection::Folder(path))
    } else {
        Ok(Selection::Note(path))
    }
}

async fn run_command(
    vault: &Vault,
    id: &str,
    selection: Selection,
    cancel: &CancellationToken,
) -> anyhow::Result<CommandOutput> {
    let command = commands::find(id).ok_or(anyhow!("Unknown command {id}"))?;
    if !(command.applies_to)(&selection) {
        return Err(anyhow!("{} does not apply to {selection:?}", command.name));
    }
    info!("Running {}", command.name);
    Ok((command.run)(vault, &selection, cancel).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("linkkeeper=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli
        .vault
        .canonicalize()
        .with_context(|| format!("Vault {} not found", cli.vault.display()))?;
    let vault = build_vault(&root, cli.yes)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current note");
            on_interrupt.cancel();
        }
    });

    let output = match cli.command {
        Command::Check => {
            let output = run_command(&vault, "check-consistency", Selection::Vault, &cancel).await?;
            println!("Report written to {}", vault.settings().consistency_report_file);
            output
        }
        Command::Collect { path } => {
            let selection = selection(&vault, path).await?;
            run_command(&vault, "collect-attachments", selection, &cancel).await?
        }
        Command::Convert { kind, path } => {
            let selection = selection(&vault, path).await?;
            run_command(&vault, kind.command_id(), selection, &cancel).await?
        }
        Command::Reorganize => {
            run_command(&vault, "reorganize-vault", Selection::Vault, &cancel).await?
        }
        Command::DeleteEmptyFolders => {
            run_command(&vault, "delete-empty-folders", Selection::Vault, &cancel).await?
        }
        Command::Rename { old, new } => {
            let old = linkkeeper::path::normalize(&old);
            let new = linkkeeper::path::normalize(&new);
            let store = vault.host().store.as_ref();
            ensure_parent_folder(store, &new).await?;
            store.rename(&old, &new).await?;
            let outcome = vault.handle_rename(&old, &new).await?;
            println!(
                "Renamed {old} to {new}: updated {} link(s) in {} note(s), moved {} attachment(s)",
                outcome.links_changed,
                outcome.updated_notes.len(),
                outcome.renames.len().saturating_sub(1)
            );
            return Ok(());
        }
    };

    println!("{output}");
    Ok(())
}
