//! Shared test utilities for linkkeeper.
//!
//! This module provides common helpers used across multiple test modules.
//! It is only compiled when running tests.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::config::{MultiReferenceMode, Settings};
use crate::host::{
    FileStore, Host, MemoryStore, ModeChoice, NonInteractive, ParsingCache, TemplatePolicy, UserPrompt,
};
use crate::vault::Vault;

/// Creates a temporary vault directory for testing.
///
/// The vault lives in a non-hidden `vault` subdirectory because hidden
/// entries (temp dirs like `/tmp/.tmpXXXXX` on some systems) are skipped when
/// walking the vault.
pub fn create_test_vault_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let vault_dir = temp_dir.path().join("vault");
    fs::create_dir(&vault_dir).expect("Failed to create vault subdirectory");
    (temp_dir, vault_dir)
}

fn memory_host(store: Arc<dyn FileStore>, template: &str, prompt: Arc<dyn UserPrompt>) -> Host {
    Host::new(
        store.clone(),
        Arc::new(ParsingCache::new(store)),
        Arc::new(TemplatePolicy::new(template)),
        prompt,
    )
}

/// In-memory host with attachments in `./${noteName}` and no user to ask.
pub fn host_with_files(files: &[(&str, &str)]) -> Host {
    let store = Arc::new(MemoryStore::with_files(files.iter().copied()));
    memory_host(store, "./${noteName}", Arc::new(NonInteractive))
}

pub fn vault_with_files(files: &[(&str, &str)]) -> (Vault, Arc<MemoryStore>) {
    vault_with_settings(files, Settings::default())
}

pub fn vault_with_settings(files: &[(&str, &str)], settings: Settings) -> (Vault, Arc<MemoryStore>) {
    vault_with_prompt(files, settings, Arc::new(NonInteractive))
}

/// Vault whose attachment template comes from `settings` and whose questions
/// go to `prompt`. Settings are used as given, dangerous toggles included.
pub fn vault_with_prompt(
    files: &[(&str, &str)],
    settings: Settings,
    prompt: Arc<dyn UserPrompt>,
) -> (Vault, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_files(files.iter().copied()));
    let host = memory_host(store.clone(), &settings.attachment_folder, prompt);
    (Vault::new(host, settings), store)
}

/// Vault over any store, for stores that wrap a [`MemoryStore`] to inject
/// failures.
pub fn vault_with_store(store: Arc<dyn FileStore>, settings: Settings) -> Vault {
    let host = memory_host(store, &settings.attachment_folder, Arc::new(NonInteractive));
    Vault::new(host, settings)
}

/// Answers prompts from queues and records what was asked.
#[derive(Default)]
pub struct ScriptedPrompt {
    modes: Mutex<VecDeque<ModeChoice>>,
    confirmations: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn with_modes(modes: impl IntoIterator<Item = (MultiReferenceMode, bool)>) -> ScriptedPrompt {
        ScriptedPrompt {
            modes: Mutex::new(
                modes
                    .into_iter()
                    .map(|(mode, sticky)| ModeChoice { mode, sticky })
                    .collect(),
            ),
            ..ScriptedPrompt::default()
        }
    }

    pub fn with_confirmations(answers: impl IntoIterator<Item = bool>) -> ScriptedPrompt {
        ScriptedPrompt {
            confirmations: Mutex::new(answers.into_iter().collect()),
            ..ScriptedPrompt::default()
        }
    }

    /// Attachment paths `select_mode` was called for, in order.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl UserPrompt for ScriptedPrompt {
    async fn confirm(&self, _message: &str) -> bool {
        self.confirmations.lock().unwrap().pop_front().unwrap_or(false)
    }

    async fn select_mode(
        &self,
        attachment_path: &str,
        _backlinks: &[String],
        _is_forced: bool,
    ) -> ModeChoice {
        self.asked.lock().unwrap().push(attachment_path.to_string());
        self.modes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ModeChoice {
                mode: MultiReferenceMode::Skip,
                sticky: false,
            })
    }
}

/// Unlocked settings: the backup warning is dismissed so the dangerous
/// toggles given in `settings` stay as they are.
pub fn unlocked(settings: Settings) -> Settings {
    Settings {
        show_backup_warning: false,
        ..settings
    }
}
