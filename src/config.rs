use std::path::Path;
use std::time::Duration;

use anyhow::anyhow;
use config::{Config, File};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::wait::ConsistencyWait;

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    /// Paths to process; empty means the whole vault. Entries are path
    /// prefixes or `/regex/`.
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    /// Attachment folder template, see [`TemplatePolicy`](crate::host::TemplatePolicy)
    pub attachment_folder: String,
    pub collect_attachment_used_by_multiple_notes_mode: MultiReferenceMode,
    pub empty_folder_behavior: EmptyFolderBehavior,
    pub consistency_report_file: String,
    pub auto_collect_attachments: bool,
    pub delete_attachments_with_note: bool,
    pub delete_existing_files_when_moving: bool,
    pub move_attachments_with_note: bool,
    /// While set, the dangerous toggles above are forced off on load.
    pub show_backup_warning: bool,
    pub update_filename_aliases: bool,
    pub cache_timeout_ms: u64,
    pub patch_timeout_ms: u64,
    pub retry_delay_ms: u64,
}

/// What to do with an attachment that more than one note references.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub enum MultiReferenceMode {
    Cancel,
    Copy,
    Move,
    Prompt,
    Skip,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub enum EmptyFolderBehavior {
    Keep,
    DeleteEmpty,
    DeleteWithEmptyParents,
}

impl Settings {
    pub fn new(root_dir: &Path) -> anyhow::Result<Settings> {
        let expanded = shellexpand::tilde("~/.config/linkkeeper/settings");
        let settings = Config::builder()
            .add_source(File::with_name(&expanded).required(false))
            .add_source(
                File::with_name(&format!(
                    "{}/.linkkeeper",
                    root_dir
                        .to_str()
                        .ok_or(anyhow!("Can't convert root_dir to str"))?
                ))
                .required(false),
            )
            .set_default("include_paths", Vec::<String>::new())?
            .set_default("exclude_paths", Vec::<String>::new())?
            .set_default("attachment_folder", "./${noteName}")?
            .set_default("collect_attachment_used_by_multiple_notes_mode", "Skip")?
            .set_default("empty_folder_behavior", "DeleteWithEmptyParents")?
            .set_default("consistency_report_file", "consistency-report.md")?
            .set_default("auto_collect_attachments", false)?
            .set_default("delete_attachments_with_note", false)?
            .set_default("delete_existing_files_when_moving", false)?
            .set_default("move_attachments_with_note", false)?
            .set_default("show_backup_warning", true)?
            .set_default("update_filename_aliases", true)?
            .set_default("cache_timeout_ms", 10_000)?
            .set_default("patch_timeout_ms", 60_000)?
            .set_default("retry_delay_ms", 50)?
            .build()
            .map_err(|err| anyhow!("Build err: {err}"))?;

        let mut settings = settings.try_deserialize::<Settings>()?;
        settings.revert_dangerous_settings();

        anyhow::Ok(settings)
    }

    /// Turns every dangerous toggle off unless the user dismissed the backup
    /// warning.
    pub fn revert_dangerous_settings(&mut self) {
        if !self.show_backup_warning {
            return;
        }
        if self.auto_collect_attachments
            || self.delete_attachments_with_note
            || self.delete_existing_files_when_moving
            || self.move_attachments_with_note
        {
            warn!("Dangerous settings are disabled until show_backup_warning is turned off");
        }
        self.auto_collect_attachments = false;
        self.delete_attachments_with_note = false;
        self.delete_existing_files_when_moving = false;
        self.move_attachments_with_note = false;
    }

    pub fn path_filter(&self) -> PathFilter {
        PathFilter::new(&self.include_paths, &self.exclude_paths)
    }

    /// Bounds for waiting on the metadata cache.
    pub fn cache_wait(&self) -> ConsistencyWait {
        ConsistencyWait::new(
            Duration::from_millis(self.cache_timeout_ms),
            Duration::from_millis(self.retry_delay_ms),
        )
    }

    /// Bounds for the patcher's read-verify-write retries.
    pub fn patch_wait(&self) -> ConsistencyWait {
        ConsistencyWait::new(
            Duration::from_millis(self.patch_timeout_ms),
            Duration::from_millis(self.retry_delay_ms),
        )
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            include_paths: vec![],
            exclude_paths: vec![],
            attachment_folder: "./${noteName}".to_string(),
            collect_attachment_used_by_multiple_notes_mode: MultiReferenceMode::Skip,
            empty_folder_behavior: EmptyFolderBehavior::DeleteWithEmptyParents,
            consistency_report_file: "consistency-report.md".to_string(),
            auto_collect_attachments: false,
            delete_attachments_with_note: false,
            delete_existing_files_when_moving: false,
            move_attachments_with_note: false,
            show_backup_warning: true,
            update_filename_aliases: true,
            cache_timeout_ms: 10_000,
            patch_timeout_ms: 60_000,
            retry_delay_ms: 50,
        }
    }
}

static REGEX_PATTERN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/(?<pattern>.+)/$").expect("Pattern regex not constructing"));

#[derive(Debug, Clone)]
enum PathPattern {
    Prefix(String),
    Regex(Regex),
}

impl PathPattern {
    fn parse(entry: &str) -> Option<PathPattern> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }
        if let Some(pattern) = REGEX_PATTERN_RE
            .captures(entry)
            .and_then(|capture| capture.name("pattern"))
        {
            return match Regex::new(pattern.as_str()) {
                Ok(regex) => Some(PathPattern::Regex(regex)),
                Err(err) => {
                    warn!("Ignoring invalid path pattern {entry}: {err}");
                    None
                }
            };
        }
        Some(PathPattern::Prefix(entry.trim_start_matches('/').to_string()))
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathPattern::Regex(regex) => regex.is_match(path),
        }
    }
}

/// Include/exclude filter over vault paths.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    include: Vec<PathPattern>,
    exclude: Vec<PathPattern>,
}

impl PathFilter {
    pub fn new(include: &[String], exclude: &[String]) -> PathFilter {
        PathFilter {
            include: include.iter().flat_map(|entry| PathPattern::parse(entry)).collect(),
            exclude: exclude.iter().flat_map(|entry| PathPattern::parse(entry)).collect(),
        }
    }

    pub fn is_included(&self, path: &str) -> bool {
        (self.include.is_empty() || self.include.iter().any(|pattern| pattern.matches(path)))
            && !self.exclude.iter().any(|pattern| pattern.matches(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_path_filter() {
        let filter = PathFilter::new(
            &["Notes/".to_string()],
            &["/\\.excalidraw\\.md$/".to_string(), "Notes/private".to_string()],
        );
        assert!(filter.is_included("Notes/A.md"));
        assert!(!filter.is_included("Other/A.md"));
        assert!(!filter.is_included("Notes/drawing.excalidraw.md"));
        assert!(!filter.is_included("Notes/private/B.md"));

        assert!(PathFilter::default().is_included("anything.md"));
    }

    #[test]
    fn test_invalid_regex_is_ignored() {
        let filter = PathFilter::new(&[], &["/([/".to_string()]);
        assert!(filter.is_included("Notes/A.md"));
    }

    #[test]
    fn test_backup_warning_reverts_dangerous_settings() {
        let mut settings = Settings {
            move_attachments_with_note: true,
            delete_attachments_with_note: true,
            ..Settings::default()
        };
        settings.revert_dangerous_settings();
        assert!(!settings.move_attachments_with_note);
        assert!(!settings.delete_attachments_with_note);

        let mut acknowledged = Settings {
            show_backup_warning: false,
            move_attachments_with_note: true,
            ..Settings::default()
        };
        acknowledged.revert_dangerous_settings();
        assert!(acknowledged.move_attachments_with_note);
    }

    #[test]
    fn test_load_from_vault_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(".linkkeeper.toml"),
            "show_backup_warning = false\n\
             move_attachments_with_note = true\n\
             collect_attachment_used_by_multiple_notes_mode = \"Copy\"\n\
             empty_folder_behavior = \"Keep\"\n",
        )
        .unwrap();

        let settings = Settings::new(temp_dir.path()).unwrap();
        assert!(settings.move_attachments_with_note);
        assert_eq!(
            settings.collect_attachment_used_by_multiple_notes_mode,
            MultiReferenceMode::Copy
        );
        assert_eq!(settings.empty_folder_behavior, EmptyFolderBehavior::Keep);
        assert_eq!(settings.attachment_folder, "./${noteName}");
        assert_eq!(settings.cache_wait().timeout, Duration::from_secs(10));
    }
}
