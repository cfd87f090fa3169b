//! Capabilities the embedding application provides.
//!
//! The engine never touches a disk or parses a document on its own: file
//! operations go through [`FileStore`], parsed references come from
//! [`MetadataCache`], attachment destinations from [`AttachmentPathPolicy`] and
//! decisions from [`UserPrompt`]. The bundled implementations are enough to run
//! the engine standalone (see the `linkkeeper` binary) and in tests.

mod local;
mod memory;
mod parsing_cache;
mod template;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use parsing_cache::ParsingCache;
pub use template::TemplatePolicy;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::MultiReferenceMode;
use crate::error::Result;
use crate::path;
use crate::syntax;

/// A link or embed as reported by the metadata cache, with byte offsets into
/// the note text the cache entry was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheReference {
    pub link: String,
    pub original: String,
    pub display_text: Option<String>,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CachedMetadata {
    /// Modification time of the file content this entry was parsed from.
    pub mtime: u64,
    pub links: Vec<CacheReference>,
    pub embeds: Vec<CacheReference>,
    pub headings: Vec<String>,
    pub block_ids: Vec<String>,
}

impl CachedMetadata {
    pub fn from_text(text: &str, mtime: u64) -> CachedMetadata {
        let (embeds, links): (Vec<_>, Vec<_>) = syntax::parse_references(text)
            .into_iter()
            .partition(|reference| reference.is_embed);
        let to_cache = |reference: syntax::ParsedReference| CacheReference {
            link: reference.link,
            original: reference.original,
            display_text: reference.display_text,
            start: reference.start,
            end: reference.end,
        };

        CachedMetadata {
            mtime,
            links: links.into_iter().map(to_cache).collect(),
            embeds: embeds.into_iter().map(to_cache).collect(),
            headings: syntax::parse_headings(text),
            block_ids: syntax::parse_block_ids(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub mtime: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Listing {
    pub files: Vec<String>,
    pub folders: Vec<String>,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<String>;

    /// Compare-and-swap write: fails with
    /// [`Error::WriteConflict`](crate::Error::WriteConflict) when the live
    /// content is no longer `expected`.
    async fn write(&self, path: &str, expected: &str, text: &str) -> Result<()>;

    async fn create(&self, path: &str, text: &str) -> Result<()>;

    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    async fn copy(&self, from: &str, to: &str) -> Result<()>;

    /// Deletes a file or an empty folder.
    async fn delete(&self, path: &str) -> Result<()>;

    async fn trash(&self, path: &str) -> Result<()> {
        self.delete(path).await
    }

    /// Creates the folder and any missing ancestors.
    async fn create_folder(&self, path: &str) -> Result<()>;

    /// Direct children of `dir` (`""` is the vault root).
    async fn list(&self, dir: &str) -> Result<Listing>;

    async fn exists(&self, path: &str) -> Result<bool>;

    async fn stat(&self, path: &str) -> Result<Option<FileStat>>;

    /// First of `base`, `base 1`, `base 2`, ... (suffix before the extension)
    /// that is not taken.
    async fn get_available_path(&self, base_path: &str) -> Result<String> {
        if !self.exists(base_path).await? {
            return Ok(base_path.to_string());
        }
        let folder = path::parent(base_path);
        let stem = path::stem(base_path);
        let extension = path::extension(base_path)
            .map(|extension| format!(".{extension}"))
            .unwrap_or_default();
        let mut counter = 1;
        loop {
            let candidate = path::join(folder, &format!("{stem} {counter}{extension}"));
            if !self.exists(&candidate).await? {
                return Ok(candidate);
            }
            counter += 1;
        }
    }

    /// Every file in the vault, sorted.
    async fn all_files(&self) -> Result<Vec<String>> {
        let mut pending = vec![String::new()];
        let mut files = Vec::new();
        while let Some(folder) = pending.pop() {
            let listing = self.list(&folder).await?;
            files.extend(listing.files);
            pending.extend(listing.folders);
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
pub trait MetadataCache: Send + Sync {
    /// Parsed references of a note. May lag behind the file right after a
    /// write; compare [`CachedMetadata::mtime`] with [`FileStore::stat`].
    async fn get_cache(&self, path: &str) -> Result<Option<CachedMetadata>>;

    async fn get_first_linkpath_dest(
        &self,
        link_path: &str,
        source_path: &str,
    ) -> Result<Option<String>>;

    /// Whether the host rewrites links on its own after a rename.
    fn auto_update_links(&self) -> bool {
        false
    }

    fn set_auto_update_links(&self, _enabled: bool) {}
}

/// Where a note's attachments belong. Treated as opaque by the engine.
pub trait AttachmentPathPolicy: Send + Sync {
    fn attachment_folder(&self, note_path: &str) -> Option<String>;

    fn attachment_file_path(&self, attachment_path: &str, note_path: &str) -> Option<String> {
        let folder = self.attachment_folder(note_path)?;
        Some(path::join(&folder, path::file_name(attachment_path)))
    }

    fn depends_on_note_path(&self) -> bool;

    /// The folder belongs to a single note, so everything in it moves with
    /// the note.
    fn is_dedicated_folder(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChoice {
    pub mode: MultiReferenceMode,
    pub sticky: bool,
}

#[async_trait]
pub trait UserPrompt: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;

    async fn select_mode(
        &self,
        attachment_path: &str,
        backlinks: &[String],
        is_forced: bool,
    ) -> ModeChoice;
}

/// Declines every confirmation and skips every shared attachment.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive;

#[async_trait]
impl UserPrompt for NonInteractive {
    async fn confirm(&self, _message: &str) -> bool {
        false
    }

    async fn select_mode(
        &self,
        _attachment_path: &str,
        _backlinks: &[String],
        _is_forced: bool,
    ) -> ModeChoice {
        ModeChoice {
            mode: MultiReferenceMode::Skip,
            sticky: true,
        }
    }
}

/// The capability bundle every engine operation runs against.
#[derive(Clone)]
pub struct Host {
    pub store: Arc<dyn FileStore>,
    pub cache: Arc<dyn MetadataCache>,
    pub attachments: Arc<dyn AttachmentPathPolicy>,
    pub prompt: Arc<dyn UserPrompt>,
}

impl Host {
    pub fn new(
        store: Arc<dyn FileStore>,
        cache: Arc<dyn MetadataCache>,
        attachments: Arc<dyn AttachmentPathPolicy>,
        prompt: Arc<dyn UserPrompt>,
    ) -> Host {
        Host {
            store,
            cache,
            attachments,
            prompt,
        }
    }
}

/// Creates the parent folder of `path` when it is missing.
pub async fn ensure_parent_folder(store: &dyn FileStore, path: &str) -> Result<()> {
    let folder = path::parent(path);
    if !folder.is_empty() && !store.exists(folder).await? {
        store.create_folder(folder).await?;
    }
    Ok(())
}
