//! A `FileStore` over a directory on the local disk.

use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use itertools::Itertools;
use tokio::fs;
use walkdir::WalkDir;

use super::{FileStat, FileStore, Listing};
use crate::error::{Error, Result};
use crate::path;

#[derive(Debug, Clone)]
pub struct LocalStore {
    root_dir: PathBuf,
}

fn io_error(path: &str, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::NotFound(path.to_string()),
        io::ErrorKind::AlreadyExists => Error::AlreadyExists(path.to_string()),
        _ => Error::Io(err),
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

impl LocalStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> LocalStore {
        LocalStore {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn fs_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root_dir.clone()
        } else {
            self.root_dir.join(path)
        }
    }

    fn vault_path(&self, fs_path: &Path) -> Option<String> {
        let relative = fs_path.strip_prefix(&self.root_dir).ok()?;
        Some(relative.to_str()?.replace('\\', "/"))
    }

    async fn ensure_parent(&self, path: &str) -> Result<()> {
        let folder = path::parent(path);
        if !folder.is_empty() {
            fs::create_dir_all(self.fs_path(folder))
                .await
                .map_err(|err| io_error(folder, err))?;
        }
        Ok(())
    }

    async fn refuse_existing(&self, path: &str) -> Result<()> {
        if self.exists(path).await? {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FileStore for LocalStore {
    async fn read(&self, path: &str) -> Result<String> {
        fs::read_to_string(self.fs_path(path))
            .await
            .map_err(|err| io_error(path, err))
    }

    async fn write(&self, path: &str, expected: &str, text: &str) -> Result<()> {
        let current = self.read(path).await?;
        if current != expected {
            return Err(Error::WriteConflict(path.to_string()));
        }
        fs::write(self.fs_path(path), text)
            .await
            .map_err(|err| io_error(path, err))
    }

    async fn create(&self, path: &str, text: &str) -> Result<()> {
        self.refuse_existing(path).await?;
        self.ensure_parent(path).await?;
        fs::write(self.fs_path(path), text)
            .await
            .map_err(|err| io_error(path, err))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.refuse_existing(to).await?;
        self.ensure_parent(to).await?;
        fs::rename(self.fs_path(from), self.fs_path(to))
            .await
            .map_err(|err| io_error(from, err))
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.refuse_existing(to).await?;
        self.ensure_parent(to).await?;
        fs::copy(self.fs_path(from), self.fs_path(to))
            .await
            .map(|_| ())
            .map_err(|err| io_error(from, err))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let fs_path = self.fs_path(path);
        let metadata = fs::metadata(&fs_path)
            .await
            .map_err(|err| io_error(path, err))?;
        let removed = if metadata.is_dir() {
            fs::remove_dir(&fs_path).await
        } else {
            fs::remove_file(&fs_path).await
        };
        removed.map_err(|err| io_error(path, err))
    }

    async fn create_folder(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.fs_path(path))
            .await
            .map_err(|err| io_error(path, err))
    }

    async fn list(&self, dir: &str) -> Result<Listing> {
        let mut entries = fs::read_dir(self.fs_path(dir))
            .await
            .map_err(|err| io_error(dir, err))?;
        let mut listing = Listing::default();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if is_hidden(&name) {
                continue;
            }
            let child = path::join(dir, &name);
            if entry.file_type().await?.is_dir() {
                listing.folders.push(child);
            } else {
                listing.files.push(child);
            }
        }
        listing.files.sort();
        listing.folders.sort();
        Ok(listing)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(fs::try_exists(self.fs_path(path)).await?)
    }

    async fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        let metadata = match fs::metadata(self.fs_path(path)).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        Ok(Some(FileStat {
            mtime,
            size: metadata.len(),
        }))
    }

    async fn all_files(&self) -> Result<Vec<String>> {
        let files = WalkDir::new(&self.root_dir)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !e
                        .file_name()
                        .to_str()
                        .map(is_hidden)
                        .unwrap_or(false)
            })
            .flatten()
            .filter(|entry| entry.file_type().is_file())
            .flat_map(|entry| self.vault_path(entry.path()))
            .sorted()
            .collect_vec();
        Ok(files)
    }
}
