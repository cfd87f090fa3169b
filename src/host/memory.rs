//! A `FileStore` kept entirely in memory.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{FileStat, FileStore, Listing};
use crate::error::{Error, Result};
use crate::path;

#[derive(Debug, Clone)]
struct MemoryFile {
    content: String,
    mtime: u64,
}

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<String, MemoryFile>,
    folders: BTreeSet<String>,
    clock: u64,
}

impl State {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn add_folder(&mut self, folder: &str) {
        let mut current = folder;
        while !current.is_empty() {
            self.folders.insert(current.to_string());
            current = path::parent(current);
        }
    }

    fn put(&mut self, file_path: &str, content: String) {
        let mtime = self.tick();
        self.add_folder(path::parent(file_path));
        self.files
            .insert(file_path.to_string(), MemoryFile { content, mtime });
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.folders.contains(path)
    }

    fn folder_is_empty(&self, folder: &str) -> bool {
        !self
            .files
            .keys()
            .chain(self.folders.iter())
            .any(|entry| entry != folder && path::is_within(entry, folder))
    }
}

/// In-memory vault. Every mutation advances a logical clock that serves as the
/// file modification time.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn with_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> MemoryStore {
        let store = MemoryStore::new();
        for (path, content) in files {
            store.insert(path, content);
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes a file unconditionally, as an external editor would.
    pub fn insert(&self, path: &str, content: &str) {
        self.lock().put(path, content.to_string());
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.lock().files.get(path).map(|file| file.content.clone())
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    pub fn folders(&self) -> Vec<String> {
        self.lock().folders.iter().cloned().collect()
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn read(&self, path: &str) -> Result<String> {
        self.content(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    async fn write(&self, path: &str, expected: &str, text: &str) -> Result<()> {
        let mut state = self.lock();
        let file = state
            .files
            .get(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        if file.content != expected {
            return Err(Error::WriteConflict(path.to_string()));
        }
        state.put(path, text.to_string());
        Ok(())
    }

    async fn create(&self, path: &str, text: &str) -> Result<()> {
        let mut state = self.lock();
        if state.exists(path) {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        state.put(path, text.to_string());
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut state = self.lock();
        if state.exists(to) {
            return Err(Error::AlreadyExists(to.to_string()));
        }
        if let Some(file) = state.files.remove(from) {
            state.put(to, file.content);
            return Ok(());
        }
        if !state.folders.contains(from) {
            return Err(Error::NotFound(from.to_string()));
        }

        let moved_files: Vec<String> = state
            .files
            .keys()
            .filter(|file| path::is_within(file, from))
            .cloned()
            .collect();
        for file in moved_files {
            if let Some(entry) = state.files.remove(&file) {
                let target = format!("{to}{}", &file[from.len()..]);
                state.put(&target, entry.content);
            }
        }
        let moved_folders: Vec<String> = state
            .folders
            .iter()
            .filter(|folder| path::is_within(folder, from))
            .cloned()
            .collect();
        for folder in moved_folders {
            state.folders.remove(&folder);
            let target = format!("{to}{}", &folder[from.len()..]);
            state.add_folder(&target);
        }
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let mut state = self.lock();
        if state.exists(to) {
            return Err(Error::AlreadyExists(to.to_string()));
        }
        let content = state
            .files
            .get(from)
            .map(|file| file.content.clone())
            .ok_or_else(|| Error::NotFound(from.to_string()))?;
        state.put(to, content);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut state = self.lock();
        if state.files.remove(path).is_some() {
            return Ok(());
        }
        if !state.folders.contains(path) {
            return Err(Error::NotFound(path.to_string()));
        }
        if !state.folder_is_empty(path) {
            return Err(Error::Store(format!("Folder is not empty: {path}")));
        }
        state.folders.remove(path);
        Ok(())
    }

    async fn create_folder(&self, path: &str) -> Result<()> {
        let mut state = self.lock();
        if state.files.contains_key(path) {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        state.add_folder(path);
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Listing> {
        let state = self.lock();
        if !dir.is_empty() && !state.folders.contains(dir) {
            return Err(Error::NotFound(dir.to_string()));
        }
        Ok(Listing {
            files: state
                .files
                .keys()
                .filter(|file| path::parent(file) == dir)
                .cloned()
                .collect(),
            folders: state
                .folders
                .iter()
                .filter(|folder| path::parent(folder) == dir)
                .cloned()
                .collect(),
        })
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.lock().exists(path))
    }

    async fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        Ok(self.lock().files.get(path).map(|file| FileStat {
            mtime: file.mtime,
            size: file.content.len() as u64,
        }))
    }
}
