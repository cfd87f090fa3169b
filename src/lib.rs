//! linkkeeper: keeps a vault of Markdown notes consistent.
//!
//! This crate is the engine behind the `linkkeeper` binary. It reacts to
//! renames and deletes in a vault, rewrites the links that point at moved
//! files, keeps attachments next to the notes that use them, and reports
//! references that no longer resolve.
//!
//! # Architecture
//!
//! - [`host`]: the seams to the outside world (file store, metadata cache,
//!   attachment path policy, user prompts) plus in-memory and on-disk
//!   implementations
//! - [`syntax`], [`reference`] and [`scanner`]: parsing references out of
//!   notes and resolving them
//! - [`rewrite`], [`patch`] and [`canvas`]: generating new link text and
//!   applying it under concurrent edits
//! - [`rename`], [`attachments`] and [`folders`]: the rename and delete
//!   handlers and the attachment collector
//! - [`checker`]: the read-only consistency report
//! - [`vault`] and [`commands`]: the entry point and the command table
//!
//! ```ignore
//! use linkkeeper::config::Settings;
//! use linkkeeper::vault::Vault;
//!
//! let settings = Settings::new(&vault_path)?;
//! let vault = Vault::new(host, settings);
//! let report = vault.check_consistency().await?;
//! ```

// Engine entry point
pub mod commands;
pub mod vault;

// Event handlers and batch passes
pub mod attachments;
pub mod checker;
pub mod folders;
pub mod rename;

// Parsing, resolution and rewriting
pub mod canvas;
pub mod patch;
pub mod reference;
pub mod rewrite;
pub mod scanner;
pub mod syntax;

// Host seams, configuration and utilities
pub mod config;
pub mod error;
pub mod host;
pub mod path;
pub mod wait;

pub use error::{Error, Result};

// Test utilities (only available in test builds)
#[cfg(test)]
pub mod test_utils;
