//! Link and embed occurrences inside a note.

use crate::host::CacheReference;
use crate::path::{self, LinkTarget};
use crate::syntax::ParsedReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Link,
    Embed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkSyntax {
    Wikilink,
    Markdown,
}

/// One occurrence of a link or embed in a note's text.
///
/// `raw_original == text[start..end]` held when the reference was produced; the
/// patcher re-checks it before splicing. Canvas references have `start == end`
/// and can never be patched as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub syntax: LinkSyntax,
    pub raw_original: String,
    pub display_text: Option<String>,
    pub target_raw: String,
    pub start: usize,
    pub end: usize,
}

impl Reference {
    pub fn from_cache(reference: &CacheReference, kind: ReferenceKind) -> Reference {
        let syntax = if reference.original.trim_start_matches('!').starts_with("[[") {
            LinkSyntax::Wikilink
        } else {
            LinkSyntax::Markdown
        };
        Reference {
            kind,
            syntax,
            raw_original: reference.original.clone(),
            display_text: reference.display_text.clone(),
            target_raw: reference.link.clone(),
            start: reference.start,
            end: reference.end,
        }
    }

    pub fn from_parsed(reference: &ParsedReference) -> Reference {
        Reference {
            kind: if reference.is_embed {
                ReferenceKind::Embed
            } else {
                ReferenceKind::Link
            },
            syntax: if reference.is_wikilink {
                LinkSyntax::Wikilink
            } else {
                LinkSyntax::Markdown
            },
            raw_original: reference.original.clone(),
            display_text: reference.display_text.clone(),
            target_raw: reference.link.clone(),
            start: reference.start,
            end: reference.end,
        }
    }

    pub fn is_embed(&self) -> bool {
        self.kind == ReferenceKind::Embed
    }

    pub fn is_wikilink(&self) -> bool {
        self.syntax == LinkSyntax::Wikilink
    }

    pub fn is_patchable(&self) -> bool {
        self.end > self.start
    }

    pub fn link_target(&self) -> LinkTarget {
        path::split_subpath(&self.target_raw)
    }
}

/// Result of resolving a reference against the note that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Canonical vault path the link text points at, whether or not it exists.
    pub absolute_path: String,
    pub subpath: Option<String>,
    /// The existing file the link resolves to; `None` means a broken reference.
    pub file: Option<String>,
}

impl ResolvedTarget {
    pub fn is_broken(&self) -> bool {
        self.file.is_none()
    }
}
