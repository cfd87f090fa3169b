//! Vault path helpers and link target resolution.
//!
//! Vault paths are always forward-slash, relative to the vault root and free of
//! `.`/`..` segments. Only link *text* may be relative. Two normalization forms
//! are kept apart on purpose:
//!
//! - **file form** (`%20` decoded, `\` turned into `/`) is what lookups use;
//! - **link form** (space encoded as `%20`, `\` turned into `/`) is what gets
//!   written back into a document.

use std::collections::BTreeSet;
use std::path::Path;

use pathdiff::diff_paths;

pub const MARKDOWN_EXTENSION: &str = "md";
pub const CANVAS_EXTENSION: &str = "canvas";
pub const PDF_EXTENSION: &str = "pdf";

/// A link target split into the path part and an optional subpath (`#heading`,
/// `#^block`, `#page=3`). The subpath never contains the leading `#`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkTarget {
    pub link_path: String,
    pub subpath: Option<String>,
}

pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn extension(path: &str) -> Option<&str> {
    let name = file_name(path);
    match name.rfind('.') {
        Some(dot) if dot > 0 && !name[dot + 1..].contains(' ') => Some(&name[dot + 1..]),
        _ => None,
    }
}

/// File name without its extension.
pub fn stem(path: &str) -> &str {
    let name = file_name(path);
    match extension(name) {
        Some(ext) => &name[..name.len() - ext.len() - 1],
        None => name,
    }
}

/// Parent folder, `""` for the vault root.
pub fn parent(path: &str) -> &str {
    path.rfind('/').map(|index| &path[..index]).unwrap_or("")
}

pub fn join(dir: &str, name: &str) -> String {
    match (dir.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (false, true) => dir.to_string(),
        (false, false) => format!("{dir}/{name}"),
    }
}

fn has_extension(path: &str, wanted: &str) -> bool {
    extension(path).is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
}

pub fn is_markdown(path: &str) -> bool {
    has_extension(path, MARKDOWN_EXTENSION)
}

pub fn is_canvas(path: &str) -> bool {
    has_extension(path, CANVAS_EXTENSION)
}

pub fn is_pdf(path: &str) -> bool {
    has_extension(path, PDF_EXTENSION)
}

/// Notes are the documents that own references: Markdown files and canvases.
pub fn is_note(path: &str) -> bool {
    is_markdown(path) || is_canvas(path)
}

pub fn without_markdown_extension(path: &str) -> &str {
    if is_markdown(path) {
        &path[..path.len() - MARKDOWN_EXTENSION.len() - 1]
    } else {
        path
    }
}

/// True when `path` is `folder` itself or lies somewhere below it.
pub fn is_within(path: &str, folder: &str) -> bool {
    folder.is_empty()
        || path == folder
        || path
            .strip_prefix(folder)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Resolves `.` and `..` segments and drops empty ones. `..` above the vault
/// root is discarded.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    segments.join("/")
}

pub fn to_file_form(link: &str) -> String {
    let slashed = link.replace('\\', "/");
    urlencoding::decode(&slashed).map_or_else(|_| slashed.clone(), |decoded| decoded.into_owned())
}

pub fn to_link_form(path: &str) -> String {
    path.replace('\\', "/").replace(' ', "%20")
}

/// Counts the backslashes directly before `index`; an odd count escapes the
/// character at `index`.
pub(crate) fn is_escaped(text: &str, index: usize) -> bool {
    text[..index]
        .bytes()
        .rev()
        .take_while(|byte| *byte == b'\\')
        .count()
        % 2
        == 1
}

/// Splits a raw link target at its first unescaped `#`.
///
/// The suffix only counts as a subpath for note-like targets (a `.md` file or a
/// path without extension) and for `page=N` anchors on PDFs. Any other `#` is
/// part of the file name, including `c#.png` where the extension only shows
/// after the `#`.
pub fn split_subpath(target_raw: &str) -> LinkTarget {
    let target = target_raw.trim();
    let target = target
        .strip_prefix('<')
        .and_then(|inner| inner.strip_suffix('>'))
        .unwrap_or(target);

    let mut search_from = 0;
    while let Some(found) = target[search_from..].find('#') {
        let index = search_from + found;
        if is_escaped(target, index) {
            search_from = index + 1;
            continue;
        }

        let (path, rest) = (&target[..index], &target[index + 1..]);
        if splits_at_subpath(path, rest) {
            return LinkTarget {
                link_path: unescape_hash(path),
                subpath: Some(rest.to_string()),
            };
        }
        break;
    }

    LinkTarget {
        link_path: unescape_hash(target),
        subpath: None,
    }
}

fn splits_at_subpath(path: &str, rest: &str) -> bool {
    let decoded = to_file_form(path);
    match extension(&decoded) {
        None => !ends_in_file_extension(&to_file_form(rest)),
        Some(ext) if ext.eq_ignore_ascii_case(MARKDOWN_EXTENSION) => true,
        Some(ext) if ext.eq_ignore_ascii_case(PDF_EXTENSION) => rest.starts_with("page="),
        Some(_) => false,
    }
}

/// Whether `rest` ends like the name of a non-note file, as in `c#.png`.
/// Headings such as `v1.2` do not count: the extension needs a letter.
fn ends_in_file_extension(rest: &str) -> bool {
    let Some(dot) = rest.rfind('.') else {
        return false;
    };
    let ext = &rest[dot + 1..];
    !ext.is_empty()
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
        && ext.chars().any(|c| c.is_ascii_alphabetic())
        && !ext.eq_ignore_ascii_case(MARKDOWN_EXTENSION)
        && !ext.eq_ignore_ascii_case(PDF_EXTENSION)
}

fn unescape_hash(text: &str) -> String {
    text.replace("\\#", "#")
}

/// Joins the owning note's folder with a link path and normalizes the result.
/// An empty link path points at the owning note itself.
pub fn to_absolute(link_path: &str, owning_note_path: &str) -> String {
    absolute_from_file_form(&to_file_form(link_path), owning_note_path)
}

fn absolute_from_file_form(decoded: &str, owning_note_path: &str) -> String {
    if decoded.is_empty() {
        return owning_note_path.to_string();
    }
    match decoded.strip_prefix('/') {
        Some(rooted) => normalize(rooted),
        None => normalize(&join(parent(owning_note_path), decoded)),
    }
}

/// Path of `target` as seen from the folder of `source_note`, in file form.
pub fn relative_path(target: &str, source_note: &str) -> String {
    diff_paths(Path::new(target), Path::new(parent(source_note)))
        .and_then(|diff| diff.to_str().map(|diff| diff.replace('\\', "/")))
        .unwrap_or_else(|| target.to_string())
}

/// Resolves link text the way a vault does: relative to the source folder,
/// then from the vault root (each with and without an implied `.md`), then by
/// path suffix anywhere in the vault.
pub fn first_linkpath_dest(
    link_path: &str,
    source_path: &str,
    files: &BTreeSet<String>,
) -> Option<String> {
    let decoded = to_file_form(link_path);
    let link = decoded.trim();
    if link.is_empty() {
        return files
            .contains(source_path)
            .then(|| source_path.to_string());
    }

    let candidates = match link.strip_prefix('/') {
        Some(rooted) => vec![normalize(rooted)],
        None => vec![absolute_from_file_form(link, source_path), normalize(link)],
    };
    for candidate in candidates {
        if files.contains(&candidate) {
            return Some(candidate);
        }
        let with_extension = format!("{candidate}.{MARKDOWN_EXTENSION}");
        if files.contains(&with_extension) {
            return Some(with_extension);
        }
    }

    if link.starts_with('.') || link.starts_with('/') {
        return None;
    }

    let suffix = normalize(link);
    let source_folder = parent(source_path);
    files
        .iter()
        .filter(|file| matches_suffix(file, &suffix))
        .min_by_key(|file| (parent(file) != source_folder, file.len(), file.as_str()))
        .cloned()
}

fn matches_suffix(file: &str, suffix: &str) -> bool {
    let with_extension = format!("{suffix}.{MARKDOWN_EXTENSION}");
    [suffix, with_extension.as_str()].iter().any(|wanted| {
        file == *wanted
            || file
                .strip_suffix(wanted)
                .is_some_and(|head| head.ends_with('/'))
    })
}
