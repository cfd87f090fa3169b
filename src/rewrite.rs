//! Computing the new text of a link or embed.
//!
//! Links are rendered the way a user would get them from inserting the link by
//! hand: the same path math, the same escaping, `.md` dropped from wikilinks
//! to notes. A rewrite keeps the reference's syntax, embed-ness, path style
//! and subpath unless the [`RewriteContext`] says otherwise.

use crate::error::Result;
use crate::patch::TextEdit;
use crate::path;
use crate::reference::Reference;
use crate::scanner::{self, Resolve};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    /// Bare file name when it is unambiguous, otherwise the vault path.
    Shortest,
    /// Relative to the folder of the note holding the link.
    Relative,
    /// Full vault path.
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferenceFilter {
    #[default]
    All,
    LinksOnly,
    EmbedsOnly,
}

impl ReferenceFilter {
    pub fn accepts(self, reference: &Reference) -> bool {
        match self {
            ReferenceFilter::All => true,
            ReferenceFilter::LinksOnly => !reference.is_embed(),
            ReferenceFilter::EmbedsOnly => reference.is_embed(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RewriteContext {
    /// Render wikilinks as Markdown links.
    pub force_markdown: bool,
    pub filter: ReferenceFilter,
    /// Overrides the path style inferred from the original link text.
    pub path_style: Option<PathStyle>,
    pub is_embed: Option<bool>,
    /// Drop aliases that only repeat the target's name or path.
    pub drop_redundant_alias: bool,
}

/// Everything that goes into one rendered link.
#[derive(Debug, Clone, Copy)]
pub struct LinkSpec<'a> {
    pub target: &'a str,
    pub source: &'a str,
    pub subpath: Option<&'a str>,
    pub alias: Option<&'a str>,
    pub is_embed: bool,
    pub is_wikilink: bool,
    pub style: PathStyle,
}

fn strip_for_wikilink(text: &str, target: &str, is_wikilink: bool) -> String {
    if is_wikilink && path::is_markdown(target) {
        path::without_markdown_extension(text).to_string()
    } else {
        text.to_string()
    }
}

/// The path part of a link to `target` from `source`, in file form.
pub async fn link_path_text(
    resolver: &dyn Resolve,
    target: &str,
    source: &str,
    style: PathStyle,
    is_wikilink: bool,
) -> Result<String> {
    let text = match style {
        PathStyle::Absolute => target.to_string(),
        PathStyle::Relative => path::relative_path(target, source),
        PathStyle::Shortest => {
            let name = strip_for_wikilink(path::file_name(target), target, is_wikilink);
            let resolved = resolver.resolve_link(&name, source).await?;
            if resolved.as_deref() == Some(target) {
                return Ok(name);
            }
            target.to_string()
        }
    };
    Ok(strip_for_wikilink(&text, target, is_wikilink))
}

fn escape_brackets(alias: &str) -> String {
    let mut escaped = String::with_capacity(alias.len());
    let mut previous = None;
    for c in alias.chars() {
        if (c == '[' || c == ']') && previous != Some('\\') {
            escaped.push('\\');
        }
        escaped.push(c);
        previous = Some(c);
    }
    escaped
}

pub async fn generate_link(resolver: &dyn Resolve, spec: &LinkSpec<'_>) -> Result<String> {
    let path_text = if spec.target == spec.source && spec.subpath.is_some() {
        String::new()
    } else {
        link_path_text(resolver, spec.target, spec.source, spec.style, spec.is_wikilink).await?
    };
    let bang = if spec.is_embed { "!" } else { "" };

    if spec.is_wikilink {
        let subpath = spec
            .subpath
            .map(|subpath| format!("#{}", path::to_file_form(subpath)))
            .unwrap_or_default();
        let alias = spec.alias.map(|alias| format!("|{alias}")).unwrap_or_default();
        return Ok(format!("{bang}[[{path_text}{subpath}{alias}]]"));
    }

    let subpath = spec
        .subpath
        .map(|subpath| format!("#{}", path::to_link_form(&path::to_file_form(subpath))))
        .unwrap_or_default();
    let mut url = format!("{}{subpath}", path::to_link_form(&path_text));
    if url.contains(['(', ')']) {
        url = format!("<{url}>");
    }
    let alias = spec.alias.map(escape_brackets).unwrap_or_default();
    Ok(format!("{bang}[{alias}]({url})"))
}

/// Path style of existing link text that points at `target` from `source`.
pub fn infer_style(reference: &Reference, source: &str, target: &str) -> PathStyle {
    let link_path = path::to_file_form(&reference.link_target().link_path);
    if link_path.starts_with("./") || link_path.starts_with("../") {
        return PathStyle::Relative;
    }
    if link_path.starts_with('/') {
        return PathStyle::Absolute;
    }

    let relative = path::normalize(&path::join(path::parent(source), &link_path));
    let is_relative =
        relative == target || format!("{relative}.{}", path::MARKDOWN_EXTENSION) == target;
    match (link_path.contains('/'), is_relative) {
        (_, true) if !reference.is_wikilink() || link_path.contains('/') => PathStyle::Relative,
        (true, false) => PathStyle::Absolute,
        _ => PathStyle::Shortest,
    }
}

fn is_redundant_alias(alias: &str, old_target: &str, new_target: &str, canonical: &str) -> bool {
    let alias = alias.trim();
    [old_target, new_target].iter().any(|target| {
        alias == *target
            || alias == path::without_markdown_extension(target)
            || alias == path::file_name(target)
            || alias == path::stem(target)
    }) || alias == canonical
}

/// Where a reference pointed and where it has to point now.
#[derive(Debug, Clone, Copy)]
pub struct Retarget<'a> {
    /// Path of the note holding the reference before the change.
    pub old_source: &'a str,
    pub source: &'a str,
    pub old_target: &'a str,
    pub new_target: &'a str,
}

/// The edit turning `reference` into a link to `retarget.new_target`, or
/// `None` when the rendered text is what the note already says.
pub async fn rewrite_reference(
    resolver: &dyn Resolve,
    reference: &Reference,
    retarget: &Retarget<'_>,
    context: &RewriteContext,
) -> Result<Option<TextEdit>> {
    if !reference.is_patchable() || !context.filter.accepts(reference) {
        return Ok(None);
    }

    let is_embed = context.is_embed.unwrap_or(reference.is_embed());
    let is_wikilink = reference.is_wikilink() && !context.force_markdown;
    let style = context.path_style.unwrap_or_else(|| {
        infer_style(reference, retarget.old_source, retarget.old_target)
    });
    let target = reference.link_target();

    let mut alias = reference
        .display_text
        .as_deref()
        .filter(|alias| !alias.trim().is_empty());
    if context.drop_redundant_alias {
        if let Some(current) = alias {
            let canonical = link_path_text(
                resolver,
                retarget.new_target,
                retarget.source,
                PathStyle::Shortest,
                is_wikilink,
            )
            .await?;
            if is_redundant_alias(current, retarget.old_target, retarget.new_target, &canonical) {
                alias = None;
            }
        }
    }

    let new_text = generate_link(
        resolver,
        &LinkSpec {
            target: retarget.new_target,
            source: retarget.source,
            subpath: target.subpath.as_deref(),
            alias,
            is_embed,
            is_wikilink,
            style,
        },
    )
    .await?;

    if new_text == reference.raw_original {
        return Ok(None);
    }
    Ok(Some(TextEdit {
        start: reference.start,
        end: reference.end,
        old_content: reference.raw_original.clone(),
        new_content: new_text,
    }))
}

/// Vault-wide link normalizations offered as batch commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    WikilinksToMarkdown,
    WikiEmbedsToMarkdown,
    EmbedsToRelative,
    LinksToRelative,
}

impl Conversion {
    pub fn context(self, drop_redundant_alias: bool) -> RewriteContext {
        let (filter, force_markdown, path_style) = match self {
            Conversion::WikilinksToMarkdown => (ReferenceFilter::LinksOnly, true, None),
            Conversion::WikiEmbedsToMarkdown => (ReferenceFilter::EmbedsOnly, true, None),
            Conversion::EmbedsToRelative => {
                (ReferenceFilter::EmbedsOnly, false, Some(PathStyle::Relative))
            }
            Conversion::LinksToRelative => {
                (ReferenceFilter::LinksOnly, false, Some(PathStyle::Relative))
            }
        };
        RewriteContext {
            force_markdown,
            filter,
            path_style,
            is_embed: None,
            drop_redundant_alias,
        }
    }

    fn applies_to(self, reference: &Reference) -> bool {
        match self {
            Conversion::WikilinksToMarkdown | Conversion::WikiEmbedsToMarkdown => {
                reference.is_wikilink()
            }
            Conversion::EmbedsToRelative | Conversion::LinksToRelative => true,
        }
    }
}

/// Edits applying `conversion` to the references of `note`. Broken references
/// are left alone.
pub async fn conversion_edits(
    resolver: &dyn Resolve,
    note: &str,
    references: &[Reference],
    conversion: Conversion,
    drop_redundant_alias: bool,
) -> Result<Vec<TextEdit>> {
    let context = conversion.context(drop_redundant_alias);
    let mut edits = Vec::new();
    for reference in references {
        if !reference.is_patchable()
            || !context.filter.accepts(reference)
            || !conversion.applies_to(reference)
        {
            continue;
        }
        let resolved = scanner::resolve(resolver, reference, note).await?;
        let Some(file) = resolved.file else {
            continue;
        };
        let retarget = Retarget {
            old_source: note,
            source: note,
            old_target: &file,
            new_target: &file,
        };
        if let Some(edit) = rewrite_reference(resolver, reference, &retarget, &context).await? {
            edits.push(edit);
        }
    }
    Ok(edits)
}
