//! Wikilink / Markdown link syntax.
//!
//! All link regexes live here. The `regex` crate has no lookbehind, so escapes
//! (`\[[not a link]]`) are rejected after matching by counting the backslashes
//! that precede a match.

use std::ops::Range;

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::path::is_escaped;

static WIKI_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!?\[\[(?<inner>[^\[\]\n]+?)\]\]").expect("Wiki Link Not Constructing"));

static MD_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!?\[(?<display>(?:\\.|[^\[\]\\\n])*)\]\(\s*(?<url><[^<>\n]+>|[^\s()<>]+)\s*\)")
        .expect("MD Link Not Constructing")
}); // [display](relativePath)

static WHOLE_WIKI_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^!?\[\[[^\[\]\n]+\]\]$").expect("Wiki Link Not Constructing"));

static WHOLE_MD_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^!?\[(?:\\.|[^\[\]\\\n])*\]\(\s*(?:<[^<>\n]+>|[^\s()<>]+)\s*\)$")
        .expect("MD Link Not Constructing")
});

static URL_SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").expect("URL scheme regex"));

static FENCED_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?ms)^[ \t]*```.*?^[ \t]*```|(?ms)^[ \t]*~~~.*?^[ \t]*~~~").unwrap());

static INLINE_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`\n]+`").unwrap());

static HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^#{1,6}[ \t]+(?<heading_text>.+?)(?:[ \t]+#+)?[ \t]*$").unwrap()
});

static BLOCK_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)(?:^|\s)\^(?<index>[A-Za-z0-9\-]+)[ \t]*$").unwrap());

/// One link or embed found in raw Markdown text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReference {
    /// Exact source text, including the leading `!` of embeds.
    pub original: String,
    /// Unresolved target as written (angle brackets stripped), subpath included.
    pub link: String,
    pub display_text: Option<String>,
    pub start: usize,
    pub end: usize,
    pub is_embed: bool,
    pub is_wikilink: bool,
}

pub fn is_wikilink(text: &str) -> bool {
    WHOLE_WIKI_LINK_RE.is_match(text)
}

pub fn is_markdown_link(text: &str) -> bool {
    WHOLE_MD_LINK_RE.is_match(text)
}

pub fn is_embed(text: &str) -> bool {
    text.starts_with('!') && (is_wikilink(text) || is_markdown_link(text))
}

/// `http://`, `mailto:` and friends never point into the vault.
pub fn is_external(link: &str) -> bool {
    URL_SCHEME_RE.is_match(link.trim_start_matches('<'))
}

fn code_ranges(text: &str) -> Vec<Range<usize>> {
    FENCED_CODE_RE
        .find_iter(text)
        .chain(INLINE_CODE_RE.find_iter(text))
        .map(|found| found.range())
        .collect()
}

fn in_code(ranges: &[Range<usize>], offset: usize) -> bool {
    ranges.iter().any(|range| range.contains(&offset))
}

/// Adjusts a match for escapes: an escaped `[` drops the match, an escaped `!`
/// turns an embed into a plain link starting one byte later.
fn unescaped_start(text: &str, start: usize) -> Option<(usize, bool)> {
    let is_embed = text[start..].starts_with('!');
    if is_escaped(text, start) {
        return is_embed.then_some((start + 1, false));
    }
    Some((start, is_embed))
}

fn split_alias(inner: &str) -> (&str, Option<&str>) {
    let mut search_from = 0;
    while let Some(found) = inner[search_from..].find('|') {
        let index = search_from + found;
        if is_escaped(inner, index) {
            // `\|` is how wikilinks inside tables escape the alias pipe
            return (&inner[..index - 1], Some(&inner[index + 1..]));
        }
        if index > 0 {
            return (&inner[..index], Some(&inner[index + 1..]));
        }
        search_from = index + 1;
    }
    (inner, None)
}

/// Extracts every wikilink and Markdown link outside code, ordered by offset.
/// Overlapping matches keep the earliest one.
pub fn parse_references(text: &str) -> Vec<ParsedReference> {
    let code = code_ranges(text);

    let wiki_links = WIKI_LINK_RE.captures_iter(text).flat_map(|capture| {
        let full = capture.get(0)?;
        let (start, is_embed) = unescaped_start(text, full.start())?;
        let (link, display) = split_alias(capture.name("inner")?.as_str());
        Some(ParsedReference {
            original: text[start..full.end()].to_string(),
            link: link.trim().to_string(),
            display_text: display.map(|display| display.to_string()),
            start,
            end: full.end(),
            is_embed,
            is_wikilink: true,
        })
    });

    let md_links = MD_LINK_RE.captures_iter(text).flat_map(|capture| {
        let full = capture.get(0)?;
        let url = capture.name("url")?.as_str();
        if is_external(url) {
            return None;
        }
        let (start, is_embed) = unescaped_start(text, full.start())?;
        let url = url
            .strip_prefix('<')
            .and_then(|inner| inner.strip_suffix('>'))
            .unwrap_or(url);
        Some(ParsedReference {
            original: text[start..full.end()].to_string(),
            link: url.to_string(),
            display_text: capture.name("display").map(|display| display.as_str().to_string()),
            start,
            end: full.end(),
            is_embed,
            is_wikilink: false,
        })
    });

    let mut last_end = 0;
    wiki_links
        .chain(md_links)
        .filter(|reference| !in_code(&code, reference.start))
        .sorted_by_key(|reference| reference.start)
        .filter(|reference| {
            let keep = reference.start >= last_end;
            if keep {
                last_end = reference.end;
            }
            keep
        })
        .collect_vec()
}

pub fn parse_headings(text: &str) -> Vec<String> {
    let code = code_ranges(text);
    HEADING_RE
        .captures_iter(text)
        .filter(|capture| capture.get(0).is_some_and(|full| !in_code(&code, full.start())))
        .flat_map(|capture| capture.name("heading_text").map(|heading| heading.as_str().trim().to_string()))
        .collect()
}

pub fn parse_block_ids(text: &str) -> Vec<String> {
    let code = code_ranges(text);
    BLOCK_ID_RE
        .captures_iter(text)
        .filter(|capture| capture.get(0).is_some_and(|full| !in_code(&code, full.start())))
        .flat_map(|capture| capture.name("index").map(|index| index.as_str().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(is_wikilink("[[note]]"));
        assert!(is_wikilink("![[img.png|200]]"));
        assert!(!is_wikilink("[note](note.md)"));
        assert!(is_markdown_link("[alias](note.md)"));
        assert!(is_markdown_link("![](img%201.png)"));
        assert!(is_markdown_link("[](<my file.md>)"));
        assert!(!is_markdown_link("[[note]]"));
        assert!(is_embed("![[img.png]]"));
        assert!(is_embed("![](img.png)"));
        assert!(!is_embed("[[img.png]]"));
        assert!(!is_embed("!not a link"));
    }

    #[test]
    fn test_wikilink_parsing() {
        let text = "See [[Other note#Heading|the heading]] here";
        let refs = parse_references(text);
        assert_eq!(refs.len(), 1);
        let reference = &refs[0];
        assert_eq!(reference.link, "Other note#Heading");
        assert_eq!(reference.display_text.as_deref(), Some("the heading"));
        assert_eq!(&text[reference.start..reference.end], reference.original);
        assert!(reference.is_wikilink);
        assert!(!reference.is_embed);
    }

    #[test]
    fn test_embed_parsing() {
        let text = "![[img.png]] and ![alt](sub/pic%201.png)";
        let refs = parse_references(text);
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|reference| reference.is_embed));
        assert_eq!(refs[0].original, "![[img.png]]");
        assert_eq!(refs[1].link, "sub/pic%201.png");
        assert_eq!(refs[1].display_text.as_deref(), Some("alt"));
        assert_eq!(refs[1].start, 17);
    }

    #[test]
    fn test_escaped_brackets_are_not_links() {
        assert!(parse_references(r"\[not a link\]").is_empty());
        assert!(parse_references(r"\[[not a link]]").is_empty());
        assert!(parse_references(r"\[text](target.md)").is_empty());
        let refs = parse_references(r"\\[[real]]");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].original, "[[real]]");
    }

    #[test]
    fn test_escaped_bang_is_plain_link() {
        let refs = parse_references(r"\![[img.png]]");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].original, "[[img.png]]");
        assert!(!refs[0].is_embed);
    }

    #[test]
    fn test_external_urls_skipped() {
        let refs = parse_references("[site](https://example.com) [mail](mailto:a@b.c) [ok](a.md)");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].link, "a.md");
    }

    #[test]
    fn test_code_is_skipped() {
        let text = "```\n[[in fence]]\n```\nUse `[[inline]]` but [[real]]";
        let refs = parse_references(text);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].link, "real");
    }

    #[test]
    fn test_angle_bracket_url() {
        let refs = parse_references("[x](<my file.md#Some Heading>)");
        assert_eq!(refs[0].link, "my file.md#Some Heading");
    }

    #[test]
    fn test_table_escaped_pipe() {
        let refs = parse_references(r"| [[note\|alias]] |");
        assert_eq!(refs[0].link, "note");
        assert_eq!(refs[0].display_text.as_deref(), Some("alias"));
    }

    #[test]
    fn test_overlap_keeps_first() {
        let refs = parse_references("[[a]](b.md)");
        assert_eq!(refs.len(), 1);
        assert!(refs[0].is_wikilink);
    }

    #[test]
    fn test_headings_and_blocks() {
        let text = "# Title\n\n## Section Two ##\n\nparagraph ^abc-1\n\n```\n# not heading\n```";
        assert_eq!(parse_headings(text), vec!["Title", "Section Two"]);
        assert_eq!(parse_block_ids(text), vec!["abc-1"]);
    }
}
