//! Read-only vault check producing the consistency report.

use std::collections::BTreeMap;
use std::fmt::Write;

use once_cell::sync::Lazy;
use regex::Regex;
use ropey::Rope;
use tracing::{error, info};

use crate::error::Result;
use crate::host::Host;
use crate::path;
use crate::reference::Reference;
use crate::scanner::{self, Resolve};
use crate::syntax;
use crate::wait::ConsistencyWait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    BadLinks,
    BadEmbeds,
    WikiLinks,
    WikiEmbeds,
    BadSectionLinks,
}

impl Category {
    /// Report order.
    pub const ALL: [Category; 5] = [
        Category::BadLinks,
        Category::BadEmbeds,
        Category::WikiLinks,
        Category::WikiEmbeds,
        Category::BadSectionLinks,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Category::BadLinks => "Bad links",
            Category::BadEmbeds => "Bad embeds",
            Category::WikiLinks => "Wiki links",
            Category::WikiEmbeds => "Wiki embeds",
            Category::BadSectionLinks => "Bad section links",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// 1-based line of the reference in its note.
    pub line: usize,
    pub raw: String,
}

/// Findings of one category, by note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyCheckResult {
    pub category: Category,
    pub notes: BTreeMap<String, Vec<Finding>>,
}

impl ConsistencyCheckResult {
    pub fn new(category: Category) -> ConsistencyCheckResult {
        ConsistencyCheckResult {
            category,
            notes: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, note: &str, finding: Finding) {
        self.notes.entry(note.to_string()).or_default().push(finding);
    }

    pub fn len(&self) -> usize {
        self.notes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    fn render(&self, out: &mut String) {
        let _ = writeln!(out, "# {}\n", self.category.title());
        if self.is_empty() {
            out.push_str("No problems found\n\n");
            return;
        }
        for (note, findings) in &self.notes {
            let _ = writeln!(out, "## [[{note}]]\n");
            for finding in findings {
                let _ = writeln!(out, "- (line {}): `{}`", finding.line, finding.raw);
            }
            out.push('\n');
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub results: Vec<ConsistencyCheckResult>,
}

impl Default for ConsistencyReport {
    fn default() -> Self {
        ConsistencyReport {
            results: Category::ALL
                .iter()
                .map(|category| ConsistencyCheckResult::new(*category))
                .collect(),
        }
    }
}

impl ConsistencyReport {
    pub fn get(&self, category: Category) -> &ConsistencyCheckResult {
        &self.results[category as usize]
    }

    fn add(&mut self, category: Category, note: &str, finding: Finding) {
        self.results[category as usize].add(note, finding);
    }

    pub fn total(&self) -> usize {
        self.results.iter().map(ConsistencyCheckResult::len).sum()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for result in &self.results {
            result.render(&mut out);
        }
        out.truncate(out.trim_end().len());
        out.push('\n');
        out
    }
}

static NON_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^\p{L}\p{N}]+").expect("Heading normalization regex not constructing")
});

/// Headings compare equal when they agree on letters and digits, ignoring
/// case.
fn normalize_heading(heading: &str) -> String {
    NON_WORD
        .replace_all(&heading.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Whether `subpath` names a heading or block of the Markdown note `target`.
async fn section_exists(
    host: &Host,
    target: &str,
    subpath: &str,
    wait: &ConsistencyWait,
) -> Result<bool> {
    let Some(entry) = scanner::fresh_cache(host, target, wait).await? else {
        return Ok(false);
    };
    let subpath = path::to_file_form(subpath);
    let last = subpath.rsplit('#').next().unwrap_or(&subpath);
    if let Some(block) = last.strip_prefix('^') {
        return Ok(entry.block_ids.iter().any(|id| id == block));
    }
    let wanted = normalize_heading(last);
    Ok(entry
        .headings
        .iter()
        .any(|heading| normalize_heading(heading) == wanted))
}

fn line_of(rope: &Rope, reference: &Reference) -> usize {
    rope.byte_to_line(reference.start.min(rope.len_bytes())) + 1
}

/// Adds the findings of one note to `report`.
pub async fn check_note(
    host: &Host,
    resolver: &dyn Resolve,
    note: &str,
    wait: &ConsistencyWait,
    report: &mut ConsistencyReport,
) -> Result<()> {
    let references = scanner::scan(host, note, wait).await?;
    if references.is_empty() {
        return Ok(());
    }
    let rope = Rope::from_str(&host.store.read(note).await?);

    for reference in references {
        if syntax::is_external(&reference.target_raw) {
            continue;
        }
        let finding = || Finding {
            line: line_of(&rope, &reference),
            raw: reference.raw_original.clone(),
        };

        if reference.is_wikilink() {
            let category = if reference.is_embed() {
                Category::WikiEmbeds
            } else {
                Category::WikiLinks
            };
            report.add(category, note, finding());
        }

        let resolved = scanner::resolve(resolver, &reference, note).await?;
        let Some(file) = resolved.file else {
            let category = if reference.is_embed() {
                Category::BadEmbeds
            } else {
                Category::BadLinks
            };
            report.add(category, note, finding());
            continue;
        };
        let Some(subpath) = resolved.subpath.filter(|subpath| !subpath.is_empty()) else {
            continue;
        };
        if path::is_markdown(&file) && !section_exists(host, &file, &subpath, wait).await? {
            report.add(Category::BadSectionLinks, note, finding());
        }
    }
    Ok(())
}

/// Checks every note of `notes` except the report file itself. A note that
/// cannot be read is logged and skipped.
pub async fn check(
    host: &Host,
    resolver: &dyn Resolve,
    notes: &[String],
    report_file: &str,
    wait: &ConsistencyWait,
) -> ConsistencyReport {
    let mut report = ConsistencyReport::default();
    for note in notes.iter().filter(|note| note.as_str() != report_file) {
        if let Err(err) = check_note(host, resolver, note, wait, &mut report).await {
            error!("Failed to check {note}: {err}");
        }
    }
    info!("Consistency check found {} problem(s)", report.total());
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::CacheResolver;
    use crate::test_utils::host_with_files;

    async fn check_files(files: &[(&str, &str)]) -> ConsistencyReport {
        let host = host_with_files(files);
        let notes = scanner::list_notes(host.store.as_ref()).await.unwrap();
        let resolver = CacheResolver::new(host.cache.as_ref());
        check(
            &host,
            &resolver,
            &notes,
            "consistency-report.md",
            &ConsistencyWait::default(),
        )
        .await
    }

    #[tokio::test]
    async fn test_broken_link_reported_once() {
        let text = "# Title\n\nSee [text](missing.png) here";
        let host = host_with_files(&[("Notes/A.md", text)]);
        let notes = vec!["Notes/A.md".to_string()];
        let resolver = CacheResolver::new(host.cache.as_ref());
        let report = check(&host, &resolver, &notes, "report.md", &ConsistencyWait::default()).await;

        let bad = report.get(Category::BadLinks);
        assert_eq!(bad.len(), 1);
        assert_eq!(
            bad.notes["Notes/A.md"],
            vec![Finding {
                line: 3,
                raw: "[text](missing.png)".into()
            }]
        );
        assert_eq!(report.total(), 1);
        assert_eq!(host.store.read("Notes/A.md").await.unwrap(), text);
    }

    #[tokio::test]
    async fn test_categories() {
        let report = check_files(&[
            (
                "A.md",
                "[[B]] ![[img.png]] ![](gone.png) [[Nope]]\n[x](B.md#Real-Heading) [y](B.md#Missing) [[B#^blk]] [[B#^nope]]\n[p](doc.pdf#page=3) [[#Local]]\n## Local",
            ),
            ("B.md", "# Real Heading\ntext ^blk"),
            ("img.png", ""),
            ("doc.pdf", ""),
            ("consistency-report.md", "[[ignored]]"),
        ])
        .await;

        let raws = |category| {
            report
                .get(category)
                .notes
                .values()
                .flatten()
                .map(|finding| finding.raw.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(raws(Category::BadLinks), vec!["[[Nope]]"]);
        assert_eq!(raws(Category::BadEmbeds), vec!["![](gone.png)"]);
        assert_eq!(
            raws(Category::WikiLinks),
            vec!["[[B]]", "[[Nope]]", "[[B#^blk]]", "[[B#^nope]]", "[[#Local]]"]
        );
        assert_eq!(raws(Category::WikiEmbeds), vec!["![[img.png]]"]);
        assert_eq!(
            raws(Category::BadSectionLinks),
            vec!["[y](B.md#Missing)", "[[B#^nope]]"]
        );
    }

    #[test]
    fn test_render_keeps_empty_categories() {
        let mut report = ConsistencyReport::default();
        report.add(
            Category::BadEmbeds,
            "Notes/A.md",
            Finding {
                line: 4,
                raw: "![](x.png)".into(),
            },
        );
        let rendered = report.render();
        assert_eq!(
            rendered,
            "# Bad links\n\nNo problems found\n\n\
             # Bad embeds\n\n## [[Notes/A.md]]\n\n- (line 4): `![](x.png)`\n\n\
             # Wiki links\n\nNo problems found\n\n\
             # Wiki embeds\n\nNo problems found\n\n\
             # Bad section links\n\nNo problems found\n"
        );
    }

    #[test]
    fn test_normalize_heading() {
        assert_eq!(normalize_heading("Real-Heading"), "real heading");
        assert_eq!(normalize_heading("Real Heading!"), "real heading");
        assert_eq!(normalize_heading("  Ünïcode  (2) "), "ünïcode 2");
    }
}
