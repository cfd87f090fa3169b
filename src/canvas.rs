//! Canvas documents: JSON boards whose nodes point at files or hold Markdown
//! text.
//!
//! A canvas has no linear text offsets, so its references are reported with
//! zero-width positions and are only ever rewritten through the JSON
//! structure.

use std::collections::BTreeMap;
use std::future::Future;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Serializer, Value};

use crate::error::{Error, Result};
use crate::reference::{LinkSyntax, Reference, ReferenceKind};
use crate::syntax;

fn parse(path: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|source| Error::Canvas {
        path: path.to_string(),
        source,
    })
}

fn render(path: &str, canvas: &Value) -> Result<String> {
    let mut out = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"\t"));
    canvas
        .serialize(&mut serializer)
        .map_err(|source| Error::Canvas {
            path: path.to_string(),
            source,
        })?;
    String::from_utf8(out).map_err(|err| Error::Store(format!("{path}: {err}")))
}

fn node_type(node: &Value) -> Option<&str> {
    node.get("type").and_then(Value::as_str)
}

/// File nodes become vault-absolute embeds; links inside text nodes keep the
/// syntax they were written in.
pub fn extract_references(path: &str, text: &str) -> Result<Vec<Reference>> {
    if text.trim().is_empty() {
        return Ok(vec![]);
    }
    let canvas = parse(path, text)?;
    let Some(nodes) = canvas.get("nodes").and_then(Value::as_array) else {
        return Ok(vec![]);
    };

    let mut references = Vec::new();
    for node in nodes {
        match node_type(node) {
            Some("file") => {
                let Some(file) = node.get("file").and_then(Value::as_str) else {
                    continue;
                };
                let subpath = node.get("subpath").and_then(Value::as_str).unwrap_or("");
                references.push(Reference {
                    kind: ReferenceKind::Embed,
                    syntax: LinkSyntax::Markdown,
                    raw_original: file.to_string(),
                    display_text: None,
                    target_raw: format!("/{file}{subpath}"),
                    start: 0,
                    end: 0,
                });
            }
            Some("text") => {
                let Some(node_text) = node.get("text").and_then(Value::as_str) else {
                    continue;
                };
                references.extend(syntax::parse_references(node_text).iter().map(|parsed| {
                    Reference {
                        start: 0,
                        end: 0,
                        ..Reference::from_parsed(parsed)
                    }
                }));
            }
            _ => {}
        }
    }
    Ok(references)
}

/// Points file nodes at their new paths and passes every text node through
/// `rewrite_text`. Returns the new document, or `None` when nothing changed.
pub async fn rewrite<F, Fut>(
    path: &str,
    text: &str,
    moved: &BTreeMap<String, String>,
    mut rewrite_text: F,
) -> Result<Option<String>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    if text.trim().is_empty() {
        return Ok(None);
    }
    let mut canvas = parse(path, text)?;
    let Some(nodes) = canvas.get_mut("nodes").and_then(Value::as_array_mut) else {
        return Ok(None);
    };

    let mut changed = false;
    for node in nodes.iter_mut() {
        let kind = node_type(node).map(str::to_string);
        match kind.as_deref() {
            Some("file") => {
                let new_path = node
                    .get("file")
                    .and_then(Value::as_str)
                    .and_then(|file| moved.get(file))
                    .cloned();
                if let Some(new_path) = new_path {
                    node["file"] = Value::String(new_path);
                    changed = true;
                }
            }
            Some("text") => {
                let Some(node_text) = node.get("text").and_then(Value::as_str) else {
                    continue;
                };
                let node_text = node_text.to_string();
                let new_text = rewrite_text(node_text.clone()).await?;
                if new_text != node_text {
                    node["text"] = Value::String(new_text);
                    changed = true;
                }
            }
            _ => {}
        }
    }

    if !changed {
        return Ok(None);
    }
    render(path, &canvas).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOARD: &str = r##"{
	"nodes": [
		{"id": "1", "type": "file", "file": "Notes/img.png", "x": 0, "y": 0},
		{"id": "2", "type": "file", "file": "Notes/A.md", "subpath": "#Part"},
		{"id": "3", "type": "text", "text": "See [[B]] and ![](pic.png)"}
	],
	"edges": []
}"##;

    #[test]
    fn test_extract_references() {
        let references = extract_references("board.canvas", BOARD).unwrap();
        assert_eq!(references.len(), 4);
        assert_eq!(references[0].target_raw, "/Notes/img.png");
        assert_eq!(references[1].target_raw, "/Notes/A.md#Part");
        assert_eq!(references[2].target_raw, "B");
        assert!(references[3].is_embed());
        assert!(references.iter().all(|reference| !reference.is_patchable()));
    }

    #[test]
    fn test_malformed_canvas() {
        assert!(matches!(
            extract_references("board.canvas", "{not json"),
            Err(Error::Canvas { .. })
        ));
        assert!(extract_references("board.canvas", "").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rewrite_file_nodes_and_text() {
        let moved = BTreeMap::from([("Notes/img.png".to_string(), "Notes/A/img.png".to_string())]);
        let new_text = rewrite("board.canvas", BOARD, &moved, |text| async move {
            Ok(text.replace("[[B]]", "[[Other/B]]"))
        })
        .await
        .unwrap()
        .unwrap();

        let canvas: Value = serde_json::from_str(&new_text).unwrap();
        assert_eq!(canvas["nodes"][0]["file"], "Notes/A/img.png");
        assert_eq!(canvas["nodes"][1]["file"], "Notes/A.md");
        assert_eq!(canvas["nodes"][2]["text"], "See [[Other/B]] and ![](pic.png)");
        assert!(new_text.contains("\n\t\"nodes\""));
    }

    #[tokio::test]
    async fn test_rewrite_without_changes() {
        let unchanged = rewrite("board.canvas", BOARD, &BTreeMap::new(), |text| async move {
            Ok(text)
        })
        .await
        .unwrap();
        assert!(unchanged.is_none());
    }
}
