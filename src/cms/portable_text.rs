//! Markdown to Sanity Portable Text.
//!
//! Handles the subset the writer produces: `##`/`###` headings, `-`/`*`
//! bullets, `1.` numbered items, paragraphs, and inline `**bold**`,
//! `*italic*` and `[text](url)` links. Headings carry no links.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Span {
    #[serde(rename = "_type")]
    pub kind: &'static str,
    #[serde(rename = "_key")]
    pub key: String,
    pub text: String,
    pub marks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkDef {
    #[serde(rename = "_type")]
    pub kind: &'static str,
    #[serde(rename = "_key")]
    pub key: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    #[serde(rename = "_type")]
    pub kind: &'static str,
    #[serde(rename = "_key")]
    pub key: String,
    pub style: &'static str,
    #[serde(rename = "listItem", skip_serializing_if = "Option::is_none")]
    pub list_item: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    #[serde(rename = "markDefs")]
    pub mark_defs: Vec<MarkDef>,
    pub children: Vec<Span>,
}

/// Random 12-hex-char block key.
pub fn new_key() -> String {
    let mut key = uuid::Uuid::new_v4().simple().to_string();
    key.truncate(12);
    key
}

fn span(text: &str, marks: Vec<String>) -> Span {
    Span {
        kind: "span",
        key: new_key(),
        text: text.to_string(),
        marks,
    }
}

fn block(style: &'static str, list_item: Option<&'static str>, (children, mark_defs): (Vec<Span>, Vec<MarkDef>)) -> Block {
    Block {
        kind: "block",
        key: new_key(),
        style,
        list_item,
        level: list_item.map(|_| 1),
        mark_defs,
        children,
    }
}

static EMPHASIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*|\*([^*]+?)\*|([^*]+)").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").unwrap());
static NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\s+(.+)$").unwrap());

/// Bold and italic spans. Unpaired asterisks are dropped.
fn inline_emphasis(text: &str) -> Vec<Span> {
    let children: Vec<Span> = EMPHASIS
        .captures_iter(text)
        .filter_map(|c| {
            if let Some(bold) = c.get(1) {
                Some(span(bold.as_str(), vec!["strong".into()]))
            } else if let Some(italic) = c.get(2) {
                Some(span(italic.as_str(), vec!["em".into()]))
            } else {
                c.get(3).map(|plain| span(plain.as_str(), Vec::new()))
            }
        })
        .collect();
    if children.is_empty() {
        vec![span(text, Vec::new())]
    } else {
        children
    }
}

/// Spans and link mark definitions for one line.
fn inline_with_links(text: &str) -> (Vec<Span>, Vec<MarkDef>) {
    let mut children = Vec::new();
    let mut mark_defs = Vec::new();
    let mut last_end = 0;

    for c in LINK.captures_iter(text) {
        let (Some(whole), Some(label), Some(href)) = (c.get(0), c.get(1), c.get(2)) else {
            continue;
        };
        if whole.start() > last_end {
            children.extend(inline_emphasis(&text[last_end..whole.start()]));
        }
        let link_key = new_key();
        mark_defs.push(MarkDef {
            kind: "link",
            key: link_key.clone(),
            href: href.as_str().to_string(),
        });
        children.push(span(label.as_str(), vec![link_key]));
        last_end = whole.end();
    }
    if last_end < text.len() {
        children.extend(inline_emphasis(&text[last_end..]));
    }
    if children.is_empty() {
        children.push(span(text, Vec::new()));
    }
    (children, mark_defs)
}

pub fn markdown_to_portable_text(markdown: &str) -> Vec<Block> {
    markdown
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if let Some(h3) = line.strip_prefix("### ") {
                block("h3", None, (inline_emphasis(h3), Vec::new()))
            } else if let Some(h2) = line.strip_prefix("## ") {
                block("h2", None, (inline_emphasis(h2), Vec::new()))
            } else if let Some(item) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
                block("normal", Some("bullet"), inline_with_links(item))
            } else if let Some(c) = NUMBERED.captures(line) {
                block("normal", Some("number"), inline_with_links(&c[1]))
            } else {
                block("normal", None, inline_with_links(line))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_twelve_hex_chars_and_unique() {
        let a = new_key();
        let b = new_key();
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn converts_headings_lists_and_paragraphs() {
        let md = "## What Happened\n\nA **jury** ruled *today*.\n\n### Details\n- first item\n* second item\n1. step one\n12. step twelve";
        let blocks = markdown_to_portable_text(md);
        let styles: Vec<_> = blocks.iter().map(|b| (b.style, b.list_item)).collect();
        assert_eq!(
            styles,
            vec![
                ("h2", None),
                ("normal", None),
                ("h3", None),
                ("normal", Some("bullet")),
                ("normal", Some("bullet")),
                ("normal", Some("number")),
                ("normal", Some("number")),
            ]
        );
        assert_eq!(blocks[0].children[0].text, "What Happened");
        assert_eq!(blocks[3].level, Some(1));
        assert_eq!(blocks[1].level, None);
        assert_eq!(blocks[6].children[0].text, "step twelve");

        let para = &blocks[1].children;
        let parts: Vec<_> = para.iter().map(|s| (s.text.as_str(), s.marks.clone())).collect();
        assert_eq!(
            parts,
            vec![
                ("A ", vec![]),
                ("jury", vec!["strong".to_string()]),
                (" ruled ", vec![]),
                ("today", vec!["em".to_string()]),
                (".", vec![]),
            ]
        );
    }

    #[test]
    fn links_become_mark_defs() {
        let blocks = markdown_to_portable_text(
            "According to [recent reports](https://news.example.com/a), see [our guide](https://casevalue.law/blog/x).",
        );
        let b = &blocks[0];
        assert_eq!(b.mark_defs.len(), 2);
        assert_eq!(b.mark_defs[0].href, "https://news.example.com/a");
        let linked = b.children.iter().find(|s| s.text == "recent reports").unwrap();
        assert_eq!(linked.marks, vec![b.mark_defs[0].key.clone()]);
        assert_eq!(b.children.last().unwrap().text, ".");
    }

    #[test]
    fn serializes_with_sanity_field_names() {
        let blocks = markdown_to_portable_text("- item");
        let v = serde_json::to_value(&blocks[0]).unwrap();
        assert_eq!(v["_type"], "block");
        assert_eq!(v["listItem"], "bullet");
        assert_eq!(v["level"], 1);
        assert_eq!(v["children"][0]["_type"], "span");
        assert!(v["markDefs"].as_array().unwrap().is_empty());

        let para = serde_json::to_value(&markdown_to_portable_text("plain")[0]).unwrap();
        assert!(para.get("listItem").is_none());
    }

    #[test]
    fn blank_input_has_no_blocks() {
        assert!(markdown_to_portable_text("\n\n  \n").is_empty());
    }
}
