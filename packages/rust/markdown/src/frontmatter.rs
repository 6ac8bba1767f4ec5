//! Front-matter header parsing.
//!
//! The header is a restricted `key: value` format between `---` lines:
//!
//! ```text
//! ---
//! title: "Getting started"
//! tags:
//!   - intro
//!   - setup
//! summary: |
//!   First line.
//!   Second line.
//! ---
//! ```
//!
//! Multi-line values need an explicit `|` (keep newlines) or `>` (fold) marker.
//! A key with an empty value that is not followed by `- item` lines is an
//! empty string.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use docweave_shared::{ConversionWarning, SourceLocation, WarningKind};

/// Parsed header values, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FrontMatter {
    entries: BTreeMap<String, FrontMatterValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FrontMatterValue {
    Text(String),
    List(Vec<String>),
}

impl FrontMatter {
    pub fn get(&self, key: &str) -> Option<&FrontMatterValue> {
        self.entries.get(key)
    }

    /// Text value for `key`, if it is a text value.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(FrontMatterValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn list(&self, key: &str) -> Option<&[String]> {
        match self.entries.get(key) {
            Some(FrontMatterValue::List(items)) => Some(items),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FrontMatterValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Result of separating the header from the body.
#[derive(Debug)]
pub(crate) struct Split<'a> {
    pub front_matter: FrontMatter,
    pub body: &'a str,
    /// 1-based source line on which `body` starts.
    pub body_line: usize,
    /// The header was opened but never closed.
    pub unterminated: bool,
    pub warnings: Vec<ConversionWarning>,
}

/// Separate an optional front-matter header from `source`.
pub(crate) fn split(source: &str) -> Split<'_> {
    let mut lines = source.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return no_header(source);
    };
    if first.trim_end() != "---" {
        return no_header(source);
    }

    let mut offset = first.len();
    let mut header_lines: Vec<(usize, &str)> = Vec::new();
    for (idx, line) in lines.enumerate() {
        let line_no = idx + 2;
        let content = line.trim_end_matches(['\n', '\r']);
        if content == "---" || content == "..." {
            let (front_matter, warnings) = parse_header(&header_lines);
            return Split {
                front_matter,
                body: &source[offset + line.len()..],
                body_line: line_no + 1,
                unterminated: false,
                warnings,
            };
        }
        header_lines.push((line_no, content));
        offset += line.len();
    }

    Split {
        front_matter: FrontMatter::default(),
        body: source,
        body_line: 1,
        unterminated: true,
        warnings: vec![
            ConversionWarning::new(
                WarningKind::FrontMatter,
                "front matter is never closed; treating the whole input as body",
            )
            .at(SourceLocation::new(1, 1)),
        ],
    }
}

fn no_header(source: &str) -> Split<'_> {
    Split {
        front_matter: FrontMatter::default(),
        body: source,
        body_line: 1,
        unterminated: false,
        warnings: Vec::new(),
    }
}

static KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_][A-Za-z0-9_.-]*)\s*:(?:\s+(.*?))?\s*$").expect("valid regex")
});

static LIST_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*-(?:\s+(.*?))?\s*$").expect("valid regex"));

enum Pending {
    /// Key with an empty value: a list if `- item` lines follow, else empty text.
    Open { key: String, items: Vec<String> },
    /// Explicit `|` / `>` block.
    Block {
        key: String,
        folded: bool,
        lines: Vec<String>,
        indent: Option<usize>,
    },
}

fn parse_header(lines: &[(usize, &str)]) -> (FrontMatter, Vec<ConversionWarning>) {
    let mut entries: BTreeMap<String, FrontMatterValue> = BTreeMap::new();
    let mut warnings = Vec::new();
    let mut pending: Option<Pending> = None;

    let mut insert = |key: String,
                      value: FrontMatterValue,
                      line: usize,
                      warnings: &mut Vec<ConversionWarning>| {
        if entries.insert(key.clone(), value).is_some() {
            warnings.push(
                ConversionWarning::new(
                    WarningKind::FrontMatter,
                    format!("duplicate front matter key `{key}`; the last value wins"),
                )
                .at(SourceLocation::new(line, 1)),
            );
        }
    };

    for &(line_no, line) in lines {
        match pending.take() {
            Some(Pending::Block {
                key,
                folded,
                mut lines,
                indent,
            }) => {
                // Indentation is ASCII space/tab only, so `cut` is a char boundary.
                let line_indent = line.len() - line.trim_start_matches([' ', '\t']).len();
                let blank = line.trim().is_empty();
                if blank || line_indent > 0 {
                    let indent = indent.or((!blank).then_some(line_indent));
                    let cut = indent.unwrap_or(0).min(line_indent);
                    lines.push(if blank {
                        String::new()
                    } else {
                        line[cut..].to_string()
                    });
                    pending = Some(Pending::Block {
                        key,
                        folded,
                        lines,
                        indent,
                    });
                    continue;
                }
                insert(key, finish_block(&lines, folded), line_no, &mut warnings);
            }
            Some(Pending::Open { key, mut items }) => {
                if let Some(caps) = LIST_ITEM_RE.captures(line) {
                    let item = caps.get(1).map_or("", |m| m.as_str());
                    items.push(unquote(item));
                    pending = Some(Pending::Open { key, items });
                    continue;
                }
                if line.trim().is_empty() {
                    pending = Some(Pending::Open { key, items });
                    continue;
                }
                insert(key, finish_open(items), line_no, &mut warnings);
            }
            None => {}
        }

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some(caps) = KEY_RE.captures(line) else {
            warnings.push(
                ConversionWarning::new(
                    WarningKind::FrontMatter,
                    format!("unparseable front matter line: {trimmed}"),
                )
                .at(SourceLocation::new(line_no, 1)),
            );
            continue;
        };

        let key = caps[1].to_string();
        let value = caps.get(2).map_or("", |m| m.as_str());
        match value {
            "" => {
                pending = Some(Pending::Open {
                    key,
                    items: Vec::new(),
                })
            }
            "|" | "|-" | ">" | ">-" => {
                pending = Some(Pending::Block {
                    key,
                    folded: value.starts_with('>'),
                    lines: Vec::new(),
                    indent: None,
                })
            }
            v if v.starts_with('[') && v.ends_with(']') => {
                let items = v[1..v.len() - 1]
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(unquote)
                    .collect();
                insert(key, FrontMatterValue::List(items), line_no, &mut warnings);
            }
            v => insert(key, FrontMatterValue::Text(unquote(v)), line_no, &mut warnings),
        }
    }

    let last_line = lines.last().map_or(1, |(n, _)| *n);
    match pending {
        Some(Pending::Block {
            key, folded, lines, ..
        }) => insert(key, finish_block(&lines, folded), last_line, &mut warnings),
        Some(Pending::Open { key, items }) => {
            insert(key, finish_open(items), last_line, &mut warnings)
        }
        None => {}
    }

    (FrontMatter { entries }, warnings)
}

fn finish_open(items: Vec<String>) -> FrontMatterValue {
    if items.is_empty() {
        FrontMatterValue::Text(String::new())
    } else {
        FrontMatterValue::List(items)
    }
}

fn finish_block(lines: &[String], folded: bool) -> FrontMatterValue {
    let end = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map_or(0, |i| i + 1);
    let lines = &lines[..end];
    let text = if folded {
        lines
            .iter()
            .map(|l| l.trim())
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        lines.join("\n")
    };
    FrontMatterValue::Text(text)
}

fn unquote(value: &str) -> String {
    let v = value.trim();
    for q in ['"', '\''] {
        if v.len() >= 2 && v.starts_with(q) && v.ends_with(q) {
            return v[1..v.len() - 1].to_string();
        }
    }
    v.to_string()
}
