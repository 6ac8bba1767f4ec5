//! Source passes that run before Markdown parsing.
//!
//! Component tags are not valid HTML in general (`{...}` attribute values,
//! dotted names), so every tag found outside code is replaced by a short
//! marker element that the Markdown parser always reports as raw HTML. The
//! scanned tags are kept in a side table indexed by the marker. The marker
//! name carries a nonce that does not occur in the body, so marker-like text
//! written by the author stays ordinary HTML.
//!
//! Lines holding nothing but component tags are isolated with blank lines so
//! that a paired component can enclose ordinary Markdown blocks.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use docweave_shared::{ConversionWarning, SourceLocation, WarningKind};

use crate::tags::{ScannedTag, TagKind, scan_tag, starts_component_tag};

/// A component tag lifted out of the source.
#[derive(Debug, Clone, PartialEq)]
pub struct TagToken {
    pub tag: ScannedTag,
    /// Literal source text of the tag.
    pub source: String,
    pub location: SourceLocation,
}

/// Normalized body text plus what is needed to map it back to the source.
#[derive(Debug)]
pub(crate) struct Normalized {
    pub text: String,
    /// Marker nonce for this body; see [`split_markers`].
    pub nonce: u32,
    pub tags: Vec<TagToken>,
    pub index: LineIndex,
    pub warnings: Vec<ConversionWarning>,
}

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<dw-m(\d+) i="(\d+)"/>"#).expect("valid regex"));

static LIST_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}(?:[-+*]|\d{1,9}[.)])(?:\s|$)").expect("valid regex"));

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}(`{3,}|~{3,})").expect("valid regex"));

fn marker(nonce: u32, index: usize) -> String {
    format!(r#"<dw-m{nonce} i="{index}"/>"#)
}

/// Smallest nonce whose marker name never appears in `body`.
fn pick_nonce(body: &str) -> u32 {
    (0..)
        .find(|n| !body.contains(&format!("<dw-m{n} ")))
        .unwrap_or_default()
}

/// A piece of raw HTML split around markers.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HtmlPiece<'a> {
    Marker(usize),
    Raw(&'a str),
}

/// Split raw HTML text into this body's markers and the HTML between them.
/// Marker-shaped text with another nonce is left in the raw pieces.
pub(crate) fn split_markers(html: &str, nonce: u32) -> Vec<HtmlPiece<'_>> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for caps in MARKER_RE.captures_iter(html) {
        let Some(whole) = caps.get(0) else { continue };
        if caps[1].parse::<u32>().ok() != Some(nonce) {
            continue;
        }
        let Ok(index) = caps[2].parse::<usize>() else {
            continue;
        };
        if whole.start() > last {
            pieces.push(HtmlPiece::Raw(&html[last..whole.start()]));
        }
        pieces.push(HtmlPiece::Marker(index));
        last = whole.end();
    }
    if last < html.len() {
        pieces.push(HtmlPiece::Raw(&html[last..]));
    }
    pieces
}

/// The line holds at least one marker and nothing else but whitespace.
fn is_tag_only(text: &str, nonce: u32) -> bool {
    let pieces = split_markers(text, nonce);
    pieces.iter().any(|p| matches!(p, HtmlPiece::Marker(_)))
        && pieces.iter().all(|p| match p {
            HtmlPiece::Marker(_) => true,
            HtmlPiece::Raw(raw) => raw.trim().is_empty(),
        })
}

struct Fence {
    ch: char,
    len: usize,
}

/// Rewrite `body` (which starts on source line `first_line`).
pub(crate) fn normalize(body: &str, first_line: usize) -> Normalized {
    let mut out = Output::default();
    let mut tags: Vec<TagToken> = Vec::new();
    let mut warnings = Vec::new();
    let nonce = pick_nonce(body);
    // Backtick run of a code span still open at the end of the previous line.
    let mut open_span: Option<usize> = None;

    let mut fence: Option<Fence> = None;
    let mut prev_blank = true;
    let mut in_indented_code = false;
    let mut list_context = false;
    let mut pos = 0;
    let mut line_no = first_line;

    while pos < body.len() {
        let line_end = next_line_end(body, pos);
        let line = &body[pos..line_end];
        let content = line.trim_end_matches(['\n', '\r']);
        let indent = indent_width(content);
        let blank = content.trim().is_empty();

        if let Some(f) = &fence {
            if closes_fence(f, content) {
                fence = None;
            }
            out.push(content, line_no);
            pos = line_end;
            line_no += 1;
            prev_blank = blank;
            continue;
        }

        if indent < 4 {
            if let Some(caps) = FENCE_RE.captures(content) {
                open_span = None;
                let run = &caps[1];
                fence = Some(Fence {
                    ch: run.chars().next().unwrap_or('`'),
                    len: run.len(),
                });
                out.push(content, line_no);
                pos = line_end;
                line_no += 1;
                prev_blank = false;
                continue;
            }
        }

        if !blank && indent >= 4 && (in_indented_code || (prev_blank && !list_context)) {
            open_span = None;
            in_indented_code = true;
            out.push(content, line_no);
            pos = line_end;
            line_no += 1;
            prev_blank = false;
            continue;
        }

        if blank {
            open_span = None;
            out.push(content, line_no);
            pos = line_end;
            line_no += 1;
            prev_blank = true;
            continue;
        }

        in_indented_code = false;
        if LIST_MARKER_RE.is_match(content) {
            list_context = true;
        } else if indent == 0 {
            list_context = false;
        }

        let mut state = LineState {
            nonce,
            open_span: &mut open_span,
            tags: &mut tags,
            warnings: &mut warnings,
        };
        let rewritten = rewrite_line(body, pos, line_no, &mut state);
        if is_tag_only(&rewritten.text, nonce) {
            let text = if list_context {
                rewritten.text.as_str()
            } else {
                rewritten.text.trim_start()
            };
            out.push_isolated(text, line_no);
        } else {
            out.push(&rewritten.text, line_no);
        }

        pos = rewritten.end;
        line_no += rewritten.lines;
        prev_blank = false;
    }

    warnings.extend(check_balance(&tags));

    Normalized {
        index: LineIndex::new(&out.text, out.line_map),
        text: out.text,
        nonce,
        tags,
        warnings,
    }
}

#[derive(Default)]
struct Output {
    text: String,
    line_map: Vec<usize>,
    last_blank: bool,
    blank_after: bool,
}

impl Output {
    fn push(&mut self, content: &str, line_no: usize) {
        let blank = content.trim().is_empty();
        if self.blank_after && !blank {
            self.raw_line("", line_no);
        }
        self.blank_after = false;
        self.raw_line(content, line_no);
    }

    fn push_isolated(&mut self, content: &str, line_no: usize) {
        if !self.text.is_empty() && !self.last_blank {
            self.raw_line("", line_no);
        }
        self.raw_line(content, line_no);
        self.blank_after = true;
    }

    fn raw_line(&mut self, content: &str, line_no: usize) {
        self.text.push_str(content);
        self.text.push('\n');
        self.line_map.push(line_no);
        self.last_blank = content.trim().is_empty();
    }
}

struct Rewritten {
    text: String,
    /// Byte offset just past the last consumed line.
    end: usize,
    /// Source lines consumed (more than one when a tag spans lines).
    lines: usize,
}

/// Scanner state carried from line to line.
struct LineState<'s> {
    nonce: u32,
    open_span: &'s mut Option<usize>,
    tags: &'s mut Vec<TagToken>,
    warnings: &'s mut Vec<ConversionWarning>,
}

/// Replace component tags on the line starting at `start` with markers.
fn rewrite_line(body: &str, start: usize, line_no: usize, state: &mut LineState<'_>) -> Rewritten {
    let mut text = String::new();
    let mut line_end = next_line_end(body, start);
    let mut cur_line = line_no;
    let mut cur_line_start = start;
    let mut i = start;

    if let Some(run) = *state.open_span {
        match find_closing_ticks(&body[start..line_end], run, false) {
            Some(at) => {
                text.push_str(&body[start..start + at + run]);
                i = start + at + run;
                *state.open_span = None;
            }
            None => {
                text.push_str(body[start..line_end].trim_end_matches(['\n', '\r']));
                return Rewritten {
                    text,
                    end: line_end,
                    lines: 1,
                };
            }
        }
    }

    while i < line_end {
        let rest = &body[i..line_end];
        let Some(c) = rest.chars().next() else { break };
        if c == '\n' || c == '\r' {
            i += 1;
            continue;
        }

        if c == '\\' {
            let len = match rest[1..].chars().next() {
                Some(next) if next != '\n' && next != '\r' => 1 + next.len_utf8(),
                _ => 1,
            };
            text.push_str(&rest[..len]);
            i += len;
            continue;
        }

        if c == '`' {
            let run = rest.chars().take_while(|&ch| ch == '`').count();
            if let Some(at) = find_closing_ticks(&rest[run..], run, false) {
                text.push_str(&rest[..run + at + run]);
                i += run + at + run;
                continue;
            }
            if find_closing_ticks(&body[i + run..], run, true).is_some() {
                // The span closes on a later line of this paragraph.
                text.push_str(rest.trim_end_matches(['\n', '\r']));
                *state.open_span = Some(run);
                i = line_end;
                continue;
            }
            text.push_str(&rest[..run]);
            i += run;
            continue;
        }

        if c == '<' && starts_component_tag(rest) {
            let location = SourceLocation::new(cur_line, column_of(body, cur_line_start, i));
            match scan_tag(&body[i..]) {
                Some((tag, len)) => {
                    let source = &body[i..i + len];
                    let newlines = source.matches('\n').count();
                    if newlines > 0 {
                        cur_line += newlines;
                        cur_line_start = i + source.rfind('\n').map_or(0, |p| p + 1);
                    }
                    text.push_str(&marker(state.nonce, state.tags.len()));
                    state.tags.push(TagToken {
                        tag,
                        source: source.to_string(),
                        location,
                    });
                    i += len;
                    if i > line_end || newlines > 0 {
                        line_end = next_line_end(body, i);
                    }
                }
                None => {
                    state.warnings.push(
                        ConversionWarning::new(
                            WarningKind::TagBalance,
                            "malformed component tag kept as text",
                        )
                        .at(location),
                    );
                    text.push('<');
                    i += 1;
                }
            }
            continue;
        }

        text.push(c);
        i += c.len_utf8();
    }

    Rewritten {
        text,
        end: line_end,
        lines: cur_line - line_no + 1,
    }
}

/// Offset of a backtick run of exactly `run` ticks in `s`. The search stops
/// at the end of the line, or with `multiline` at the end of the paragraph.
fn find_closing_ticks(s: &str, run: usize, multiline: bool) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                if !multiline {
                    return None;
                }
                let next = &s[i + 1..];
                let next_line = next.split('\n').next().unwrap_or_default();
                if next_line.trim().is_empty() {
                    return None;
                }
                i += 1;
            }
            b'`' => {
                let len = bytes[i..].iter().take_while(|&&b| b == b'`').count();
                if len == run {
                    return Some(i);
                }
                i += len;
            }
            _ => i += 1,
        }
    }
    None
}

/// Warn for every component name whose open and close tags do not pair up.
pub(crate) fn check_balance(tags: &[TagToken]) -> Vec<ConversionWarning> {
    let mut counts: BTreeMap<&str, (usize, usize, SourceLocation)> = BTreeMap::new();
    for token in tags {
        let entry = counts
            .entry(token.tag.name.as_str())
            .or_insert((0, 0, token.location));
        match token.tag.kind {
            TagKind::Open => entry.0 += 1,
            TagKind::Close => entry.1 += 1,
            TagKind::SelfClosing => {
                entry.0 += 1;
                entry.1 += 1;
            }
        }
    }

    counts
        .into_iter()
        .filter(|(_, (open, close, _))| open != close)
        .map(|(name, (open, close, first))| {
            ConversionWarning::new(
                WarningKind::TagBalance,
                format!("<{name}> has {open} opening and {close} closing tags"),
            )
            .at(first)
        })
        .collect()
}

fn next_line_end(s: &str, from: usize) -> usize {
    s[from..].find('\n').map_or(s.len(), |i| from + i + 1)
}

fn indent_width(line: &str) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width += 4 - width % 4,
            _ => break,
        }
    }
    width
}

fn closes_fence(fence: &Fence, line: &str) -> bool {
    let trimmed = line.trim_start();
    indent_width(line) < 4
        && trimmed.chars().take_while(|&c| c == fence.ch).count() >= fence.len
        && trimmed.trim_start_matches(fence.ch).trim().is_empty()
}

fn column_of(s: &str, line_start: usize, at: usize) -> usize {
    s[line_start..at].chars().count() + 1
}

// ---------------------------------------------------------------------------
// LineIndex
// ---------------------------------------------------------------------------

/// Maps byte offsets in normalized text to original source positions.
#[derive(Debug, Clone)]
pub(crate) struct LineIndex {
    starts: Vec<usize>,
    line_map: Vec<usize>,
    text: String,
}

impl LineIndex {
    fn new(text: &str, line_map: Vec<usize>) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self {
            starts,
            line_map,
            text: text.to_string(),
        }
    }

    pub fn locate(&self, offset: usize) -> SourceLocation {
        let idx = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line = self
            .line_map
            .get(idx)
            .or_else(|| self.line_map.last())
            .copied()
            .unwrap_or(1);
        let start = self.starts.get(idx).copied().unwrap_or(0);
        let end = offset.min(self.text.len()).max(start);
        let column = self
            .text
            .get(start..end)
            .map_or(1, |s| s.chars().count() + 1);
        SourceLocation::new(line, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolates_tag_only_lines() {
        let body = "Intro\n<Note>\nInside **bold**\n</Note>\nOutro\n";
        let n = normalize(body, 1);
        assert_eq!(
            n.text,
            "Intro\n\n<dw-m0 i=\"0\"/>\n\nInside **bold**\n\n<dw-m0 i=\"1\"/>\n\nOutro\n"
        );
        assert_eq!(n.tags.len(), 2);
        assert_eq!(n.tags[0].tag.name, "Note");
        assert_eq!(n.tags[0].location, SourceLocation::new(2, 1));
        assert_eq!(n.tags[1].tag.kind, TagKind::Close);
        assert!(n.warnings.is_empty());
    }

    #[test]
    fn inline_tags_stay_in_their_line() {
        let n = normalize("Call <Phone /> now\n", 5);
        assert_eq!(n.text, "Call <dw-m0 i=\"0\"/> now\n");
        assert_eq!(n.tags[0].location, SourceLocation::new(5, 6));
        assert_eq!(n.tags[0].source, "<Phone />");
    }

    #[test]
    fn code_is_left_alone() {
        let body = "```\n<Note />\n```\n\nUse `<Note />` here\n\n    <Indented />\n";
        let n = normalize(body, 1);
        assert!(n.tags.is_empty());
        assert_eq!(n.text, body);
    }

    #[test]
    fn multi_line_tag_maps_following_lines() {
        let body = "<Card\n  title=\"A\"\n/>\nafter\n";
        let n = normalize(body, 1);
        assert_eq!(n.tags.len(), 1);
        assert_eq!(n.text, "<dw-m0 i=\"0\"/>\n\nafter\n");
        let after = n.text.find("after").expect("after");
        assert_eq!(n.index.locate(after), SourceLocation::new(4, 1));
    }

    #[test]
    fn balance_mismatch_is_reported() {
        let n = normalize("<Note>\n\ntext\n", 1);
        assert_eq!(n.warnings.len(), 1);
        assert_eq!(n.warnings[0].kind, WarningKind::TagBalance);
        assert!(n.warnings[0].message.contains("<Note> has 1 opening and 0 closing"));
    }

    #[test]
    fn malformed_tag_is_kept_as_text() {
        let n = normalize("a <Broken attr=oops> b\n", 1);
        assert!(n.tags.is_empty());
        assert_eq!(n.text, "a <Broken attr=oops> b\n");
        assert_eq!(n.warnings.len(), 1);
    }

    #[test]
    fn split_markers_keeps_surrounding_html() {
        let pieces = split_markers("<div><dw-m0 i=\"3\"/></div>", 0);
        assert_eq!(
            pieces,
            vec![
                HtmlPiece::Raw("<div>"),
                HtmlPiece::Marker(3),
                HtmlPiece::Raw("</div>")
            ]
        );
    }

    #[test]
    fn author_written_marker_stays_literal() {
        let body = "Text <dw-m0 i=\"0\"/> and <Phone />\n";
        let n = normalize(body, 1);
        assert_eq!(n.nonce, 1);
        assert_eq!(n.tags.len(), 1);
        assert_eq!(n.text, "Text <dw-m0 i=\"0\"/> and <dw-m1 i=\"0\"/>\n");
        assert_eq!(
            split_markers(&n.text, n.nonce),
            vec![
                HtmlPiece::Raw("Text <dw-m0 i=\"0\"/> and "),
                HtmlPiece::Marker(0),
                HtmlPiece::Raw("\n"),
            ]
        );
    }

    #[test]
    fn author_marker_line_is_not_isolated() {
        let n = normalize("<dw-m0 i=\"5\"/>\n", 1);
        assert!(n.tags.is_empty());
        assert_eq!(n.text, "<dw-m0 i=\"5\"/>\n");
    }

    #[test]
    fn code_span_across_lines_is_left_alone() {
        let body = "Use `x\n<Note />` here <Phone />\n\nAn `unclosed\n\n<Tabs />\n";
        let n = normalize(body, 1);
        let names: Vec<_> = n.tags.iter().map(|t| t.tag.name.as_str()).collect();
        assert_eq!(names, ["Phone", "Tabs"]);
        assert!(n.text.starts_with("Use `x\n<Note />` here <dw-m0 i=\"0\"/>\n"));
    }
}
