//! Builds the AST from pulldown-cmark events over normalized text.
//!
//! Component markers arrive as raw HTML events. Block-level markers open and
//! close frames on a per-container stack so a paired component encloses the
//! blocks between its tags; inline markers do the same inside one paragraph.

use std::ops::Range;
use std::sync::LazyLock;

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag};
use regex::Regex;

use docweave_shared::{ConversionWarning, SourceLocation, WarningKind};

use crate::ast::{AstBlock, AstInline, AstListItem, Attribute, Component, InlineStyle};
use crate::normalize::{HtmlPiece, Normalized, TagToken, split_markers};
use crate::tags::TagKind;

static STYLE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^<(/?)\s*(u|ins|b|strong|i|em|s|del|strike)\s*>$").expect("valid regex")
});

static BR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^<br\s*/?>$").expect("valid regex"));

/// Parse normalized text into AST blocks.
pub(crate) fn build(normalized: &Normalized) -> (Vec<AstBlock>, Vec<ConversionWarning>) {
    let events = Parser::new_ext(&normalized.text, Options::ENABLE_STRIKETHROUGH)
        .into_offset_iter()
        .collect();
    let mut builder = Builder {
        events,
        pos: 0,
        source: normalized,
        warnings: Vec::new(),
    };
    let blocks = builder.blocks();
    (blocks, builder.warnings)
}

struct Builder<'a> {
    events: Vec<(Event<'a>, Range<usize>)>,
    pos: usize,
    source: &'a Normalized,
    warnings: Vec<ConversionWarning>,
}

impl<'a> Builder<'a> {
    fn peek(&self) -> Option<&Event<'a>> {
        self.events.get(self.pos).map(|(e, _)| e)
    }

    fn next(&mut self) -> Option<(Event<'a>, Range<usize>)> {
        let item = self.events.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn locate(&self, offset: usize) -> SourceLocation {
        self.source.index.locate(offset)
    }

    fn token(&self, index: usize) -> Option<&'a TagToken> {
        self.source.tags.get(index)
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    /// Blocks up to (and consuming) the end of the current container.
    fn blocks(&mut self) -> Vec<AstBlock> {
        let mut nest: Nest<AstBlock> = Nest::default();

        while let Some(event) = self.peek() {
            if matches!(event, Event::End(_)) {
                self.pos += 1;
                break;
            }
            if starts_inline(event) {
                let location = self
                    .events
                    .get(self.pos)
                    .map_or(SourceLocation::default(), |(_, r)| self.locate(r.start));
                let children = self.inlines(true);
                nest.push(AstBlock::Paragraph { children, location });
                continue;
            }

            let Some((event, range)) = self.next() else {
                break;
            };
            let location = self.locate(range.start);
            match event {
                Event::Start(Tag::Paragraph) => {
                    let children = self.inlines(false);
                    nest.push(AstBlock::Paragraph { children, location });
                }
                Event::Start(Tag::Heading { level, .. }) => {
                    let children = self.inlines(false);
                    nest.push(AstBlock::Heading {
                        level: heading_level_to_u8(level),
                        children,
                        location,
                    });
                }
                Event::Start(Tag::BlockQuote(_)) => {
                    let children = self.blocks();
                    nest.push(AstBlock::BlockQuote { children, location });
                }
                Event::Start(Tag::CodeBlock(kind)) => {
                    let language = match kind {
                        CodeBlockKind::Fenced(info) => info
                            .split_whitespace()
                            .next()
                            .map(str::to_string)
                            .filter(|s| !s.is_empty()),
                        CodeBlockKind::Indented => None,
                    };
                    let mut code = self.collect_text();
                    if code.ends_with('\n') {
                        code.pop();
                    }
                    nest.push(AstBlock::CodeBlock {
                        language,
                        code,
                        location,
                    });
                }
                Event::Start(Tag::List(start)) => {
                    let items = self.list_items();
                    nest.push(AstBlock::List {
                        ordered: start.is_some(),
                        start: start.unwrap_or(1),
                        items,
                        location,
                    });
                }
                Event::Start(Tag::HtmlBlock) => {
                    let html = self.collect_text();
                    self.block_html(&mut nest, &html, location);
                }
                Event::Html(html) => self.block_html(&mut nest, &html, location),
                Event::Rule => nest.push(AstBlock::ThematicBreak { location }),
                Event::Start(_) => {
                    self.skip_container();
                    self.warnings.push(
                        ConversionWarning::new(
                            WarningKind::UnsupportedNode,
                            "unsupported block skipped",
                        )
                        .at(location),
                    );
                }
                _ => {}
            }
        }

        nest.finish(&mut self.warnings)
    }

    fn list_items(&mut self) -> Vec<AstListItem> {
        let mut items = Vec::new();
        while let Some((event, range)) = self.next() {
            match event {
                Event::Start(Tag::Item) => {
                    let location = self.locate(range.start);
                    let children = self.blocks();
                    items.push(AstListItem { children, location });
                }
                Event::End(_) => break,
                _ => {}
            }
        }
        items
    }

    fn block_html(&mut self, nest: &mut Nest<AstBlock>, html: &str, location: SourceLocation) {
        for piece in split_markers(html, self.source.nonce) {
            match piece {
                HtmlPiece::Marker(index) => match self.token(index) {
                    Some(token) => self.apply_tag(nest, token),
                    None => nest.push(AstBlock::Html {
                        html: html.to_string(),
                        location,
                    }),
                },
                HtmlPiece::Raw(raw) if !raw.trim().is_empty() => nest.push(AstBlock::Html {
                    html: raw.trim().to_string(),
                    location,
                }),
                HtmlPiece::Raw(_) => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inlines
    // -----------------------------------------------------------------------

    /// Inline content of the current container.
    ///
    /// With `implicit`, the run has no container of its own (tight list items)
    /// and stops before the next block or container end without consuming it.
    fn inlines(&mut self, implicit: bool) -> Vec<AstInline> {
        let mut nest: Nest<AstInline> = Nest::default();

        while let Some(event) = self.peek() {
            if implicit && !starts_inline(event) {
                break;
            }
            let Some((event, range)) = self.next() else {
                break;
            };
            match event {
                Event::End(_) => break,
                Event::Text(text) => nest.push(AstInline::Text(text.to_string())),
                Event::Code(code) => nest.push(AstInline::Code(code.to_string())),
                Event::SoftBreak => nest.push(AstInline::SoftBreak),
                Event::HardBreak => nest.push(AstInline::LineBreak),
                Event::Start(Tag::Emphasis) => {
                    let children = self.inlines(false);
                    nest.push(AstInline::Styled {
                        style: InlineStyle::Italic,
                        children,
                    });
                }
                Event::Start(Tag::Strong) => {
                    let children = self.inlines(false);
                    nest.push(AstInline::Styled {
                        style: InlineStyle::Bold,
                        children,
                    });
                }
                Event::Start(Tag::Strikethrough) => {
                    let children = self.inlines(false);
                    nest.push(AstInline::Styled {
                        style: InlineStyle::Strikethrough,
                        children,
                    });
                }
                Event::Start(Tag::Link {
                    dest_url, title, ..
                }) => {
                    let location = self.locate(range.start);
                    let children = self.inlines(false);
                    nest.push(AstInline::Link {
                        url: dest_url.to_string(),
                        title: title.to_string(),
                        children,
                        location,
                    });
                }
                Event::Start(Tag::Image { dest_url, .. }) => {
                    let location = self.locate(range.start);
                    let alt = plain_text(&self.inlines(false));
                    nest.push(AstInline::Image {
                        url: dest_url.to_string(),
                        alt,
                        location,
                    });
                }
                Event::InlineHtml(html) | Event::Html(html) => {
                    let location = self.locate(range.start);
                    self.inline_html(&mut nest, &html, location);
                }
                Event::Start(_) => {
                    let children = self.inlines(false);
                    nest.extend(children);
                }
                _ => {}
            }
        }

        nest.finish(&mut self.warnings)
    }

    fn inline_html(&mut self, nest: &mut Nest<AstInline>, html: &str, location: SourceLocation) {
        for piece in split_markers(html, self.source.nonce) {
            match piece {
                HtmlPiece::Marker(index) => match self.token(index) {
                    Some(token) => self.apply_tag(nest, token),
                    None => nest.push(AstInline::RawHtml {
                        html: html.to_string(),
                        location,
                    }),
                },
                HtmlPiece::Raw(raw) => self.inline_raw(nest, raw, location),
            }
        }
    }

    fn inline_raw(&mut self, nest: &mut Nest<AstInline>, raw: &str, location: SourceLocation) {
        let trimmed = raw.trim();
        if BR_RE.is_match(trimmed) {
            nest.push(AstInline::LineBreak);
            return;
        }
        if let Some(caps) = STYLE_TAG_RE.captures(trimmed) {
            let tag = caps[2].to_ascii_lowercase();
            let style = match tag.as_str() {
                "b" | "strong" => InlineStyle::Bold,
                "i" | "em" => InlineStyle::Italic,
                "s" | "del" | "strike" => InlineStyle::Strikethrough,
                _ => InlineStyle::Underline,
            };
            if caps[1].is_empty() {
                nest.open(Frame::Style {
                    style,
                    tag,
                    location,
                });
            } else if !nest.close(
                |f| matches!(f, Frame::Style { tag: t, .. } if *t == tag),
                None,
                &mut self.warnings,
            ) {
                self.warnings.push(
                    ConversionWarning::new(
                        WarningKind::UnmatchedTag,
                        format!("closing </{tag}> has no opening tag"),
                    )
                    .at(location),
                );
            }
            return;
        }
        if !raw.is_empty() {
            nest.push(AstInline::RawHtml {
                html: raw.to_string(),
                location,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// Open, close, or emit a component for `token` in `nest`.
    fn apply_tag<C: Nested>(&mut self, nest: &mut Nest<C>, token: &TagToken) {
        match token.tag.kind {
            TagKind::SelfClosing => nest.push(C::component(Component {
                name: token.tag.name.clone(),
                attributes: token.tag.attributes.clone(),
                children: Vec::new(),
                location: token.location,
                open_source: token.source.clone(),
                close_source: None,
            })),
            TagKind::Open => nest.open(Frame::Component {
                name: token.tag.name.clone(),
                attributes: token.tag.attributes.clone(),
                location: token.location,
                open_source: token.source.clone(),
            }),
            TagKind::Close => {
                let name = &token.tag.name;
                let closed = nest.close(
                    |f| matches!(f, Frame::Component { name: n, .. } if n == name),
                    Some(token.source.clone()),
                    &mut self.warnings,
                );
                if !closed {
                    self.warnings.push(
                        ConversionWarning::new(
                            WarningKind::UnmatchedTag,
                            format!("closing </{name}> has no opening tag in this block"),
                        )
                        .at(token.location),
                    );
                }
            }
        }
    }

    /// Concatenated text events up to the end of the current container.
    fn collect_text(&mut self) -> String {
        let mut out = String::new();
        while let Some((event, _)) = self.next() {
            match event {
                Event::End(_) => break,
                Event::Text(t) | Event::Html(t) => out.push_str(&t),
                _ => {}
            }
        }
        out
    }

    fn skip_container(&mut self) {
        let mut depth = 1usize;
        while let Some((event, _)) = self.next() {
            match event {
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
        }
    }
}

fn starts_inline(event: &Event<'_>) -> bool {
    match event {
        Event::Text(_)
        | Event::Code(_)
        | Event::InlineHtml(_)
        | Event::SoftBreak
        | Event::HardBreak
        | Event::FootnoteReference(_) => true,
        Event::Start(tag) => matches!(
            tag,
            Tag::Emphasis
                | Tag::Strong
                | Tag::Strikethrough
                | Tag::Link { .. }
                | Tag::Image { .. }
        ),
        _ => false,
    }
}

fn heading_level_to_u8(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Concatenated text of inline nodes, used for image alt text.
pub(crate) fn plain_text(nodes: &[AstInline]) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            AstInline::Text(t) | AstInline::Code(t) => out.push_str(t),
            AstInline::Styled { children, .. } | AstInline::Link { children, .. } => {
                out.push_str(&plain_text(children))
            }
            AstInline::Component(c) => out.push_str(&plain_text(&c.children)),
            AstInline::Image { alt, .. } => out.push_str(alt),
            AstInline::SoftBreak => out.push(' '),
            AstInline::LineBreak => out.push('\n'),
            AstInline::RawHtml { .. } => {}
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Frame stack
// ---------------------------------------------------------------------------

/// Node types that can hold component frames.
trait Nested: Sized {
    fn component(component: Component<Self>) -> Self;
    fn styled(style: InlineStyle, children: Vec<Self>) -> Vec<Self>;
}

impl Nested for AstBlock {
    fn component(component: Component<Self>) -> Self {
        AstBlock::Component(component)
    }

    fn styled(_style: InlineStyle, children: Vec<Self>) -> Vec<Self> {
        children
    }
}

impl Nested for AstInline {
    fn component(component: Component<Self>) -> Self {
        AstInline::Component(component)
    }

    fn styled(style: InlineStyle, children: Vec<Self>) -> Vec<Self> {
        vec![AstInline::Styled { style, children }]
    }
}

enum Frame {
    Component {
        name: String,
        attributes: Vec<Attribute>,
        location: SourceLocation,
        open_source: String,
    },
    Style {
        style: InlineStyle,
        tag: String,
        location: SourceLocation,
    },
}

struct Nest<C> {
    root: Vec<C>,
    open: Vec<(Frame, Vec<C>)>,
}

impl<C> Default for Nest<C> {
    fn default() -> Self {
        Self {
            root: Vec::new(),
            open: Vec::new(),
        }
    }
}

impl<C: Nested> Nest<C> {
    fn push(&mut self, node: C) {
        match self.open.last_mut() {
            Some((_, children)) => children.push(node),
            None => self.root.push(node),
        }
    }

    fn extend(&mut self, nodes: Vec<C>) {
        for node in nodes {
            self.push(node);
        }
    }

    fn open(&mut self, frame: Frame) {
        self.open.push((frame, Vec::new()));
    }

    /// Close the innermost frame matching `matches`, closing any frames
    /// opened after it. Returns `false` if no frame matches.
    fn close(
        &mut self,
        matches: impl Fn(&Frame) -> bool,
        close_source: Option<String>,
        warnings: &mut Vec<ConversionWarning>,
    ) -> bool {
        let Some(depth) = self.open.iter().rposition(|(f, _)| matches(f)) else {
            return false;
        };
        while self.open.len() > depth + 1 {
            self.pop_unclosed(warnings);
        }
        if let Some((frame, children)) = self.open.pop() {
            let nodes = into_nodes(frame, children, close_source);
            self.extend(nodes);
        }
        true
    }

    fn pop_unclosed(&mut self, warnings: &mut Vec<ConversionWarning>) {
        let Some((frame, children)) = self.open.pop() else {
            return;
        };
        let (label, location) = match &frame {
            Frame::Component { name, location, .. } => (name.clone(), *location),
            Frame::Style { tag, location, .. } => (tag.clone(), *location),
        };
        warnings.push(
            ConversionWarning::new(
                WarningKind::UnclosedTag,
                format!("<{label}> is not closed before the end of its block"),
            )
            .at(location),
        );
        let nodes = into_nodes(frame, children, None);
        self.extend(nodes);
    }

    fn finish(mut self, warnings: &mut Vec<ConversionWarning>) -> Vec<C> {
        while !self.open.is_empty() {
            self.pop_unclosed(warnings);
        }
        self.root
    }
}

fn into_nodes<C: Nested>(frame: Frame, children: Vec<C>, close_source: Option<String>) -> Vec<C> {
    match frame {
        Frame::Component {
            name,
            attributes,
            location,
            open_source,
        } => vec![C::component(Component {
            name,
            attributes,
            children,
            location,
            open_source,
            close_source,
        })],
        Frame::Style { style, .. } => C::styled(style, children),
    }
}
