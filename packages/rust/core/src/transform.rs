//! AST to output tree.
//!
//! Walks the parser's AST once and builds a [`Document`]. Custom tags are
//! dispatched through [`crate::extract`]; everything else maps directly.
//! The pass is pure: it never touches the data store, so placeholders that
//! need external ids leave with a pending [`docweave_shared::SymbolicRef`].

use std::mem;

use tracing::debug;
use url::Url;

use docweave_markdown::{AstBlock, AstInline, AstListItem, Component, InlineStyle};
use docweave_shared::{
    BlockNode, ConversionError, ConversionWarning, Document, FieldValue, InlineNode, List,
    ListItem, ListItemChild, ListKind, Placeholder, Result, SourceLocation, TextFormat,
    UnhandledComponent, WarningKind, inline_text,
};

use crate::extract::{self, Extraction, Invocation, Placement};
use crate::registry::Registry;

/// Output of [`transform`].
#[derive(Debug, Clone)]
pub struct Transformed {
    pub document: Document,
    pub warnings: Vec<ConversionWarning>,
    /// Tags with no usable registry entry, in first-seen order.
    pub unhandled: Vec<UnhandledComponent>,
}

/// Convert parsed blocks into an output document.
///
/// Unhandled components are always kept as literal text and recorded. In
/// strict mode no warning is added for them because the caller rejects the
/// document anyway.
pub fn transform(
    document: &str,
    blocks: &[AstBlock],
    registry: &Registry,
    strict: bool,
) -> Result<Transformed> {
    let mut transformer = Transformer {
        document,
        registry,
        strict,
        warnings: Vec::new(),
        unhandled: Vec::new(),
    };
    let children = transformer.root(blocks)?;

    debug!(
        document,
        blocks = children.len(),
        warnings = transformer.warnings.len(),
        unhandled = transformer.unhandled.len(),
        "transform complete"
    );

    Ok(Transformed {
        document: Document { children },
        warnings: transformer.warnings,
        unhandled: transformer.unhandled,
    })
}

/// Inline-level output: either a node that stays in the run, or a block that
/// splits it.
enum Piece {
    Inline(InlineNode),
    Block(BlockNode),
}

struct Transformer<'a> {
    document: &'a str,
    registry: &'a Registry,
    strict: bool,
    warnings: Vec<ConversionWarning>,
    unhandled: Vec<UnhandledComponent>,
}

impl Transformer<'_> {
    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    fn root(&mut self, blocks: &[AstBlock]) -> Result<Vec<BlockNode>> {
        let mut out = Vec::new();
        let mut hoisted = Vec::new();
        for block in blocks {
            self.block(block, &mut out, &mut hoisted, true)?;
            out.append(&mut hoisted);
        }
        Ok(out)
    }

    /// Convert one block into `out`. Placeholders that cannot live where they
    /// were found go to `hoisted`; at the top level the caller flushes
    /// `hoisted` right after each block.
    fn block(
        &mut self,
        block: &AstBlock,
        out: &mut Vec<BlockNode>,
        hoisted: &mut Vec<BlockNode>,
        top: bool,
    ) -> Result<()> {
        match block {
            AstBlock::Heading {
                level,
                children,
                location,
            } => {
                if !(1..=6).contains(level) {
                    return Err(ConversionError::transform(
                        self.document,
                        *location,
                        format!("heading level {level} is outside 1-6"),
                    ));
                }
                let mut inline = Vec::new();
                for piece in self.inlines(children, TextFormat::PLAIN)? {
                    match piece {
                        Piece::Inline(node) => inline.push(node),
                        Piece::Block(node) => {
                            self.warn_at(
                                WarningKind::HoistedBlock,
                                "block component inside a heading moved after it",
                                *location,
                            );
                            hoisted.push(node);
                        }
                    }
                }
                out.push(BlockNode::Heading {
                    level: *level,
                    children: trim_edges(merge_text(inline)),
                });
            }
            AstBlock::Paragraph { children, .. } => {
                let pieces = self.inlines(children, TextFormat::PLAIN)?;
                split_paragraph(pieces, out);
            }
            AstBlock::List {
                ordered,
                start,
                items,
                location,
            } => {
                let list = self.list(*ordered, *start, items, *location, hoisted)?;
                out.push(BlockNode::List(list));
            }
            AstBlock::BlockQuote { children, location } => {
                let mut inner = Vec::new();
                for child in children {
                    self.block(child, &mut inner, hoisted, false)?;
                }
                let children = self
                    .fold(inner, false, "quote", *location, hoisted)
                    .into_iter()
                    .filter_map(|child| match child {
                        ListItemChild::Inline(node) => Some(node),
                        ListItemChild::List(_) => None,
                    })
                    .collect();
                out.push(BlockNode::Quote { children });
            }
            AstBlock::CodeBlock { language, code, .. } => {
                let language = language
                    .as_deref()
                    .map_or(serde_json::Value::Null, |l| l.into());
                out.push(BlockNode::Block(
                    Placeholder::new("code")
                        .with_field("code", code.as_str())
                        .with_field("language", language),
                ));
            }
            AstBlock::ThematicBreak { location } => {
                self.warn_at(
                    WarningKind::UnsupportedNode,
                    "thematic break has no output counterpart and was dropped",
                    *location,
                );
            }
            AstBlock::Html { html, location } => {
                if !is_comment(html) {
                    self.warn_at(
                        WarningKind::UnsupportedNode,
                        format!("raw HTML block dropped: {}", excerpt(html)),
                        *location,
                    );
                }
            }
            AstBlock::Component(component) => {
                self.block_component(component, out, hoisted, top)?;
            }
        }
        Ok(())
    }

    fn list(
        &mut self,
        ordered: bool,
        start: u64,
        items: &[AstListItem],
        location: SourceLocation,
        hoisted: &mut Vec<BlockNode>,
    ) -> Result<List> {
        let mut converted = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let mut inner = Vec::new();
            for child in &item.children {
                self.block(child, &mut inner, hoisted, false)?;
            }
            let index = index as u64;
            converted.push(ListItem {
                value: if ordered { start + index } else { index + 1 },
                children: self.fold(inner, true, "list item", item.location, hoisted),
            });
        }
        debug!(items = converted.len(), ordered, line = location.line, "list converted");
        Ok(List {
            kind: if ordered {
                ListKind::Number
            } else {
                ListKind::Bullet
            },
            start: if ordered { start } else { 1 },
            items: converted,
        })
    }

    /// Collapse converted child blocks into container content.
    ///
    /// Paragraph runs are joined with a `"\n"` text run. Headings and quotes
    /// lose their structure. Lists stay nested only when `keep_lists` is set.
    /// Placeholders move to `hoisted`.
    fn fold(
        &mut self,
        blocks: Vec<BlockNode>,
        keep_lists: bool,
        container: &str,
        location: SourceLocation,
        hoisted: &mut Vec<BlockNode>,
    ) -> Vec<ListItemChild> {
        let mut folded = Vec::new();
        let mut run: Vec<InlineNode> = Vec::new();

        for block in blocks {
            let text = match block {
                BlockNode::Paragraph { children } => children,
                BlockNode::Heading { children, .. } | BlockNode::Quote { children } => {
                    self.warn_at(
                        WarningKind::UnsupportedNode,
                        format!("nested block inside {container} flattened to text"),
                        location,
                    );
                    children
                }
                BlockNode::List(list) if keep_lists => {
                    flush_run(&mut run, &mut folded);
                    folded.push(ListItemChild::List(list));
                    continue;
                }
                BlockNode::List(list) => {
                    self.warn_at(
                        WarningKind::UnsupportedNode,
                        format!("list inside {container} flattened to text"),
                        location,
                    );
                    vec![InlineNode::text(
                        BlockNode::List(list).plain_text(),
                        TextFormat::PLAIN,
                    )]
                }
                BlockNode::Block(placeholder) => {
                    self.warn_at(
                        WarningKind::HoistedBlock,
                        format!(
                            "block component {} inside {container} moved after it",
                            placeholder.block_type
                        ),
                        location,
                    );
                    hoisted.push(BlockNode::Block(placeholder));
                    continue;
                }
            };
            if text.is_empty() {
                continue;
            }
            if !run.is_empty() {
                run.push(InlineNode::text("\n", TextFormat::PLAIN));
            }
            run.extend(text);
        }
        flush_run(&mut run, &mut folded);
        folded
    }

    fn block_component(
        &mut self,
        component: &Component<AstBlock>,
        out: &mut Vec<BlockNode>,
        hoisted: &mut Vec<BlockNode>,
        top: bool,
    ) -> Result<()> {
        let registry = self.registry;
        let invocation = Invocation {
            name: &component.name,
            attributes: &component.attributes,
            location: component.location,
            standalone: true,
        };
        match extract::extract(self.document, invocation, registry, &mut self.warnings)? {
            Extraction::Flatten => {
                for child in &component.children {
                    self.block(child, out, hoisted, top)?;
                    if top {
                        out.append(hoisted);
                    }
                }
            }
            Extraction::Placeholder {
                mut placeholder,
                placement,
                children_field,
            } => {
                match children_field {
                    Some(field) => {
                        let nested = Document {
                            children: self.root(&component.children)?,
                        };
                        let value = match placement {
                            Placement::Block => FieldValue::RichText(nested),
                            Placement::Inline => nested.plain_text().into(),
                        };
                        placeholder.fields.insert(field.to_string(), value);
                    }
                    None if !component.children.is_empty() => {
                        self.warn_dropped_children(&component.name, component.location);
                    }
                    None => {}
                }
                out.push(match placement {
                    Placement::Block => BlockNode::Block(placeholder),
                    Placement::Inline => BlockNode::Paragraph {
                        children: vec![InlineNode::InlineBlock(placeholder)],
                    },
                });
            }
            Extraction::Unhandled { deprecated, reason } => {
                self.record_unhandled(&component.name, component.location, deprecated, reason);
                out.push(literal_paragraph(&component.open_source));
                for child in &component.children {
                    self.block(child, out, hoisted, top)?;
                    if top {
                        out.append(hoisted);
                    }
                }
                if let Some(close) = &component.close_source {
                    out.push(literal_paragraph(close));
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inlines
    // -----------------------------------------------------------------------

    fn inlines(&mut self, nodes: &[AstInline], format: TextFormat) -> Result<Vec<Piece>> {
        let mut pieces = Vec::with_capacity(nodes.len());
        for node in nodes {
            self.inline(node, format, &mut pieces)?;
        }
        Ok(pieces)
    }

    fn inline(&mut self, node: &AstInline, format: TextFormat, out: &mut Vec<Piece>) -> Result<()> {
        match node {
            AstInline::Text(text) | AstInline::Code(text) => {
                out.push(Piece::Inline(InlineNode::text(text.as_str(), format)));
            }
            AstInline::Styled { style, children } => {
                out.extend(self.inlines(children, format | style_flag(*style))?);
            }
            AstInline::SoftBreak => out.push(Piece::Inline(InlineNode::text(" ", format))),
            AstInline::LineBreak => out.push(Piece::Inline(InlineNode::text("\n", format))),
            AstInline::Link {
                url,
                children,
                location,
                ..
            } => {
                self.check_url(url, *location);
                let mut inline = Vec::new();
                let mut blocks = Vec::new();
                for piece in self.inlines(children, format)? {
                    match piece {
                        Piece::Inline(node) => inline.push(node),
                        Piece::Block(node) => {
                            self.warn_at(
                                WarningKind::HoistedBlock,
                                "block component inside a link moved after it",
                                *location,
                            );
                            blocks.push(Piece::Block(node));
                        }
                    }
                }
                out.push(Piece::Inline(InlineNode::Link {
                    url: url.clone(),
                    new_tab: false,
                    children: merge_text(inline),
                }));
                out.extend(blocks);
            }
            AstInline::Image { alt, location, .. } => {
                self.warn_at(
                    WarningKind::UnsupportedNode,
                    "image replaced by its alt text",
                    *location,
                );
                if !alt.is_empty() {
                    out.push(Piece::Inline(InlineNode::text(alt.as_str(), format)));
                }
            }
            AstInline::RawHtml { html, location } => {
                if !is_comment(html) {
                    self.warn_at(
                        WarningKind::UnsupportedNode,
                        format!("unsupported HTML tag stripped: {}", excerpt(html)),
                        *location,
                    );
                }
            }
            AstInline::Component(component) => self.inline_component(component, format, out)?,
        }
        Ok(())
    }

    fn inline_component(
        &mut self,
        component: &Component<AstInline>,
        format: TextFormat,
        out: &mut Vec<Piece>,
    ) -> Result<()> {
        let registry = self.registry;
        let invocation = Invocation {
            name: &component.name,
            attributes: &component.attributes,
            location: component.location,
            standalone: false,
        };
        match extract::extract(self.document, invocation, registry, &mut self.warnings)? {
            Extraction::Flatten => out.extend(self.inlines(&component.children, format)?),
            Extraction::Placeholder {
                mut placeholder,
                placement,
                children_field,
            } => {
                match children_field {
                    Some(field) => {
                        let pieces = self.inlines(&component.children, format)?;
                        let value = match placement {
                            Placement::Block => {
                                let mut children = Vec::new();
                                split_paragraph(pieces, &mut children);
                                FieldValue::RichText(Document { children })
                            }
                            Placement::Inline => {
                                let nodes: Vec<InlineNode> = pieces
                                    .into_iter()
                                    .filter_map(|p| match p {
                                        Piece::Inline(node) => Some(node),
                                        Piece::Block(_) => None,
                                    })
                                    .collect();
                                inline_text(&nodes).trim().to_string().into()
                            }
                        };
                        placeholder.fields.insert(field.to_string(), value);
                    }
                    None if has_inline_content(&component.children) => {
                        self.warn_dropped_children(&component.name, component.location);
                    }
                    None => {}
                }
                out.push(match placement {
                    Placement::Inline => Piece::Inline(InlineNode::InlineBlock(placeholder)),
                    Placement::Block => Piece::Block(BlockNode::Block(placeholder)),
                });
            }
            Extraction::Unhandled { deprecated, reason } => {
                self.record_unhandled(&component.name, component.location, deprecated, reason);
                out.push(Piece::Inline(InlineNode::text(
                    component.open_source.as_str(),
                    format,
                )));
                out.extend(self.inlines(&component.children, format)?);
                if let Some(close) = &component.close_source {
                    out.push(Piece::Inline(InlineNode::text(close.as_str(), format)));
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    fn record_unhandled(
        &mut self,
        name: &str,
        location: SourceLocation,
        deprecated: bool,
        reason: Option<&str>,
    ) {
        match self.unhandled.iter_mut().find(|u| u.name == name) {
            Some(entry) => entry.count += 1,
            None => self.unhandled.push(UnhandledComponent {
                name: name.to_string(),
                count: 1,
                first_seen: location,
                deprecated,
            }),
        }

        if self.strict {
            return;
        }
        let message = match (deprecated, reason) {
            (true, Some(reason)) => {
                format!("deprecated component {name} kept as literal text ({reason})")
            }
            (true, None) => format!("deprecated component {name} kept as literal text"),
            (false, _) => format!("unregistered component {name} kept as literal text"),
        };
        self.warn_at(WarningKind::UnregisteredComponent, message, location);
    }

    fn warn_dropped_children(&mut self, name: &str, location: SourceLocation) {
        self.warn_at(
            WarningKind::DroppedChildren,
            format!("{name} has no children field; its content was dropped"),
            location,
        );
    }

    fn check_url(&mut self, url: &str, location: SourceLocation) {
        let lower = url.to_ascii_lowercase();
        if (lower.starts_with("http://") || lower.starts_with("https://"))
            && Url::parse(url).is_err()
        {
            self.warn_at(
                WarningKind::InvalidUrl,
                format!("link URL {url:?} is not valid; kept verbatim"),
                location,
            );
        }
    }

    fn warn_at(&mut self, kind: WarningKind, message: impl Into<String>, location: SourceLocation) {
        self.warnings
            .push(ConversionWarning::new(kind, message).at(location));
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn style_flag(style: InlineStyle) -> TextFormat {
    match style {
        InlineStyle::Bold => TextFormat::BOLD,
        InlineStyle::Italic => TextFormat::ITALIC,
        InlineStyle::Strikethrough => TextFormat::STRIKETHROUGH,
        InlineStyle::Underline => TextFormat::UNDERLINE,
    }
}

/// Emit paragraphs for the inline runs of `pieces`, with block pieces as
/// siblings between them. Empty runs produce nothing.
fn split_paragraph(pieces: Vec<Piece>, out: &mut Vec<BlockNode>) {
    let mut run = Vec::new();
    for piece in pieces {
        match piece {
            Piece::Inline(node) => run.push(node),
            Piece::Block(node) => {
                push_paragraph(mem::take(&mut run), out);
                out.push(node);
            }
        }
    }
    push_paragraph(run, out);
}

fn push_paragraph(run: Vec<InlineNode>, out: &mut Vec<BlockNode>) {
    let children = trim_edges(merge_text(run));
    if !children.is_empty() {
        out.push(BlockNode::Paragraph { children });
    }
}

fn flush_run(run: &mut Vec<InlineNode>, children: &mut Vec<ListItemChild>) {
    children.extend(
        merge_text(mem::take(run))
            .into_iter()
            .map(ListItemChild::Inline),
    );
}

/// Join adjacent text runs with equal format and drop empty ones.
fn merge_text(nodes: Vec<InlineNode>) -> Vec<InlineNode> {
    let mut out: Vec<InlineNode> = Vec::with_capacity(nodes.len());
    for node in nodes {
        if let InlineNode::Text { text, format } = &node {
            if text.is_empty() {
                continue;
            }
            if let Some(InlineNode::Text {
                text: previous,
                format: previous_format,
            }) = out.last_mut()
            {
                if previous_format == format {
                    previous.push_str(text);
                    continue;
                }
            }
        }
        out.push(node);
    }
    out
}

/// Strip leading whitespace from the first text run and trailing whitespace
/// from the last one.
fn trim_edges(mut nodes: Vec<InlineNode>) -> Vec<InlineNode> {
    while let Some(InlineNode::Text { text, .. }) = nodes.first_mut() {
        let trimmed = text.trim_start().to_string();
        if trimmed.is_empty() {
            nodes.remove(0);
            continue;
        }
        *text = trimmed;
        break;
    }
    while let Some(InlineNode::Text { text, .. }) = nodes.last_mut() {
        let trimmed = text.trim_end().to_string();
        if trimmed.is_empty() {
            nodes.pop();
            continue;
        }
        *text = trimmed;
        break;
    }
    nodes
}

fn literal_paragraph(source: &str) -> BlockNode {
    BlockNode::Paragraph {
        children: vec![InlineNode::text(source, TextFormat::PLAIN)],
    }
}

fn has_inline_content(nodes: &[AstInline]) -> bool {
    nodes.iter().any(|node| match node {
        AstInline::Text(text) => !text.trim().is_empty(),
        AstInline::SoftBreak | AstInline::LineBreak => false,
        _ => true,
    })
}

fn is_comment(html: &str) -> bool {
    html.trim_start().starts_with("<!--")
}

fn excerpt(html: &str) -> String {
    let line = html.trim().lines().next().unwrap_or_default();
    match line.char_indices().nth(40) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}
