//! Output tree, diagnostics, and location types shared by every stage.
//!
//! The tree here is the typed form of the editor-state JSON. It is built by
//! the transformer, completed by the resolver, and rendered to JSON with
//! [`Document::to_json`] just before structural validation.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

use serde::Serialize;
use serde_json::{Map, Value, json};

/// Reserved field key carrying a pending symbolic reference in serialized output.
pub const SYMBOLIC_REF_KEY: &str = "$ref";

/// Field holding a placeholder's block type.
pub const BLOCK_TYPE_KEY: &str = "blockType";

/// Default field receiving a resolved instance id.
pub const DEFAULT_INSTANCE_FIELD: &str = "instanceId";

// ---------------------------------------------------------------------------
// SourceLocation
// ---------------------------------------------------------------------------

/// 1-based line/column position in the original source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

// ---------------------------------------------------------------------------
// TextFormat
// ---------------------------------------------------------------------------

/// Bitmask of inline text styles.
///
/// Only the four defined flags can ever be set, so the value stays in `0..=15`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct TextFormat(u8);

impl TextFormat {
    pub const PLAIN: Self = Self(0);
    pub const BOLD: Self = Self(1);
    pub const ITALIC: Self = Self(2);
    pub const STRIKETHROUGH: Self = Self(4);
    pub const UNDERLINE: Self = Self(8);

    const DEFINED: u8 = 0b1111;

    /// Build a format from raw bits, rejecting undefined flags.
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::DEFINED == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_plain(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for TextFormat {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

// ---------------------------------------------------------------------------
// Document tree
// ---------------------------------------------------------------------------

/// A converted document: the root's ordered block children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub children: Vec<BlockNode>,
}

/// Top-level block nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockNode {
    Heading { level: u8, children: Vec<InlineNode> },
    Paragraph { children: Vec<InlineNode> },
    List(List),
    Quote { children: Vec<InlineNode> },
    Block(Placeholder),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Bullet,
    Number,
}

#[derive(Debug, Clone, PartialEq)]
pub struct List {
    pub kind: ListKind,
    pub start: u64,
    pub items: Vec<ListItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    pub value: u64,
    pub children: Vec<ListItemChild>,
}

/// A list item holds inline content and any lists nested under it.
#[derive(Debug, Clone, PartialEq)]
pub enum ListItemChild {
    Inline(InlineNode),
    List(List),
}

/// Inline nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum InlineNode {
    Text { text: String, format: TextFormat },
    Link {
        url: String,
        new_tab: bool,
        children: Vec<InlineNode>,
    },
    InlineBlock(Placeholder),
}

impl InlineNode {
    pub fn text(text: impl Into<String>, format: TextFormat) -> Self {
        Self::Text {
            text: text.into(),
            format,
        }
    }

    /// Concatenated text content, ignoring formatting and placeholders.
    pub fn plain_text(&self) -> String {
        match self {
            Self::Text { text, .. } => text.clone(),
            Self::Link { children, .. } => inline_text(children),
            Self::InlineBlock(_) => String::new(),
        }
    }
}

/// Concatenated plain text of an inline sequence.
pub fn inline_text(nodes: &[InlineNode]) -> String {
    nodes.iter().map(InlineNode::plain_text).collect()
}

/// A component rendered as an opaque block or inline block.
#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    pub block_type: String,
    pub fields: BTreeMap<String, FieldValue>,
    /// Pending external lookup. `None` once resolved or if never needed.
    pub reference: Option<SymbolicRef>,
}

impl Placeholder {
    pub fn new(block_type: impl Into<String>) -> Self {
        Self {
            block_type: block_type.into(),
            fields: BTreeMap::new(),
            reference: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// A placeholder field: a plain JSON value or a nested rich-text document.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Json(Value),
    RichText(Document),
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Json(Value::String(value.to_string()))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Json(Value::String(value))
    }
}

impl From<Document> for FieldValue {
    fn from(value: Document) -> Self {
        Self::RichText(value)
    }
}

/// An unresolved `(category, slug)` lookup attached to a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SymbolicRef {
    pub category: String,
    pub slug: String,
    /// Field that receives the resolved id.
    pub field: String,
}

// ---------------------------------------------------------------------------
// JSON rendering
// ---------------------------------------------------------------------------

impl Document {
    /// Render as `{"root": {...}}` editor state.
    pub fn to_json(&self) -> Value {
        let children = self.children.iter().map(BlockNode::to_json).collect();
        json!({ "root": Value::Object(element("root", children)) })
    }

    /// Reading-order text of the whole document, one line per block.
    pub fn plain_text(&self) -> String {
        self.children
            .iter()
            .map(BlockNode::plain_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Serialize for Document {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl BlockNode {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Heading { level, children } => {
                let mut node = element("heading", inline_json(children));
                node.insert("tag".into(), Value::String(format!("h{level}")));
                Value::Object(node)
            }
            Self::Paragraph { children } => {
                Value::Object(element("paragraph", inline_json(children)))
            }
            Self::List(list) => list.to_json(),
            Self::Quote { children } => Value::Object(element("quote", inline_json(children))),
            Self::Block(placeholder) => placeholder.to_json("block", 2),
        }
    }

    pub fn plain_text(&self) -> String {
        match self {
            Self::Heading { children, .. }
            | Self::Paragraph { children }
            | Self::Quote { children } => inline_text(children),
            Self::List(list) => list.plain_text(),
            Self::Block(_) => String::new(),
        }
    }
}

impl List {
    fn to_json(&self) -> Value {
        let items = self.items.iter().map(ListItem::to_json).collect();
        let mut node = element("list", items);
        let (list_type, tag) = match self.kind {
            ListKind::Bullet => ("bullet", "ul"),
            ListKind::Number => ("number", "ol"),
        };
        node.insert("listType".into(), json!(list_type));
        node.insert("start".into(), json!(self.start));
        node.insert("tag".into(), json!(tag));
        Value::Object(node)
    }

    fn plain_text(&self) -> String {
        self.items
            .iter()
            .map(|item| {
                item.children
                    .iter()
                    .map(|child| match child {
                        ListItemChild::Inline(node) => node.plain_text(),
                        ListItemChild::List(list) => format!("\n{}", list.plain_text()),
                    })
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ListItem {
    fn to_json(&self) -> Value {
        let children = self
            .children
            .iter()
            .map(|child| match child {
                ListItemChild::Inline(node) => node.to_json(),
                ListItemChild::List(list) => list.to_json(),
            })
            .collect();
        let mut node = element("listitem", children);
        node.insert("value".into(), json!(self.value));
        Value::Object(node)
    }
}

impl InlineNode {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text { text, format } => json!({
                "type": "text",
                "text": text,
                "format": format.bits(),
                "mode": "normal",
                "style": "",
                "detail": 0,
                "version": 1,
            }),
            Self::Link {
                url,
                new_tab,
                children,
            } => {
                let mut node = element("link", inline_json(children));
                node.insert(
                    "fields".into(),
                    json!({ "url": url, "newTab": new_tab, "linkType": "custom" }),
                );
                Value::Object(node)
            }
            Self::InlineBlock(placeholder) => placeholder.to_json("inlineBlock", 1),
        }
    }
}

impl Placeholder {
    fn to_json(&self, node_type: &str, version: u32) -> Value {
        let mut fields = Map::new();
        fields.insert(BLOCK_TYPE_KEY.into(), Value::String(self.block_type.clone()));
        for (key, value) in &self.fields {
            let rendered = match value {
                FieldValue::Json(v) => v.clone(),
                FieldValue::RichText(doc) => doc.to_json(),
            };
            fields.insert(key.clone(), rendered);
        }
        if let Some(reference) = &self.reference {
            fields.insert(
                SYMBOLIC_REF_KEY.into(),
                json!({
                    "category": reference.category,
                    "slug": reference.slug,
                    "field": reference.field,
                }),
            );
        }
        json!({
            "type": node_type,
            "fields": Value::Object(fields),
            "format": "",
            "version": version,
        })
    }
}

fn inline_json(children: &[InlineNode]) -> Vec<Value> {
    children.iter().map(InlineNode::to_json).collect()
}

/// Fixed template shared by every element node.
fn element(node_type: &str, children: Vec<Value>) -> Map<String, Value> {
    let mut node = Map::new();
    node.insert("type".into(), json!(node_type));
    node.insert("children".into(), Value::Array(children));
    node.insert("direction".into(), json!("ltr"));
    node.insert("format".into(), json!(""));
    node.insert("indent".into(), json!(0));
    node.insert("version".into(), json!(1));
    node
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Category of a non-fatal conversion issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningKind {
    FrontMatter,
    EmptyBody,
    TagBalance,
    UnclosedTag,
    UnmatchedTag,
    UnregisteredComponent,
    ComponentNeedsWork,
    DroppedAttribute,
    DroppedChildren,
    UnparsedExpression,
    UnsupportedNode,
    HoistedBlock,
    InvalidUrl,
    StructuralValidation,
}

/// A non-fatal issue recorded during conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionWarning {
    pub kind: WarningKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl ConversionWarning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for ConversionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(f, "{loc}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Which structural invariant a [`Violation`] breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    RootShape,
    MissingType,
    MissingVersion,
    HeadingTag,
    LeftoverReference,
    FormatRange,
    MalformedNode,
}

/// One structural problem in a finalized tree, located by JSON pointer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub path: String,
    pub kind: ViolationKind,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A custom tag the registry could not convert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnhandledComponent {
    pub name: String,
    pub count: usize,
    pub first_seen: SourceLocation,
    /// The registry knows the tag but marks it deprecated.
    pub deprecated: bool,
}
