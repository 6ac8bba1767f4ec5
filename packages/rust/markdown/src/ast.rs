//! Parsed document tree.
//!
//! Nodes are produced once by the builder and only read afterwards.

use docweave_shared::SourceLocation;

pub use crate::tags::{Attribute, AttributeValue};

#[derive(Debug, Clone, PartialEq)]
pub enum AstBlock {
    Heading {
        level: u8,
        children: Vec<AstInline>,
        location: SourceLocation,
    },
    Paragraph {
        children: Vec<AstInline>,
        location: SourceLocation,
    },
    List {
        ordered: bool,
        start: u64,
        items: Vec<AstListItem>,
        location: SourceLocation,
    },
    BlockQuote {
        children: Vec<AstBlock>,
        location: SourceLocation,
    },
    CodeBlock {
        language: Option<String>,
        code: String,
        location: SourceLocation,
    },
    ThematicBreak {
        location: SourceLocation,
    },
    /// Raw HTML block that is not a component.
    Html {
        html: String,
        location: SourceLocation,
    },
    Component(Component<AstBlock>),
}

impl AstBlock {
    pub fn location(&self) -> SourceLocation {
        match self {
            Self::Heading { location, .. }
            | Self::Paragraph { location, .. }
            | Self::List { location, .. }
            | Self::BlockQuote { location, .. }
            | Self::CodeBlock { location, .. }
            | Self::ThematicBreak { location }
            | Self::Html { location, .. } => *location,
            Self::Component(c) => c.location,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstListItem {
    pub children: Vec<AstBlock>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineStyle {
    Bold,
    Italic,
    Strikethrough,
    Underline,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstInline {
    Text(String),
    Styled {
        style: InlineStyle,
        children: Vec<AstInline>,
    },
    Code(String),
    Link {
        url: String,
        title: String,
        children: Vec<AstInline>,
        location: SourceLocation,
    },
    Image {
        url: String,
        alt: String,
        location: SourceLocation,
    },
    SoftBreak,
    LineBreak,
    RawHtml {
        html: String,
        location: SourceLocation,
    },
    Component(Component<AstInline>),
}

/// A custom tag invocation with the children it encloses.
#[derive(Debug, Clone, PartialEq)]
pub struct Component<C> {
    pub name: String,
    /// Attributes in source order; duplicates are kept.
    pub attributes: Vec<Attribute>,
    pub children: Vec<C>,
    pub location: SourceLocation,
    /// Literal text of the opening (or self-closing) tag.
    pub open_source: String,
    /// Literal text of the closing tag, if there was one.
    pub close_source: Option<String>,
}
