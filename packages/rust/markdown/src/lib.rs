//! Document parser: front matter plus a Markdown body with component tags.
//!
//! [`parse_document`] turns source text into a [`ParsedDocument`]: the parsed
//! front-matter header, an AST of block and inline nodes (custom tags become
//! [`ast::Component`] nodes), and any warnings collected along the way.

pub mod ast;
mod builder;
pub mod frontmatter;
mod normalize;
pub mod tags;

use tracing::{debug, instrument, warn};

use docweave_shared::{ConversionError, ConversionWarning, Result, SourceLocation, WarningKind};

pub use ast::{AstBlock, AstInline, AstListItem, Component, InlineStyle};
pub use frontmatter::{FrontMatter, FrontMatterValue};
pub use normalize::TagToken;
pub use tags::{Attribute, AttributeValue, TagKind};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of parsing one source document.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub front_matter: FrontMatter,
    pub blocks: Vec<AstBlock>,
    pub warnings: Vec<ConversionWarning>,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse `source` for the document named `document`.
///
/// This is the main entry point. It:
/// 1. Strips a leading byte-order mark
/// 2. Splits off the front-matter header
/// 3. Lifts component tags out of the body and isolates tag-only lines
/// 4. Parses the Markdown and builds the AST
///
/// Header problems and unbalanced tags are warnings. The only fatal case is
/// an unterminated header with nothing after its opening line.
#[instrument(skip_all, fields(document = %document))]
pub fn parse_document(document: &str, source: &str) -> Result<ParsedDocument> {
    // Step 1: BOM
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);

    // Step 2: Front matter
    let split = frontmatter::split(source);
    let mut warnings = split.warnings;

    if split.unterminated {
        let after_opening = source.split_once('\n').map_or("", |(_, rest)| rest);
        if after_opening.trim().is_empty() {
            return Err(ConversionError::parse(
                document,
                "front matter is never closed and there is no body to recover",
            ));
        }
        warn!("front matter never closed, parsing whole input as body");
    }

    if split.body.trim().is_empty() {
        warnings.push(
            ConversionWarning::new(WarningKind::EmptyBody, "document body is empty")
                .at(SourceLocation::new(split.body_line, 1)),
        );
        return Ok(ParsedDocument {
            front_matter: split.front_matter,
            blocks: Vec::new(),
            warnings,
        });
    }

    // Step 3: Component tags
    let normalized = normalize::normalize(split.body, split.body_line);
    debug!(
        tags = normalized.tags.len(),
        normalized_len = normalized.text.len(),
        "component tags lifted"
    );
    warnings.extend(normalized.warnings.iter().cloned());

    // Step 4: Markdown
    let (blocks, build_warnings) = builder::build(&normalized);
    warnings.extend(build_warnings);

    debug!(
        blocks = blocks.len(),
        front_matter_keys = split.front_matter.len(),
        warnings = warnings.len(),
        "parse complete"
    );

    Ok(ParsedDocument {
        front_matter: split.front_matter,
        blocks,
        warnings,
    })
}

/// Parse raw bytes, rejecting input that is not UTF-8.
pub fn parse_bytes(document: &str, bytes: &[u8]) -> Result<ParsedDocument> {
    let source = std::str::from_utf8(bytes).map_err(|e| {
        ConversionError::parse(document, format!("source is not valid UTF-8: {e}"))
    })?;
    parse_document(document, source)
}
