//! Scanner for JSX-style component tags.
//!
//! Recognizes `<Name attr="v" flag expr={1} />`, `<Name ...>` and `</Name>`.
//! Attribute values may be double- or single-quoted strings or a
//! brace-balanced `{...}` expression. Anything else is not a tag.

use std::iter::Peekable;
use std::str::CharIndices;

/// Whether a tag opens, closes, or is complete on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Open,
    Close,
    SelfClosing,
}

/// Attribute value as written in the source.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    /// Bare attribute without `=`.
    Flag,
    /// Contents of a `{...}` expression, without the braces.
    Expression(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
}

/// One scanned tag.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedTag {
    pub name: String,
    pub kind: TagKind,
    pub attributes: Vec<Attribute>,
}

/// Component names start with an uppercase ASCII letter.
pub fn is_component_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

/// Whether `input` could start a component tag (`<X` or `</X`).
pub fn starts_component_tag(input: &str) -> bool {
    let rest = match input.strip_prefix("</") {
        Some(rest) => rest,
        None => match input.strip_prefix('<') {
            Some(rest) => rest,
            None => return false,
        },
    };
    rest.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

/// Scan one tag at the start of `input`.
///
/// Returns the tag and the number of bytes it occupies, or `None` if the
/// text there is not a well-formed tag. Tags may span several lines.
pub fn scan_tag(input: &str) -> Option<(ScannedTag, usize)> {
    let mut chars = input.char_indices().peekable();
    if chars.next()?.1 != '<' {
        return None;
    }

    let closing = matches!(chars.peek(), Some((_, '/')));
    if closing {
        chars.next();
    }

    let name = scan_name(&mut chars, input, |c| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
    })?;

    if closing {
        skip_whitespace(&mut chars);
        let (idx, c) = chars.next()?;
        if c != '>' {
            return None;
        }
        return Some((
            ScannedTag {
                name,
                kind: TagKind::Close,
                attributes: Vec::new(),
            },
            idx + 1,
        ));
    }

    let mut attributes = Vec::new();
    let mut pending_space = false;
    loop {
        let had_space = skip_whitespace(&mut chars) || pending_space;
        pending_space = false;
        let &(idx, c) = chars.peek()?;
        match c {
            '>' => {
                return Some((
                    ScannedTag {
                        name,
                        kind: TagKind::Open,
                        attributes,
                    },
                    idx + 1,
                ));
            }
            '/' => {
                chars.next();
                let (end, c) = chars.next()?;
                if c != '>' {
                    return None;
                }
                return Some((
                    ScannedTag {
                        name,
                        kind: TagKind::SelfClosing,
                        attributes,
                    },
                    end + 1,
                ));
            }
            _ if !had_space => return None,
            _ => {
                let attr_name = scan_name(&mut chars, input, |c| {
                    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.')
                })?;
                let trailing = skip_whitespace(&mut chars);
                let value = if matches!(chars.peek(), Some((_, '='))) {
                    chars.next();
                    skip_whitespace(&mut chars);
                    scan_value(&mut chars, input)?
                } else {
                    pending_space = trailing;
                    AttributeValue::Flag
                };
                attributes.push(Attribute {
                    name: attr_name,
                    value,
                });
            }
        }
    }
}

fn scan_name(
    chars: &mut Peekable<CharIndices<'_>>,
    input: &str,
    continues: impl Fn(char) -> bool,
) -> Option<String> {
    let &(start, first) = chars.peek()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    let mut end = start;
    while let Some(&(idx, c)) = chars.peek() {
        if idx != start && !continues(c) {
            break;
        }
        end = idx + c.len_utf8();
        chars.next();
    }
    Some(input[start..end].to_string())
}

fn scan_value(chars: &mut Peekable<CharIndices<'_>>, input: &str) -> Option<AttributeValue> {
    let (start, open) = chars.next()?;
    match open {
        '"' | '\'' => {
            for (idx, c) in chars.by_ref() {
                if c == open {
                    return Some(AttributeValue::String(input[start + 1..idx].to_string()));
                }
            }
            None
        }
        '{' => {
            let mut depth = 1usize;
            let mut quote: Option<char> = None;
            while let Some((idx, c)) = chars.next() {
                match quote {
                    Some(q) => {
                        if c == '\\' {
                            chars.next();
                        } else if c == q {
                            quote = None;
                        }
                    }
                    None => match c {
                        '"' | '\'' | '`' => quote = Some(c),
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                let expr = input[start + 1..idx].trim();
                                return Some(AttributeValue::Expression(expr.to_string()));
                            }
                        }
                        _ => {}
                    },
                }
            }
            None
        }
        _ => None,
    }
}

fn skip_whitespace(chars: &mut Peekable<CharIndices<'_>>) -> bool {
    let mut skipped = false;
    while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
        chars.next();
        skipped = true;
    }
    skipped
}
