//! Error types for docweave.
//!
//! Every crate in the workspace reports failures through [`ConversionError`].
//! Failures that concern one document carry that document's id so a batch
//! caller can attribute them without extra bookkeeping.

use std::path::PathBuf;

use crate::types::{SourceLocation, UnhandledComponent, Violation};

/// Top-level error type for all docweave operations.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// Configuration loading or registry validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The source could not be turned into an AST at all.
    #[error("parse error in {document}: {message}")]
    Parse { document: String, message: String },

    /// An AST node has no valid counterpart in the output tree.
    #[error("transform error in {document} at {location}: {message}")]
    Transform {
        document: String,
        message: String,
        location: SourceLocation,
    },

    /// Custom tags with no usable registry entry (strict mode).
    #[error("unregistered components in {document}: {}", describe_unhandled(.components))]
    UnregisteredComponent {
        document: String,
        components: Vec<UnhandledComponent>,
    },

    /// A slug attribute value has no entry in the component's slug table.
    #[error(
        "component {component} in {document}: attribute {attribute}={value:?} has no slug mapping"
    )]
    UnmappedSlug {
        document: String,
        component: String,
        attribute: String,
        value: String,
    },

    /// The data store did not return an id for one or more slugs.
    #[error("unresolved {category} references in {document}: {}", .slugs.join(", "))]
    UnresolvedReference {
        document: String,
        category: String,
        slugs: Vec<String>,
    },

    /// The finalized tree breaks one or more structural invariants.
    #[error("{document} failed structural validation with {} violation(s)", .violations.len())]
    StructuralValidation {
        document: String,
        violations: Vec<Violation>,
    },

    /// The data store did not answer within the configured bound.
    #[error("lookup of {category} for {document} timed out after {timeout_ms}ms")]
    Timeout {
        document: String,
        category: String,
        timeout_ms: u64,
    },

    /// The data store failed while answering a lookup.
    #[error("lookup of {category} for {document} failed: {message}")]
    Lookup {
        document: String,
        category: String,
        message: String,
    },

    /// A conversion task ended without producing a result.
    #[error("conversion of {document} aborted: {message}")]
    Aborted { document: String, message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ConversionError>;

impl ConversionError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error for `document`.
    pub fn parse(document: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Parse {
            document: document.into(),
            message: msg.into(),
        }
    }

    /// Create a transform error for `document` at `location`.
    pub fn transform(
        document: impl Into<String>,
        location: SourceLocation,
        msg: impl Into<String>,
    ) -> Self {
        Self::Transform {
            document: document.into(),
            message: msg.into(),
            location,
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same conversion could succeed.
    ///
    /// Only failures of the external lookup qualify; every other error is a
    /// property of the input or the configuration.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Lookup { .. })
    }

    /// The document this error belongs to, if it is document-scoped.
    pub fn document(&self) -> Option<&str> {
        match self {
            Self::Parse { document, .. }
            | Self::Transform { document, .. }
            | Self::UnregisteredComponent { document, .. }
            | Self::UnmappedSlug { document, .. }
            | Self::UnresolvedReference { document, .. }
            | Self::StructuralValidation { document, .. }
            | Self::Timeout { document, .. }
            | Self::Lookup { document, .. }
            | Self::Aborted { document, .. } => Some(document),
            Self::Config { .. } | Self::Storage(_) | Self::Io { .. } => None,
        }
    }
}

fn describe_unhandled(components: &[UnhandledComponent]) -> String {
    components
        .iter()
        .map(|c| format!("{} (x{}, first at {})", c.name, c.count, c.first_seen))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ConversionError::config("alias cycle: A -> B -> A");
        assert_eq!(err.to_string(), "config error: alias cycle: A -> B -> A");

        let err = ConversionError::UnresolvedReference {
            document: "intro.mdx".into(),
            category: "phone-numbers".into(),
            slugs: vec!["main-line".into(), "fax".into()],
        };
        assert_eq!(
            err.to_string(),
            "unresolved phone-numbers references in intro.mdx: main-line, fax"
        );
    }

    #[test]
    fn unregistered_lists_every_component() {
        let err = ConversionError::UnregisteredComponent {
            document: "a.mdx".into(),
            components: vec![UnhandledComponent {
                name: "UnknownWidget".into(),
                count: 2,
                first_seen: SourceLocation::new(3, 1),
                deprecated: false,
            }],
        };
        let msg = err.to_string();
        assert!(msg.contains("UnknownWidget (x2, first at 3:1)"));
        assert_eq!(err.document(), Some("a.mdx"));
    }

    #[test]
    fn only_lookup_failures_are_retryable() {
        let timeout = ConversionError::Timeout {
            document: "a".into(),
            category: "c".into(),
            timeout_ms: 10,
        };
        assert!(timeout.is_retryable());

        let unresolved = ConversionError::UnresolvedReference {
            document: "a".into(),
            category: "c".into(),
            slugs: vec!["s".into()],
        };
        assert!(!unresolved.is_retryable());
        assert!(!ConversionError::Storage("down".into()).is_retryable());
    }
}
