//! Conversion core for docweave.
//!
//! This crate turns parsed documents into editor-state trees. It provides:
//! - [`Registry`]: the component registry snapshot
//! - [`transform`]: the pure AST-to-tree pass, dispatching custom tags through [`extract`]
//! - [`resolver`]: batched reference resolution against an [`InstanceStore`](docweave_shared::InstanceStore)
//! - [`validate`]: structural validation of the finalized tree
//! - [`convert`], [`prepare`], and the batch [`Converter`]

pub mod extract;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod transform;
pub mod validator;

pub use pipeline::{
    BatchSummary, ConversionOutput, Converter, DocumentOutcome, PreparedDocument,
    ProgressReporter, RawDocument, SilentProgress, convert, finalize, prepare,
};
pub use registry::{ComponentKind, ComponentSpec, Entry, Registry, Resolution, Status};
pub use resolver::{
    ReferenceSet, ResolveStats, ResolvedIds, apply_references, collect_references,
    lookup_references, resolve,
};
pub use transform::{Transformed, transform};
pub use validator::validate;
