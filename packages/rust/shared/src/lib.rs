//! Shared types, error model, and configuration for docweave.
//!
//! This crate is the foundation depended on by all other docweave crates.
//! It provides:
//! - [`ConversionError`]: the unified error type
//! - The output tree ([`Document`], [`BlockNode`], [`InlineNode`]) and diagnostics
//! - Configuration ([`AppConfig`], [`ConvertOptions`], config loading)
//! - The [`InstanceStore`] contract and an in-memory implementation

pub mod config;
pub mod error;
pub mod store;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ComponentConfig, ComponentDefinition, ComponentType, ConvertOptions,
    ConverterConfig, DataBindingConfig, ValidationPolicy, config_dir, config_file_path,
    load_config, load_config_from, parse_config,
};
pub use error::{ConversionError, Result};
pub use store::{InstanceStore, MemoryStore};
pub use types::{
    BLOCK_TYPE_KEY, BlockNode, ConversionWarning, DEFAULT_INSTANCE_FIELD, Document, FieldValue,
    InlineNode, List, ListItem, ListItemChild, ListKind, Placeholder, SYMBOLIC_REF_KEY,
    SourceLocation, SymbolicRef, TextFormat, UnhandledComponent, Violation, ViolationKind,
    WarningKind, inline_text,
};
