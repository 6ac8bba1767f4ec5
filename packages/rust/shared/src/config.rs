//! Application configuration for docweave.
//!
//! User config lives at `~/.docweave/docweave.toml`. It holds converter
//! options and the component registry table. Callers may also load an
//! explicit file with [`load_config_from`] or parse a string with
//! [`parse_config`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConversionError, Result};
use crate::types::DEFAULT_INSTANCE_FIELD;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docweave.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docweave";

// ---------------------------------------------------------------------------
// Config structs (matching docweave.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Converter behavior.
    #[serde(default)]
    pub converter: ConverterConfig,

    /// Component registry, keyed by tag name.
    #[serde(default)]
    pub components: BTreeMap<String, ComponentConfig>,
}

/// `[converter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Fail the batch on unregistered components instead of keeping them as text.
    #[serde(default = "default_true")]
    pub strict: bool,

    /// Upper bound for one external lookup, in milliseconds.
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,

    /// Documents resolved concurrently in a batch.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Merge reference lookups across all documents of a batch.
    #[serde(default)]
    pub shared_lookup: bool,

    /// What to do when the finalized tree has structural violations.
    #[serde(default)]
    pub validation: ValidationPolicy,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            strict: true,
            lookup_timeout_ms: default_lookup_timeout_ms(),
            max_concurrency: default_max_concurrency(),
            shared_lookup: false,
            validation: ValidationPolicy::default(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_lookup_timeout_ms() -> u64 {
    5_000
}
fn default_max_concurrency() -> usize {
    4
}
fn default_instance_field() -> String {
    DEFAULT_INSTANCE_FIELD.into()
}

/// Outcome of structural validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// Violations fail the document.
    #[default]
    Reject,
    /// Violations are reported as warnings and the document is kept.
    Warn,
}

/// `[components.<Name>]` entry. The `status` key selects the variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ComponentConfig {
    Implemented(ComponentDefinition),
    NeedsWork(ComponentDefinition),
    Alias {
        alias_of: String,
    },
    Deprecated {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// How a component is converted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub component_type: ComponentType,

    #[serde(default)]
    pub can_render_block: bool,

    #[serde(default)]
    pub can_render_inline: bool,

    /// Output `blockType`. Falls back to the tag name in camelCase.
    #[serde(default)]
    pub target_block_type: Option<String>,

    /// Source attribute name -> output field name.
    #[serde(default)]
    pub field_map: BTreeMap<String, String>,

    /// Field receiving the converted children, if the component keeps them.
    #[serde(default)]
    pub children_field: Option<String>,

    /// External data this component needs.
    #[serde(default)]
    pub data: Option<DataBindingConfig>,

    /// Free-form note shown for `needs-work` entries.
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Block,
    Inline,
    Wrapper,
}

/// `data = { ... }` on a component: where its instance id comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataBindingConfig {
    /// Collection searched by the data store.
    pub category: String,

    /// Output field receiving the resolved id.
    #[serde(default = "default_instance_field")]
    pub instance_field: String,

    /// Fixed slug used for every invocation.
    #[serde(default)]
    pub instance_slug: Option<String>,

    /// Attribute whose value is mapped through `slug_table`.
    #[serde(default)]
    pub slug_attribute: Option<String>,

    #[serde(default)]
    pub slug_table: BTreeMap<String, String>,

    /// Slug used when `slug_attribute` is absent on an invocation.
    #[serde(default)]
    pub default_slug: Option<String>,
}

// ---------------------------------------------------------------------------
// Convert options (runtime, derived from config)
// ---------------------------------------------------------------------------

/// Runtime converter options.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub strict: bool,
    pub lookup_timeout: Duration,
    pub max_concurrency: usize,
    pub shared_lookup: bool,
    pub validation: ValidationPolicy,
}

impl From<&AppConfig> for ConvertOptions {
    fn from(config: &AppConfig) -> Self {
        let c = &config.converter;
        Self {
            strict: c.strict,
            lookup_timeout: Duration::from_millis(c.lookup_timeout_ms),
            max_concurrency: c.max_concurrency.max(1),
            shared_lookup: c.shared_lookup,
            validation: c.validation,
        }
    }
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl ConvertOptions {
    /// Same options with strict mode switched off.
    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docweave/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ConversionError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docweave/docweave.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ConversionError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ConversionError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Parse config from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
    toml::from_str(content).map_err(|e| ConversionError::config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("lookup_timeout_ms"));
        assert!(toml_str.contains("validation = \"reject\""));
    }

    #[test]
    fn convert_options_from_defaults() {
        let opts = ConvertOptions::default();
        assert!(opts.strict);
        assert_eq!(opts.lookup_timeout, Duration::from_secs(5));
        assert_eq!(opts.max_concurrency, 4);
        assert!(!opts.shared_lookup);
        assert_eq!(opts.validation, ValidationPolicy::Reject);
        assert!(!opts.lenient().strict);
    }

    #[test]
    fn components_by_status() {
        let toml_str = r#"
[converter]
strict = false
validation = "warn"

[components.Note]
status = "implemented"
component_type = "wrapper"

[components.PhoneNumber]
status = "needs-work"
component_type = "inline"
can_render_inline = true
target_block_type = "phoneNumber"
field_map = { label = "label" }
note = "formatting pending"
data = { category = "phone-numbers", instance_slug = "example-phone" }

[components.Phone]
status = "alias"
alias_of = "PhoneNumber"

[components.OldBanner]
status = "deprecated"
"#;
        let config = parse_config(toml_str).expect("parse");
        assert!(!config.converter.strict);
        assert_eq!(config.converter.validation, ValidationPolicy::Warn);
        assert_eq!(config.components.len(), 4);

        match &config.components["PhoneNumber"] {
            ComponentConfig::NeedsWork(def) => {
                assert_eq!(def.component_type, ComponentType::Inline);
                assert!(def.can_render_inline);
                assert_eq!(def.note.as_deref(), Some("formatting pending"));
                let data = def.data.as_ref().expect("data binding");
                assert_eq!(data.instance_field, "instanceId");
                assert_eq!(data.instance_slug.as_deref(), Some("example-phone"));
            }
            other => panic!("unexpected entry: {other:?}"),
        }
        assert!(matches!(
            &config.components["Phone"],
            ComponentConfig::Alias { alias_of } if alias_of == "PhoneNumber"
        ));
        assert!(matches!(
            &config.components["OldBanner"],
            ComponentConfig::Deprecated { reason: None }
        ));
    }

    #[test]
    fn unknown_status_is_a_config_error() {
        let err = parse_config(
            r#"
[components.X]
status = "maybe"
component_type = "block"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConversionError::Config { .. }));
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let err = load_config_from(Path::new("/definitely/not/here/docweave.toml")).unwrap_err();
        assert!(matches!(err, ConversionError::Io { .. }));
    }
}
