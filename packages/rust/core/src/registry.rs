//! Component registry: tag name to conversion policy.
//!
//! Built once from `[components.*]` config, validated as a whole, then shared
//! read-only (usually behind an `Arc`) by every conversion in a run.

use std::collections::BTreeMap;

use tracing::debug;

use docweave_shared::{
    AppConfig, BLOCK_TYPE_KEY, ComponentConfig, ComponentDefinition, ComponentType,
    ConversionError, DataBindingConfig, Result, SYMBOLIC_REF_KEY, parse_config,
};

// ---------------------------------------------------------------------------
// Entry types
// ---------------------------------------------------------------------------

/// One registry entry. Each status carries only what it needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Implemented(ComponentSpec),
    NeedsWork { spec: ComponentSpec, note: String },
    Alias { target: String },
    Deprecated { reason: Option<String> },
}

/// Status label of an [`Entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Implemented,
    NeedsWork,
    Alias,
    Deprecated,
}

impl Entry {
    pub fn status(&self) -> Status {
        match self {
            Self::Implemented(_) => Status::Implemented,
            Self::NeedsWork { .. } => Status::NeedsWork,
            Self::Alias { .. } => Status::Alias,
            Self::Deprecated { .. } => Status::Deprecated,
        }
    }

    /// Conversion policy, for entries that have one.
    pub fn spec(&self) -> Option<&ComponentSpec> {
        match self {
            Self::Implemented(spec) | Self::NeedsWork { spec, .. } => Some(spec),
            Self::Alias { .. } | Self::Deprecated { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSpec {
    pub kind: ComponentKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComponentKind {
    /// Removed; children take its place.
    Wrapper,
    Inline(PlaceholderSpec),
    Block(PlaceholderSpec),
}

impl ComponentSpec {
    pub fn component_type(&self) -> ComponentType {
        match self.kind {
            ComponentKind::Wrapper => ComponentType::Wrapper,
            ComponentKind::Inline(_) => ComponentType::Inline,
            ComponentKind::Block(_) => ComponentType::Block,
        }
    }

    pub fn placeholder(&self) -> Option<&PlaceholderSpec> {
        match &self.kind {
            ComponentKind::Wrapper => None,
            ComponentKind::Inline(p) | ComponentKind::Block(p) => Some(p),
        }
    }

    pub fn can_render_block(&self) -> bool {
        self.placeholder().is_some_and(|p| p.can_render_block)
    }

    pub fn can_render_inline(&self) -> bool {
        self.placeholder().is_some_and(|p| p.can_render_inline)
    }
}

/// How an inline or block component becomes a placeholder node.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderSpec {
    pub block_type: String,
    pub can_render_block: bool,
    pub can_render_inline: bool,
    /// Source attribute -> output field.
    pub field_map: BTreeMap<String, String>,
    pub children_field: Option<String>,
    pub data: Option<DataBinding>,
}

/// External instance a component refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBinding {
    pub category: String,
    pub instance_field: String,
    pub slug: SlugSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlugSource {
    Fixed(String),
    /// Attribute value looked up in a fixed table.
    Table {
        attribute: String,
        table: BTreeMap<String, String>,
        default: Option<String>,
    },
}

/// What a tag name resolves to after following aliases.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution<'a> {
    Convert {
        canonical: &'a str,
        spec: &'a ComponentSpec,
        note: Option<&'a str>,
    },
    Deprecated {
        canonical: &'a str,
        reason: Option<&'a str>,
    },
    Missing,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable tag-name lookup table.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: BTreeMap<String, Entry>,
}

impl Registry {
    /// Build and validate the registry from the `[components]` table.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut entries = BTreeMap::new();
        let mut problems = Vec::new();

        for (name, component) in &config.components {
            let entry = match component {
                ComponentConfig::Implemented(def) => {
                    build_spec(name, def).map(Entry::Implemented)
                }
                ComponentConfig::NeedsWork(def) => build_spec(name, def).map(|spec| {
                    Entry::NeedsWork {
                        spec,
                        note: def.note.clone().unwrap_or_else(|| "needs work".into()),
                    }
                }),
                ComponentConfig::Alias { alias_of } => Ok(Entry::Alias {
                    target: alias_of.clone(),
                }),
                ComponentConfig::Deprecated { reason } => Ok(Entry::Deprecated {
                    reason: reason.clone(),
                }),
            };
            match entry {
                Ok(entry) => {
                    entries.insert(name.clone(), entry);
                }
                Err(problem) => problems.push(problem),
            }
        }

        let registry = Self { entries };
        problems.extend(registry.alias_problems());

        if !problems.is_empty() {
            return Err(ConversionError::config(format!(
                "invalid component registry: {}",
                problems.join("; ")
            )));
        }

        debug!(components = registry.len(), "component registry loaded");
        Ok(registry)
    }

    /// Parse a TOML document and build the registry from it.
    pub fn from_toml(content: &str) -> Result<Self> {
        Self::from_config(&parse_config(content)?)
    }

    pub fn lookup(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    /// Canonical name for `name`: the alias target, or `name` itself.
    /// `None` if the tag is not registered.
    pub fn resolve_alias<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        match self.entries.get(name)? {
            Entry::Alias { target } => Some(target),
            _ => Some(name),
        }
    }

    /// Follow at most one alias hop and report how the tag converts.
    pub fn resolve<'a>(&'a self, name: &'a str) -> Resolution<'a> {
        let Some(canonical) = self.resolve_alias(name) else {
            return Resolution::Missing;
        };
        match self.entries.get(canonical) {
            Some(Entry::Implemented(spec)) => Resolution::Convert {
                canonical,
                spec,
                note: None,
            },
            Some(Entry::NeedsWork { spec, note }) => Resolution::Convert {
                canonical,
                spec,
                note: Some(note),
            },
            Some(Entry::Deprecated { reason }) => Resolution::Deprecated {
                canonical,
                reason: reason.as_deref(),
            },
            Some(Entry::Alias { .. }) | None => Resolution::Missing,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    fn alias_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (name, entry) in &self.entries {
            let Entry::Alias { target } = entry else {
                continue;
            };

            let mut path = vec![name.as_str()];
            let mut current = target.as_str();
            let mut cycle = false;
            while let Some(Entry::Alias { target: next }) = self.entries.get(current) {
                if path.contains(&current) {
                    cycle = true;
                    break;
                }
                path.push(current);
                current = next;
            }

            if cycle {
                path.push(current);
                problems.push(format!("alias cycle {}", path.join(" -> ")));
                continue;
            }
            match self.entries.get(target) {
                None => problems.push(format!("{name} aliases unknown component {target}")),
                Some(Entry::Alias { .. }) => problems.push(format!(
                    "{name} aliases {target}, which is itself an alias"
                )),
                Some(Entry::Deprecated { .. }) => problems.push(format!(
                    "{name} aliases deprecated component {target}"
                )),
                Some(_) => {}
            }
        }
        problems
    }
}

fn build_spec(name: &str, def: &ComponentDefinition) -> std::result::Result<ComponentSpec, String> {
    let kind = match def.component_type {
        ComponentType::Wrapper => {
            if def.can_render_block || def.can_render_inline {
                return Err(format!("{name}: wrapper must not set render flags"));
            }
            if def.data.is_some() {
                return Err(format!("{name}: wrapper cannot bind external data"));
            }
            ComponentKind::Wrapper
        }
        ComponentType::Inline => {
            if !def.can_render_inline {
                return Err(format!("{name}: inline component needs can_render_inline"));
            }
            ComponentKind::Inline(build_placeholder(name, def)?)
        }
        ComponentType::Block => {
            if !def.can_render_block {
                return Err(format!("{name}: block component needs can_render_block"));
            }
            ComponentKind::Block(build_placeholder(name, def)?)
        }
    };
    Ok(ComponentSpec { kind })
}

fn build_placeholder(
    name: &str,
    def: &ComponentDefinition,
) -> std::result::Result<PlaceholderSpec, String> {
    let block_type = match &def.target_block_type {
        Some(t) if t.trim().is_empty() => {
            return Err(format!("{name}: target_block_type is empty"));
        }
        Some(t) => t.clone(),
        None => camel_case(name),
    };
    let data = def
        .data
        .as_ref()
        .map(|d| build_binding(name, d))
        .transpose()?;

    check_targets(name, def, data.as_ref())?;

    Ok(PlaceholderSpec {
        block_type,
        can_render_block: def.can_render_block,
        can_render_inline: def.can_render_inline,
        field_map: def.field_map.clone(),
        children_field: def.children_field.clone(),
        data,
    })
}

/// Every populated field must have its own, non-reserved key.
fn check_targets(
    name: &str,
    def: &ComponentDefinition,
    data: Option<&DataBinding>,
) -> std::result::Result<(), String> {
    let mut seen: Vec<&str> = Vec::new();
    let targets = def
        .field_map
        .values()
        .map(String::as_str)
        .chain(def.children_field.as_deref())
        .chain(data.map(|d| d.instance_field.as_str()));
    for target in targets {
        if target.trim().is_empty() {
            return Err(format!("{name}: empty field name"));
        }
        if target == BLOCK_TYPE_KEY || target == SYMBOLIC_REF_KEY {
            return Err(format!("{name}: field {target} is reserved"));
        }
        if seen.contains(&target) {
            return Err(format!("{name}: field {target} is populated twice"));
        }
        seen.push(target);
    }
    Ok(())
}

fn build_binding(name: &str, data: &DataBindingConfig) -> std::result::Result<DataBinding, String> {
    if data.category.trim().is_empty() {
        return Err(format!("{name}: data binding has an empty category"));
    }
    let slug = match (&data.instance_slug, &data.slug_attribute) {
        (Some(slug), None) => SlugSource::Fixed(slug.clone()),
        (None, Some(attribute)) => {
            if data.slug_table.is_empty() {
                return Err(format!(
                    "{name}: slug_attribute {attribute} needs a non-empty slug_table"
                ));
            }
            SlugSource::Table {
                attribute: attribute.clone(),
                table: data.slug_table.clone(),
                default: data.default_slug.clone(),
            }
        }
        (Some(_), Some(_)) => {
            return Err(format!(
                "{name}: set either instance_slug or slug_attribute, not both"
            ));
        }
        (None, None) => {
            return Err(format!(
                "{name}: data binding needs instance_slug or slug_attribute"
            ));
        }
    };
    Ok(DataBinding {
        category: data.category.clone(),
        instance_field: data.instance_field.clone(),
        slug,
    })
}

/// `PhoneNumber` -> `phoneNumber`, `Tabs.Item` -> `tabsItem`.
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if !c.is_ascii_alphanumeric() {
            upper_next = !out.is_empty();
            continue;
        }
        if out.is_empty() {
            out.push(c.to_ascii_lowercase());
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
        upper_next = false;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"
[components.Note]
status = "implemented"
component_type = "wrapper"

[components.PhoneNumber]
status = "implemented"
component_type = "inline"
can_render_inline = true
data = { category = "phone-numbers", instance_slug = "example-phone" }

[components.Phone]
status = "alias"
alias_of = "PhoneNumber"

[components.Callout]
status = "needs-work"
component_type = "block"
can_render_block = true
note = "icons not mapped"

[components.Banner]
status = "deprecated"
reason = "use Callout"
"#;

    fn config_error(toml: &str) -> String {
        match Registry::from_toml(toml) {
            Err(ConversionError::Config { message }) => message,
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn lookup_and_resolve() {
        let registry = Registry::from_toml(REGISTRY).expect("registry");
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.lookup("Note").map(Entry::status), Some(Status::Implemented));
        assert!(registry.lookup("Unknown").is_none());

        assert_eq!(registry.resolve_alias("Phone"), Some("PhoneNumber"));
        assert_eq!(registry.resolve_alias("Note"), Some("Note"));
        assert_eq!(registry.resolve_alias("Nope"), None);

        match registry.resolve("Phone") {
            Resolution::Convert {
                canonical, spec, ..
            } => {
                assert_eq!(canonical, "PhoneNumber");
                assert_eq!(spec.component_type(), ComponentType::Inline);
                assert!(spec.can_render_inline());
                assert!(!spec.can_render_block());
                let p = spec.placeholder().expect("placeholder");
                assert_eq!(p.block_type, "phoneNumber");
                assert_eq!(
                    p.data.as_ref().map(|d| &d.slug),
                    Some(&SlugSource::Fixed("example-phone".into()))
                );
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            registry.resolve("Callout"),
            Resolution::Convert {
                note: Some("icons not mapped"),
                ..
            }
        ));
        assert!(matches!(
            registry.resolve("Banner"),
            Resolution::Deprecated {
                reason: Some("use Callout"),
                ..
            }
        ));
        assert_eq!(registry.resolve("Widget"), Resolution::Missing);
    }

    #[test]
    fn inconsistent_flags_are_rejected() {
        let msg = config_error(
            r#"
[components.Box]
status = "implemented"
component_type = "wrapper"
can_render_block = true

[components.Chip]
status = "implemented"
component_type = "inline"
"#,
        );
        assert!(msg.contains("Box: wrapper must not set render flags"));
        assert!(msg.contains("Chip: inline component needs can_render_inline"));
    }

    #[test]
    fn reserved_and_duplicate_fields_are_rejected() {
        let msg = config_error(
            r#"
[components.Kind]
status = "implemented"
component_type = "block"
can_render_block = true
field_map = { kind = "blockType" }

[components.Ref]
status = "implemented"
component_type = "inline"
can_render_inline = true
children_field = "$ref"

[components.Twice]
status = "implemented"
component_type = "inline"
can_render_inline = true
field_map = { id = "instanceId" }
data = { category = "phone-numbers", instance_slug = "main" }
"#,
        );
        assert!(msg.contains("Kind: field blockType is reserved"));
        assert!(msg.contains("Ref: field $ref is reserved"));
        assert!(msg.contains("Twice: field instanceId is populated twice"));
    }

    #[test]
    fn alias_cycle_is_rejected() {
        let msg = config_error(
            r#"
[components.A]
status = "alias"
alias_of = "B"

[components.B]
status = "alias"
alias_of = "A"
"#,
        );
        assert!(msg.contains("alias cycle A -> B -> A"), "{msg}");
    }

    #[test]
    fn self_alias_is_a_cycle() {
        let msg = config_error(
            r#"
[components.Loop]
status = "alias"
alias_of = "Loop"
"#,
        );
        assert!(msg.contains("alias cycle Loop -> Loop"), "{msg}");
    }

    #[test]
    fn alias_chain_and_bad_targets_are_rejected() {
        let msg = config_error(
            r#"
[components.Real]
status = "implemented"
component_type = "wrapper"

[components.Old]
status = "deprecated"

[components.Mid]
status = "alias"
alias_of = "Real"

[components.Top]
status = "alias"
alias_of = "Mid"

[components.Ghost]
status = "alias"
alias_of = "Nowhere"

[components.Stale]
status = "alias"
alias_of = "Old"
"#,
        );
        assert!(msg.contains("Top aliases Mid, which is itself an alias"), "{msg}");
        assert!(msg.contains("Ghost aliases unknown component Nowhere"), "{msg}");
        assert!(msg.contains("Stale aliases deprecated component Old"), "{msg}");
    }

    #[test]
    fn data_binding_must_name_a_slug_source() {
        let msg = config_error(
            r#"
[components.Addr]
status = "implemented"
component_type = "block"
can_render_block = true
data = { category = "addresses" }
"#,
        );
        assert!(msg.contains("needs instance_slug or slug_attribute"));
    }

    #[test]
    fn camel_case_block_types() {
        assert_eq!(camel_case("PhoneNumber"), "phoneNumber");
        assert_eq!(camel_case("Tabs.Item"), "tabsItem");
        assert_eq!(camel_case("CTA-Button"), "cTAButton");
    }
}
