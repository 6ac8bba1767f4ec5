//! Component dispatch: registry lookup, placement, and field population.
//!
//! The extractor decides what a single tag invocation becomes. Converting its
//! children is left to the transformer, which knows the surrounding context.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use docweave_markdown::{Attribute, AttributeValue};
use docweave_shared::{
    ConversionError, ConversionWarning, Placeholder, Result, SourceLocation, SymbolicRef,
    WarningKind,
};

use crate::registry::{ComponentKind, DataBinding, PlaceholderSpec, Registry, Resolution, SlugSource};

/// Where a placeholder ends up in the output tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Inline,
    Block,
}

/// The single outcome of dispatching one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction<'r> {
    /// Drop the tag, keep its children in place.
    Flatten,
    Placeholder {
        placeholder: Placeholder,
        placement: Placement,
        children_field: Option<&'r str>,
    },
    /// No usable registry entry.
    Unhandled {
        deprecated: bool,
        reason: Option<&'r str>,
    },
}

/// One tag invocation as seen by the extractor.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub name: &'a str,
    pub attributes: &'a [Attribute],
    pub location: SourceLocation,
    /// The tag occupies a block position of its own.
    pub standalone: bool,
}

/// Dispatch `invocation` against `registry`.
///
/// Warnings for needs-work entries, dropped attributes, and unparsed
/// expressions are pushed onto `warnings`. An attribute value missing from
/// a slug table is fatal.
pub fn extract<'r>(
    document: &str,
    invocation: Invocation<'r>,
    registry: &'r Registry,
    warnings: &mut Vec<ConversionWarning>,
) -> Result<Extraction<'r>> {
    let (canonical, spec, note) = match registry.resolve(invocation.name) {
        Resolution::Convert {
            canonical,
            spec,
            note,
        } => (canonical, spec, note),
        Resolution::Deprecated { reason, .. } => {
            return Ok(Extraction::Unhandled {
                deprecated: true,
                reason,
            });
        }
        Resolution::Missing => {
            return Ok(Extraction::Unhandled {
                deprecated: false,
                reason: None,
            });
        }
    };

    if let Some(note) = note {
        warnings.push(
            ConversionWarning::new(
                WarningKind::ComponentNeedsWork,
                format!("{} converted with known gaps: {note}", invocation.name),
            )
            .at(invocation.location),
        );
    }

    let (placeholder_spec, placement) = match &spec.kind {
        ComponentKind::Wrapper => return Ok(Extraction::Flatten),
        ComponentKind::Inline(p) => {
            let placement = if invocation.standalone && p.can_render_block {
                Placement::Block
            } else {
                Placement::Inline
            };
            (p, placement)
        }
        ComponentKind::Block(p) => {
            let placement = if !invocation.standalone && p.can_render_inline {
                Placement::Inline
            } else {
                Placement::Block
            };
            (p, placement)
        }
    };

    let placeholder = build_placeholder(document, canonical, placeholder_spec, invocation, warnings)?;
    debug!(
        component = invocation.name,
        block_type = %placeholder.block_type,
        ?placement,
        "component extracted"
    );

    Ok(Extraction::Placeholder {
        placeholder,
        placement,
        children_field: placeholder_spec.children_field.as_deref(),
    })
}

fn build_placeholder(
    document: &str,
    canonical: &str,
    spec: &PlaceholderSpec,
    invocation: Invocation<'_>,
    warnings: &mut Vec<ConversionWarning>,
) -> Result<Placeholder> {
    let attributes = last_wins(invocation.attributes);
    let slug_attribute = spec.data.as_ref().and_then(|d| match &d.slug {
        SlugSource::Table { attribute, .. } => Some(attribute.as_str()),
        SlugSource::Fixed(_) => None,
    });

    let mut placeholder = Placeholder::new(spec.block_type.clone());
    for (name, value) in &attributes {
        if Some(*name) == slug_attribute {
            continue;
        }
        let Some(field) = spec.field_map.get(*name) else {
            warnings.push(
                ConversionWarning::new(
                    WarningKind::DroppedAttribute,
                    format!("{}: attribute {name} has no field mapping", invocation.name),
                )
                .at(invocation.location),
            );
            continue;
        };
        let value = attribute_json(invocation.name, name, value, invocation.location, warnings);
        placeholder.fields.insert(field.clone(), value.into());
    }

    if let Some(binding) = &spec.data {
        placeholder.reference = Some(symbolic_ref(
            document, canonical, binding, &attributes,
        )?);
    }
    Ok(placeholder)
}

/// Deduplicate attributes; a later occurrence replaces an earlier one.
fn last_wins(attributes: &[Attribute]) -> BTreeMap<&str, &AttributeValue> {
    attributes
        .iter()
        .map(|a| (a.name.as_str(), &a.value))
        .collect()
}

fn symbolic_ref(
    document: &str,
    component: &str,
    binding: &DataBinding,
    attributes: &BTreeMap<&str, &AttributeValue>,
) -> Result<SymbolicRef> {
    let slug = match &binding.slug {
        SlugSource::Fixed(slug) => slug.clone(),
        SlugSource::Table {
            attribute,
            table,
            default,
        } => match attributes.get(attribute.as_str()) {
            None => default.clone().ok_or_else(|| ConversionError::UnmappedSlug {
                document: document.to_string(),
                component: component.to_string(),
                attribute: attribute.clone(),
                value: String::new(),
            })?,
            Some(value) => {
                let key = attribute_key(value);
                table
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| ConversionError::UnmappedSlug {
                        document: document.to_string(),
                        component: component.to_string(),
                        attribute: attribute.clone(),
                        value: key,
                    })?
            }
        },
    };

    Ok(SymbolicRef {
        category: binding.category.clone(),
        slug,
        field: binding.instance_field.clone(),
    })
}

/// Table key for a slug attribute: its literal text.
fn attribute_key(value: &AttributeValue) -> String {
    match value {
        AttributeValue::String(s) => s.clone(),
        AttributeValue::Flag => "true".into(),
        AttributeValue::Expression(expr) => match literal(expr) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => expr.trim().to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// Attribute value typing
// ---------------------------------------------------------------------------

fn attribute_json(
    component: &str,
    name: &str,
    value: &AttributeValue,
    location: SourceLocation,
    warnings: &mut Vec<ConversionWarning>,
) -> Value {
    match value {
        AttributeValue::String(s) => Value::String(s.clone()),
        AttributeValue::Flag => Value::Bool(true),
        AttributeValue::Expression(expr) => literal(expr).unwrap_or_else(|| {
            warnings.push(
                ConversionWarning::new(
                    WarningKind::UnparsedExpression,
                    format!("{component}: attribute {name} kept as raw expression {{{expr}}}"),
                )
                .at(location),
            );
            Value::String(expr.trim().to_string())
        }),
    }
}

/// Evaluate a `{...}` expression if it is a plain literal.
///
/// Accepts booleans, `null`, numbers, double-quoted JSON strings, and
/// single-quoted or backtick strings without escapes or interpolation.
fn literal(expr: &str) -> Option<Value> {
    let expr = expr.trim();
    if expr.is_empty() {
        return None;
    }
    if let Some(inner) = quoted(expr, '\'').or_else(|| quoted(expr, '`')) {
        if inner.contains('\\') || inner.contains("${") {
            return None;
        }
        return Some(Value::String(inner.to_string()));
    }
    match serde_json::from_str::<Value>(expr) {
        Ok(v @ (Value::Bool(_) | Value::Null | Value::Number(_) | Value::String(_))) => Some(v),
        _ => None,
    }
}

fn quoted(expr: &str, quote: char) -> Option<&str> {
    let inner = expr.strip_prefix(quote)?.strip_suffix(quote)?;
    (!inner.contains(quote)).then_some(inner)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use docweave_shared::FieldValue;

    use super::*;

    const REGISTRY: &str = r#"
[components.Note]
status = "implemented"
component_type = "wrapper"

[components.PhoneNumber]
status = "implemented"
component_type = "inline"
can_render_inline = true
field_map = { label = "label" }
data = { category = "phone-numbers", instance_slug = "example-phone" }

[components.Callout]
status = "needs-work"
component_type = "block"
can_render_block = true
target_block_type = "callout"
field_map = { kind = "variant", open = "expanded", level = "level" }
children_field = "content"
note = "icons not mapped"

[components.Badge]
status = "implemented"
component_type = "block"
can_render_block = true
can_render_inline = true

[components.Address]
status = "implemented"
component_type = "inline"
can_render_inline = true
can_render_block = true

[components.Address.data]
category = "addresses"
instance_field = "address"
slug_attribute = "office"
default_slug = "hq"
slug_table = { london = "office-london", paris = "office-paris" }

[components.Banner]
status = "deprecated"
reason = "use Callout"
"#;

    fn registry() -> Registry {
        Registry::from_toml(REGISTRY).expect("registry")
    }

    fn attr(name: &str, value: AttributeValue) -> Attribute {
        Attribute {
            name: name.into(),
            value,
        }
    }

    fn string(s: &str) -> AttributeValue {
        AttributeValue::String(s.into())
    }

    fn run<'r>(
        registry: &'r Registry,
        name: &'r str,
        attributes: &'r [Attribute],
        standalone: bool,
        warnings: &mut Vec<ConversionWarning>,
    ) -> Result<Extraction<'r>> {
        extract(
            "doc.mdx",
            Invocation {
                name,
                attributes,
                location: SourceLocation::new(4, 2),
                standalone,
            },
            registry,
            warnings,
        )
    }

    #[test]
    fn wrapper_flattens() {
        let registry = registry();
        let mut warnings = Vec::new();
        let out = run(&registry, "Note", &[], true, &mut warnings).expect("extract");
        assert_eq!(out, Extraction::Flatten);
        assert!(warnings.is_empty());
    }

    #[test]
    fn inline_component_carries_fixed_reference() {
        let registry = registry();
        let mut warnings = Vec::new();
        let attributes = [attr("label", string("Call"))];
        let out = run(
            &registry,
            "PhoneNumber",
            &attributes,
            false,
            &mut warnings,
        )
        .expect("extract");
        let Extraction::Placeholder {
            placeholder,
            placement,
            children_field,
        } = out
        else {
            panic!("expected placeholder, got {out:?}");
        };
        assert_eq!(placement, Placement::Inline);
        assert_eq!(children_field, None);
        assert_eq!(placeholder.block_type, "phoneNumber");
        assert_eq!(placeholder.fields["label"], FieldValue::from("Call"));
        assert_eq!(
            placeholder.reference,
            Some(SymbolicRef {
                category: "phone-numbers".into(),
                slug: "example-phone".into(),
                field: "instanceId".into(),
            })
        );
    }

    #[test]
    fn block_fields_are_typed_and_unmapped_dropped() {
        let registry = registry();
        let mut warnings = Vec::new();
        let attributes = [
            attr("kind", string("info")),
            attr("open", AttributeValue::Flag),
            attr("level", AttributeValue::Expression("2".into())),
            attr("icon", string("bell")),
            attr("kind", string("warning")),
        ];
        let out = run(&registry, "Callout", &attributes, true, &mut warnings).expect("extract");
        let Extraction::Placeholder {
            placeholder,
            placement,
            children_field,
        } = out
        else {
            panic!("expected placeholder");
        };
        assert_eq!(placement, Placement::Block);
        assert_eq!(children_field, Some("content"));
        assert_eq!(placeholder.block_type, "callout");
        assert_eq!(placeholder.fields["variant"], FieldValue::from("warning"));
        assert_eq!(placeholder.fields["expanded"], FieldValue::Json(json!(true)));
        assert_eq!(placeholder.fields["level"], FieldValue::Json(json!(2)));
        assert!(!placeholder.fields.contains_key("icon"));

        let kinds: Vec<_> = warnings.iter().map(|w| w.kind).collect();
        assert_eq!(
            kinds,
            vec![WarningKind::ComponentNeedsWork, WarningKind::DroppedAttribute]
        );
        assert!(warnings[0].message.contains("icons not mapped"));
    }

    #[test]
    fn placement_follows_render_flags() {
        let registry = registry();
        let mut warnings = Vec::new();

        let inline_block = run(&registry, "Badge", &[], false, &mut warnings).expect("extract");
        assert!(matches!(
            inline_block,
            Extraction::Placeholder {
                placement: Placement::Inline,
                ..
            }
        ));

        let standalone_inline =
            run(&registry, "Address", &[], true, &mut warnings).expect("extract");
        assert!(matches!(
            standalone_inline,
            Extraction::Placeholder {
                placement: Placement::Block,
                ..
            }
        ));

        let standalone_phone =
            run(&registry, "PhoneNumber", &[], true, &mut warnings).expect("extract");
        assert!(matches!(
            standalone_phone,
            Extraction::Placeholder {
                placement: Placement::Inline,
                ..
            }
        ));
    }

    #[test]
    fn slug_table_lookup_and_default() {
        let registry = registry();
        let mut warnings = Vec::new();

        let attributes = [attr("office", string("paris"))];
        let out = run(
            &registry,
            "Address",
            &attributes,
            false,
            &mut warnings,
        )
        .expect("extract");
        let Extraction::Placeholder { placeholder, .. } = out else {
            panic!("expected placeholder");
        };
        let reference = placeholder.reference.expect("reference");
        assert_eq!(reference.slug, "office-paris");
        assert_eq!(reference.field, "address");
        assert!(warnings.is_empty(), "slug attribute is consumed: {warnings:?}");

        let out = run(&registry, "Address", &[], false, &mut warnings).expect("extract");
        let Extraction::Placeholder { placeholder, .. } = out else {
            panic!("expected placeholder");
        };
        assert_eq!(placeholder.reference.map(|r| r.slug).as_deref(), Some("hq"));
    }

    #[test]
    fn unknown_slug_value_is_fatal() {
        let registry = registry();
        let mut warnings = Vec::new();
        let err = run(
            &registry,
            "Address",
            &[attr("office", string("tokyo"))],
            false,
            &mut warnings,
        )
        .unwrap_err();
        match err {
            ConversionError::UnmappedSlug {
                document,
                component,
                attribute,
                value,
            } => {
                assert_eq!(document, "doc.mdx");
                assert_eq!(component, "Address");
                assert_eq!(attribute, "office");
                assert_eq!(value, "tokyo");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn misses_and_deprecated_are_unhandled() {
        let registry = registry();
        let mut warnings = Vec::new();
        assert_eq!(
            run(&registry, "UnknownWidget", &[], true, &mut warnings).expect("extract"),
            Extraction::Unhandled {
                deprecated: false,
                reason: None
            }
        );
        assert_eq!(
            run(&registry, "Banner", &[], true, &mut warnings).expect("extract"),
            Extraction::Unhandled {
                deprecated: true,
                reason: Some("use Callout")
            }
        );
    }

    #[test]
    fn expression_literals() {
        assert_eq!(literal("true"), Some(json!(true)));
        assert_eq!(literal(" 3.5 "), Some(json!(3.5)));
        assert_eq!(literal("null"), Some(Value::Null));
        assert_eq!(literal("\"a\\\"b\""), Some(json!("a\"b")));
        assert_eq!(literal("'single'"), Some(json!("single")));
        assert_eq!(literal("`tick`"), Some(json!("tick")));
        assert_eq!(literal("`${x}`"), None);
        assert_eq!(literal("[1, 2]"), None);
        assert_eq!(literal("props.value"), None);
    }

    #[test]
    fn raw_expression_is_kept_with_warning() {
        let mut warnings = Vec::new();
        let value = attribute_json(
            "Chart",
            "data",
            &AttributeValue::Expression("items.map(f)".into()),
            SourceLocation::new(1, 1),
            &mut warnings,
        );
        assert_eq!(value, json!("items.map(f)"));
        assert_eq!(warnings[0].kind, WarningKind::UnparsedExpression);
    }
}
