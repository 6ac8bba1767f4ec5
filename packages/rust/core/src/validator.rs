//! Structural validation of a finalized editor-state tree.
//!
//! Works on the serialized JSON so it checks exactly what a consumer would
//! receive. Every violation is collected; the caller decides whether they
//! are fatal.

use serde_json::{Map, Value};

use docweave_shared::{SYMBOLIC_REF_KEY, Violation, ViolationKind};

/// Element node types that must carry a `children` array.
const ELEMENT_TYPES: &[&str] = &[
    "root",
    "paragraph",
    "heading",
    "list",
    "listitem",
    "quote",
    "link",
];

const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

/// Validate a `{"root": {...}}` document and return every violation found.
pub fn validate(state: &Value) -> Vec<Violation> {
    let mut violations = Vec::new();
    validate_root(state, "", &mut violations);
    violations
}

fn validate_root(state: &Value, prefix: &str, out: &mut Vec<Violation>) {
    let root_path = format!("{prefix}/root");
    let Some(root) = state.get("root").and_then(Value::as_object) else {
        push(out, prefix, ViolationKind::RootShape, "document has no root object");
        return;
    };
    if root.get("type").and_then(Value::as_str) != Some("root") {
        push(
            out,
            &root_path,
            ViolationKind::RootShape,
            "root node type must be \"root\"",
        );
    }
    if !root.get("children").is_some_and(Value::is_array) {
        push(
            out,
            &root_path,
            ViolationKind::RootShape,
            "root node has no children array",
        );
    }
    validate_node(root, &root_path, out);
}

fn validate_node(node: &Map<String, Value>, path: &str, out: &mut Vec<Violation>) {
    let node_type = node.get("type").and_then(Value::as_str);
    if node_type.is_none() {
        push(out, path, ViolationKind::MissingType, "node has no type");
    }
    if !node.get("version").is_some_and(Value::is_number) {
        push(out, path, ViolationKind::MissingVersion, "node has no numeric version");
    }
    if node.contains_key(SYMBOLIC_REF_KEY) {
        push(
            out,
            &pointer(path, SYMBOLIC_REF_KEY),
            ViolationKind::LeftoverReference,
            "unresolved reference left in node",
        );
    }

    match node_type {
        Some("heading") => {
            let tag = node.get("tag").and_then(Value::as_str);
            if !tag.is_some_and(|t| HEADING_TAGS.contains(&t)) {
                push(
                    out,
                    &pointer(path, "tag"),
                    ViolationKind::HeadingTag,
                    format!("heading tag {tag:?} is not h1-h6"),
                );
            }
        }
        Some("text") => {
            let format = node.get("format");
            if !format.and_then(Value::as_u64).is_some_and(|f| f <= 15) {
                push(
                    out,
                    &pointer(path, "format"),
                    ViolationKind::FormatRange,
                    format!(
                        "text format {} is not an integer in 0..=15",
                        format.map_or_else(|| "<missing>".to_string(), Value::to_string)
                    ),
                );
            }
        }
        Some("block" | "inlineBlock") => validate_fields(node, path, out),
        _ => {}
    }

    let children_path = pointer(path, "children");
    match node.get("children") {
        Some(Value::Array(children)) => {
            for (index, child) in children.iter().enumerate() {
                let child_path = format!("{children_path}/{index}");
                match child.as_object() {
                    Some(child) => validate_node(child, &child_path, out),
                    None => push(
                        out,
                        &child_path,
                        ViolationKind::MalformedNode,
                        "child is not an object",
                    ),
                }
            }
        }
        Some(_) => push(
            out,
            &children_path,
            ViolationKind::MalformedNode,
            "children is not an array",
        ),
        None => {
            if node_type.is_some_and(|t| ELEMENT_TYPES.contains(&t) && t != "root") {
                push(
                    out,
                    path,
                    ViolationKind::MalformedNode,
                    "element node has no children array",
                );
            }
        }
    }
}

fn validate_fields(node: &Map<String, Value>, path: &str, out: &mut Vec<Violation>) {
    let fields_path = pointer(path, "fields");
    let Some(fields) = node.get("fields").and_then(Value::as_object) else {
        push(out, &fields_path, ViolationKind::MalformedNode, "placeholder has no fields");
        return;
    };
    if !fields.get("blockType").is_some_and(Value::is_string) {
        push(
            out,
            &fields_path,
            ViolationKind::MalformedNode,
            "placeholder has no blockType",
        );
    }
    for (key, value) in fields {
        let field_path = pointer(&fields_path, key);
        if key == SYMBOLIC_REF_KEY {
            push(
                out,
                &field_path,
                ViolationKind::LeftoverReference,
                format!("unresolved reference {value}"),
            );
            continue;
        }
        if value.get("root").is_some() {
            validate_root(value, &field_path, out);
        }
    }
}

/// Append one JSON-pointer segment.
fn pointer(path: &str, segment: &str) -> String {
    format!("{path}/{}", segment.replace('~', "~0").replace('/', "~1"))
}

fn push(out: &mut Vec<Violation>, path: &str, kind: ViolationKind, message: impl Into<String>) {
    out.push(Violation {
        path: path.to_string(),
        kind,
        message: message.into(),
    });
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use docweave_shared::{
        BlockNode, Document, InlineNode, List, ListItem, ListItemChild, ListKind, Placeholder,
        SymbolicRef, TextFormat,
    };

    use super::*;

    fn kinds(violations: &[Violation]) -> Vec<ViolationKind> {
        violations.iter().map(|v| v.kind).collect()
    }

    #[test]
    fn rendered_documents_are_valid() {
        let inner = Document {
            children: vec![BlockNode::Quote {
                children: vec![InlineNode::text("q", TextFormat::ITALIC)],
            }],
        };
        let doc = Document {
            children: vec![
                BlockNode::Heading {
                    level: 6,
                    children: vec![InlineNode::text("t", TextFormat::PLAIN)],
                },
                BlockNode::List(List {
                    kind: ListKind::Bullet,
                    start: 1,
                    items: vec![ListItem {
                        value: 1,
                        children: vec![ListItemChild::Inline(InlineNode::Link {
                            url: "https://example.com".into(),
                            new_tab: false,
                            children: vec![InlineNode::text(
                                "x",
                                TextFormat::BOLD | TextFormat::UNDERLINE,
                            )],
                        })],
                    }],
                }),
                BlockNode::Block(Placeholder::new("callout").with_field("content", inner)),
            ],
        };
        assert_eq!(validate(&doc.to_json()), vec![]);
    }

    #[test]
    fn root_shape() {
        let v = validate(&json!({ "nodes": [] }));
        assert_eq!(kinds(&v), vec![ViolationKind::RootShape]);
        assert_eq!(v[0].path, "");

        let v = validate(&json!({ "root": { "type": "paragraph", "version": 1 } }));
        assert_eq!(
            kinds(&v),
            vec![
                ViolationKind::RootShape,
                ViolationKind::RootShape,
                ViolationKind::MalformedNode,
            ]
        );
    }

    #[test]
    fn collects_every_violation_with_paths() {
        let state = json!({
            "root": {
                "type": "root",
                "version": 1,
                "children": [
                    { "type": "heading", "tag": "h7", "version": 1, "children": [] },
                    {
                        "type": "paragraph",
                        "children": [
                            { "type": "text", "text": "a", "format": 16, "version": 1 },
                            { "text": "b", "format": 0, "version": 1 }
                        ]
                    },
                    {
                        "type": "inlineBlock",
                        "version": 1,
                        "fields": {
                            "blockType": "phoneNumber",
                            "$ref": { "category": "phones", "slug": "main" }
                        }
                    }
                ]
            }
        });
        let v = validate(&state);
        assert_eq!(
            kinds(&v),
            vec![
                ViolationKind::HeadingTag,
                ViolationKind::MissingVersion,
                ViolationKind::FormatRange,
                ViolationKind::MissingType,
                ViolationKind::LeftoverReference,
            ]
        );
        assert_eq!(v[0].path, "/root/children/0/tag");
        assert_eq!(v[1].path, "/root/children/1");
        assert_eq!(v[2].path, "/root/children/1/children/0/format");
        assert_eq!(v[3].path, "/root/children/1/children/1");
        assert_eq!(v[4].path, "/root/children/2/fields/$ref");
    }

    #[test]
    fn pending_reference_from_tree_is_flagged() {
        let mut placeholder = Placeholder::new("phoneNumber");
        placeholder.reference = Some(SymbolicRef {
            category: "phones".into(),
            slug: "main".into(),
            field: "instanceId".into(),
        });
        let doc = Document {
            children: vec![BlockNode::Paragraph {
                children: vec![InlineNode::InlineBlock(placeholder)],
            }],
        };
        let v = validate(&doc.to_json());
        assert_eq!(kinds(&v), vec![ViolationKind::LeftoverReference]);
    }

    #[test]
    fn nested_rich_text_is_checked_with_prefix() {
        let state = json!({
            "root": {
                "type": "root",
                "version": 1,
                "children": [{
                    "type": "block",
                    "version": 2,
                    "fields": {
                        "blockType": "callout",
                        "content": { "root": { "type": "root", "version": 1, "children": [
                            { "type": "heading", "tag": "h0", "version": 1, "children": [] }
                        ] } }
                    }
                }]
            }
        });
        let v = validate(&state);
        assert_eq!(kinds(&v), vec![ViolationKind::HeadingTag]);
        assert_eq!(
            v[0].path,
            "/root/children/0/fields/content/root/children/0/tag"
        );
    }

    #[test]
    fn placeholder_without_block_type() {
        let state = json!({ "root": { "type": "root", "version": 1, "children": [
            { "type": "block", "version": 2, "fields": {} }
        ] } });
        let v = validate(&state);
        assert_eq!(kinds(&v), vec![ViolationKind::MalformedNode]);
    }

    #[test]
    fn pointer_segments_are_escaped() {
        assert_eq!(pointer("/a", "b/c~d"), "/a/b~1c~0d");
    }
}
