//! Deferred reference resolution.
//!
//! Three phases, exposed separately so a batch caller can merge reference
//! sets across documents:
//! 1. [`collect_references`]: walk the tree once, gather distinct slugs per category
//! 2. [`lookup_references`]: one `batch_resolve` call per category
//! 3. [`apply_references`]: substitute ids, failing on any missing slug

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use docweave_shared::{
    BlockNode, ConversionError, Document, FieldValue, InlineNode, InstanceStore, List,
    ListItemChild, Placeholder, Result,
};

// ---------------------------------------------------------------------------
// Reference sets
// ---------------------------------------------------------------------------

/// Distinct slugs per category, in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceSet {
    categories: BTreeMap<String, BTreeSet<String>>,
}

impl ReferenceSet {
    pub fn insert(&mut self, category: &str, slug: &str) {
        self.categories
            .entry(category.to_string())
            .or_default()
            .insert(slug.to_string());
    }

    /// Union `other` into `self`.
    pub fn merge(&mut self, other: &ReferenceSet) {
        for (category, slugs) in &other.categories {
            self.categories
                .entry(category.clone())
                .or_default()
                .extend(slugs.iter().cloned());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Number of distinct `(category, slug)` pairs.
    pub fn len(&self) -> usize {
        self.categories.values().map(BTreeSet::len).sum()
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.categories.iter().map(|(c, s)| (c.as_str(), s))
    }

    pub fn contains(&self, category: &str, slug: &str) -> bool {
        self.categories
            .get(category)
            .is_some_and(|slugs| slugs.contains(slug))
    }
}

/// Gather every pending reference in `document`, including nested
/// rich-text fields.
pub fn collect_references(document: &Document) -> ReferenceSet {
    let mut set = ReferenceSet::default();
    visit_placeholders(document, &mut |placeholder: &Placeholder| {
        if let Some(reference) = &placeholder.reference {
            set.insert(&reference.category, &reference.slug);
        }
    });
    set
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Ids returned by the store, per category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedIds {
    ids: HashMap<String, HashMap<String, String>>,
    calls: usize,
}

impl ResolvedIds {
    pub fn get(&self, category: &str, slug: &str) -> Option<&str> {
        self.ids.get(category)?.get(slug).map(String::as_str)
    }

    /// Store calls made to produce these ids.
    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn merge(&mut self, other: ResolvedIds) {
        for (category, ids) in other.ids {
            self.ids.entry(category).or_default().extend(ids);
        }
        self.calls += other.calls;
    }
}

/// Counters for one document's resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ResolveStats {
    /// Distinct `(category, slug)` pairs looked up.
    pub references: usize,
    /// Placeholders that received an id.
    pub substituted: usize,
    pub store_calls: usize,
}

/// Issue exactly one `batch_resolve` per category in `set`.
///
/// Each call is bounded by `timeout`. Errors are attributed to `document`,
/// which for a shared batch lookup may name several documents.
#[instrument(skip_all, fields(document = %document, categories = set.categories.len()))]
pub async fn lookup_references<S: InstanceStore>(
    document: &str,
    set: &ReferenceSet,
    store: &S,
    timeout: Duration,
) -> Result<ResolvedIds> {
    let mut resolved = ResolvedIds::default();

    for (category, slugs) in set.categories() {
        let slugs: Vec<String> = slugs.iter().cloned().collect();
        debug!(category, slugs = slugs.len(), "batch lookup");

        let ids = match tokio::time::timeout(timeout, store.batch_resolve(category, &slugs)).await
        {
            Ok(Ok(ids)) => ids,
            Ok(Err(e)) => {
                warn!(category, error = %e, "lookup failed");
                return Err(ConversionError::Lookup {
                    document: document.to_string(),
                    category: category.to_string(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                warn!(category, timeout_ms = timeout.as_millis() as u64, "lookup timed out");
                return Err(ConversionError::Timeout {
                    document: document.to_string(),
                    category: category.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };
        resolved.calls += 1;
        resolved.ids.insert(category.to_string(), ids);
    }

    Ok(resolved)
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

/// Replace every pending reference in `tree` with its resolved id.
///
/// All references are checked before anything is written, so a failure
/// leaves the tree untouched. A missing slug is fatal; there is no default.
pub fn apply_references(
    document: &str,
    tree: &mut Document,
    resolved: &ResolvedIds,
) -> Result<usize> {
    let mut missing: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    visit_placeholders(tree, &mut |placeholder: &Placeholder| {
        let Some(reference) = &placeholder.reference else {
            return;
        };
        if resolved.get(&reference.category, &reference.slug).is_none() {
            missing
                .entry(reference.category.clone())
                .or_default()
                .insert(reference.slug.clone());
        }
    });

    if let Some((category, slugs)) = missing.into_iter().next() {
        return Err(ConversionError::UnresolvedReference {
            document: document.to_string(),
            category,
            slugs: slugs.into_iter().collect(),
        });
    }

    let mut substituted = 0;
    visit_placeholders_mut(tree, &mut |placeholder: &mut Placeholder| {
        let Some(reference) = placeholder.reference.take() else {
            return;
        };
        if let Some(id) = resolved.get(&reference.category, &reference.slug) {
            placeholder
                .fields
                .insert(reference.field, FieldValue::from(id));
            substituted += 1;
        }
    });
    Ok(substituted)
}

/// Collect, look up, and substitute references in one go.
///
/// A tree without pending references makes no store calls, so resolving an
/// already resolved document is a no-op.
pub async fn resolve<S: InstanceStore>(
    document: &str,
    tree: &mut Document,
    store: &S,
    timeout: Duration,
) -> Result<ResolveStats> {
    let set = collect_references(tree);
    if set.is_empty() {
        return Ok(ResolveStats::default());
    }

    let resolved = lookup_references(document, &set, store, timeout).await?;
    let substituted = apply_references(document, tree, &resolved)?;

    info!(
        document,
        references = set.len(),
        substituted,
        calls = resolved.calls(),
        "references resolved"
    );
    Ok(ResolveStats {
        references: set.len(),
        substituted,
        store_calls: resolved.calls(),
    })
}

// ---------------------------------------------------------------------------
// Tree walking
// ---------------------------------------------------------------------------

fn visit_placeholders(document: &Document, f: &mut impl FnMut(&Placeholder)) {
    for block in &document.children {
        match block {
            BlockNode::Heading { children, .. }
            | BlockNode::Paragraph { children }
            | BlockNode::Quote { children } => visit_inlines(children, f),
            BlockNode::List(list) => visit_list(list, f),
            BlockNode::Block(placeholder) => visit_placeholder(placeholder, f),
        }
    }
}

fn visit_list(list: &List, f: &mut impl FnMut(&Placeholder)) {
    for item in &list.items {
        for child in &item.children {
            match child {
                ListItemChild::Inline(node) => visit_inlines(std::slice::from_ref(node), f),
                ListItemChild::List(nested) => visit_list(nested, f),
            }
        }
    }
}

fn visit_inlines(nodes: &[InlineNode], f: &mut impl FnMut(&Placeholder)) {
    for node in nodes {
        match node {
            InlineNode::Text { .. } => {}
            InlineNode::Link { children, .. } => visit_inlines(children, f),
            InlineNode::InlineBlock(placeholder) => visit_placeholder(placeholder, f),
        }
    }
}

fn visit_placeholder(placeholder: &Placeholder, f: &mut impl FnMut(&Placeholder)) {
    f(placeholder);
    for value in placeholder.fields.values() {
        if let FieldValue::RichText(nested) = value {
            visit_placeholders(nested, f);
        }
    }
}

fn visit_placeholders_mut(document: &mut Document, f: &mut impl FnMut(&mut Placeholder)) {
    for block in &mut document.children {
        match block {
            BlockNode::Heading { children, .. }
            | BlockNode::Paragraph { children }
            | BlockNode::Quote { children } => visit_inlines_mut(children, f),
            BlockNode::List(list) => visit_list_mut(list, f),
            BlockNode::Block(placeholder) => visit_placeholder_mut(placeholder, f),
        }
    }
}

fn visit_list_mut(list: &mut List, f: &mut impl FnMut(&mut Placeholder)) {
    for item in &mut list.items {
        for child in &mut item.children {
            match child {
                ListItemChild::Inline(node) => visit_inlines_mut(std::slice::from_mut(node), f),
                ListItemChild::List(nested) => visit_list_mut(nested, f),
            }
        }
    }
}

fn visit_inlines_mut(nodes: &mut [InlineNode], f: &mut impl FnMut(&mut Placeholder)) {
    for node in nodes {
        match node {
            InlineNode::Text { .. } => {}
            InlineNode::Link { children, .. } => visit_inlines_mut(children, f),
            InlineNode::InlineBlock(placeholder) => visit_placeholder_mut(placeholder, f),
        }
    }
}

fn visit_placeholder_mut(placeholder: &mut Placeholder, f: &mut impl FnMut(&mut Placeholder)) {
    f(placeholder);
    for value in placeholder.fields.values_mut() {
        if let FieldValue::RichText(nested) = value {
            visit_placeholders_mut(nested, f);
        }
    }
}
