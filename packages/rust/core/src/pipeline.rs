//! Conversion pipeline: source → parse → transform → resolve → validate.
//!
//! [`prepare`] is the pure half (no I/O). [`convert`] runs one document end
//! to end. [`Converter`] owns the shared registry snapshot and store, and
//! converts batches concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use docweave_markdown::{FrontMatter, parse_document};
use docweave_shared::{
    AppConfig, ConversionError, ConversionWarning, ConvertOptions, Document, InstanceStore,
    Result, UnhandledComponent, ValidationPolicy, WarningKind,
};

use crate::registry::Registry;
use crate::resolver::{
    self, ReferenceSet, ResolveStats, ResolvedIds, apply_references, collect_references,
    lookup_references,
};
use crate::transform::transform;
use crate::validator::validate;

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// One source document to convert.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Caller-chosen identifier, used in every diagnostic.
    pub id: String,
    pub source: String,
}

impl RawDocument {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
        }
    }

    /// Build from raw bytes, rejecting input that is not UTF-8.
    pub fn from_bytes(id: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let id = id.into();
        let source = String::from_utf8(bytes).map_err(|e| {
            ConversionError::parse(&id, format!("source is not valid UTF-8: {e}"))
        })?;
        Ok(Self { id, source })
    }

    /// SHA-256 of the source text, hex encoded.
    pub fn source_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A parsed and transformed document whose references are still pending.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub id: String,
    pub document: Document,
    pub front_matter: FrontMatter,
    pub warnings: Vec<ConversionWarning>,
    pub unhandled: Vec<UnhandledComponent>,
    pub source_hash: String,
}

impl PreparedDocument {
    pub fn references(&self) -> ReferenceSet {
        collect_references(&self.document)
    }
}

/// A finished conversion.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    pub document_id: String,
    pub document: Document,
    pub front_matter: FrontMatter,
    pub warnings: Vec<ConversionWarning>,
    pub source_hash: String,
    pub stats: ResolveStats,
}

impl ConversionOutput {
    /// The `{"root": {...}}` editor state.
    pub fn editor_state(&self) -> Value {
        self.document.to_json()
    }
}

// ---------------------------------------------------------------------------
// Single-document entry points
// ---------------------------------------------------------------------------

/// Parse and transform without touching the data store.
///
/// In strict mode a document using unhandled components fails here with
/// [`ConversionError::UnregisteredComponent`].
pub fn prepare(
    raw: &RawDocument,
    registry: &Registry,
    options: &ConvertOptions,
) -> Result<PreparedDocument> {
    let prepared = prepare_unchecked(raw, registry, options)?;
    if options.strict && !prepared.unhandled.is_empty() {
        return Err(ConversionError::UnregisteredComponent {
            document: prepared.id,
            components: prepared.unhandled,
        });
    }
    Ok(prepared)
}

fn prepare_unchecked(
    raw: &RawDocument,
    registry: &Registry,
    options: &ConvertOptions,
) -> Result<PreparedDocument> {
    let parsed = parse_document(&raw.id, &raw.source)?;
    let transformed = transform(&raw.id, &parsed.blocks, registry, options.strict)?;

    let mut warnings = parsed.warnings;
    warnings.extend(transformed.warnings);

    Ok(PreparedDocument {
        id: raw.id.clone(),
        document: transformed.document,
        front_matter: parsed.front_matter,
        warnings,
        unhandled: transformed.unhandled,
        source_hash: raw.source_hash(),
    })
}

/// Resolve references and validate a prepared document.
pub async fn finalize<S: InstanceStore>(
    mut prepared: PreparedDocument,
    store: &S,
    options: &ConvertOptions,
) -> Result<ConversionOutput> {
    let stats = resolver::resolve(
        &prepared.id,
        &mut prepared.document,
        store,
        options.lookup_timeout,
    )
    .await?;
    complete(prepared, stats, options.validation)
}

/// Convert one document end to end.
#[instrument(skip_all, fields(document = %raw.id))]
pub async fn convert<S: InstanceStore>(
    raw: &RawDocument,
    registry: &Registry,
    store: &S,
    options: &ConvertOptions,
) -> Result<ConversionOutput> {
    let start = Instant::now();
    let prepared = prepare(raw, registry, options)?;
    let output = finalize(prepared, store, options).await?;
    info!(
        warnings = output.warnings.len(),
        references = output.stats.references,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "document converted"
    );
    Ok(output)
}

/// Validate the resolved tree and build the output.
fn complete(
    prepared: PreparedDocument,
    stats: ResolveStats,
    policy: ValidationPolicy,
) -> Result<ConversionOutput> {
    let mut warnings = prepared.warnings;
    let violations = validate(&prepared.document.to_json());

    if !violations.is_empty() {
        match policy {
            ValidationPolicy::Reject => {
                return Err(ConversionError::StructuralValidation {
                    document: prepared.id,
                    violations,
                });
            }
            ValidationPolicy::Warn => {
                warn!(
                    document = %prepared.id,
                    violations = violations.len(),
                    "structural violations kept as warnings"
                );
                warnings.extend(violations.iter().map(|v| {
                    ConversionWarning::new(WarningKind::StructuralValidation, v.to_string())
                }));
            }
        }
    }

    Ok(ConversionOutput {
        document_id: prepared.id,
        document: prepared.document,
        front_matter: prepared.front_matter,
        warnings,
        source_hash: prepared.source_hash,
        stats,
    })
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Totals reported when a batch finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub converted: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

/// Progress callback for reporting batch status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called as each document's outcome becomes known, in input order.
    fn document_finished(&self, document: &str, current: usize, total: usize, ok: bool);
    /// Called when the batch completes.
    fn done(&self, summary: &BatchSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn document_finished(&self, _document: &str, _current: usize, _total: usize, _ok: bool) {}
    fn done(&self, _summary: &BatchSummary) {}
}

// ---------------------------------------------------------------------------
// Batch converter
// ---------------------------------------------------------------------------

/// Result for one document of a batch.
#[derive(Debug)]
pub struct DocumentOutcome {
    pub document_id: String,
    pub result: Result<ConversionOutput>,
}

impl DocumentOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Converts documents against one registry snapshot and one data store.
pub struct Converter<S> {
    registry: Arc<Registry>,
    store: Arc<S>,
    options: ConvertOptions,
}

impl<S: InstanceStore + 'static> Converter<S> {
    pub fn new(registry: Arc<Registry>, store: Arc<S>, options: ConvertOptions) -> Self {
        Self {
            registry,
            store,
            options,
        }
    }

    /// Build the registry and options from application config.
    pub fn from_config(config: &AppConfig, store: Arc<S>) -> Result<Self> {
        let registry = Registry::from_config(config)?;
        Ok(Self::new(
            Arc::new(registry),
            store,
            ConvertOptions::from(config),
        ))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    pub async fn convert(&self, raw: &RawDocument) -> Result<ConversionOutput> {
        convert(raw, &self.registry, self.store.as_ref(), &self.options).await
    }

    /// Convert a batch of documents.
    ///
    /// Every document is prepared first. In strict mode, any unhandled
    /// component anywhere blocks the whole batch and the returned error
    /// lists them all. Otherwise each document's outcome is independent and
    /// outcomes are returned in input order.
    #[instrument(skip_all, fields(documents = documents.len(), shared = self.options.shared_lookup))]
    pub async fn convert_batch(
        &self,
        documents: Vec<RawDocument>,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<DocumentOutcome>> {
        let start = Instant::now();
        let total = documents.len();

        progress.phase("Preparing documents");
        let prepared: Vec<(String, Result<PreparedDocument>)> = documents
            .iter()
            .map(|raw| {
                (
                    raw.id.clone(),
                    prepare_unchecked(raw, &self.registry, &self.options),
                )
            })
            .collect();

        if self.options.strict {
            strict_gate(&prepared)?;
        }

        progress.phase("Resolving references");
        let results = if self.options.shared_lookup {
            self.finalize_shared(prepared).await
        } else {
            self.finalize_each(prepared).await
        };

        let mut outcomes = Vec::with_capacity(total);
        for (index, (document_id, result)) in results.into_iter().enumerate() {
            if let Err(e) = &result {
                warn!(document = %document_id, error = %e, "document failed");
            }
            progress.document_finished(&document_id, index + 1, total, result.is_ok());
            outcomes.push(DocumentOutcome {
                document_id,
                result,
            });
        }

        let converted = outcomes.iter().filter(|o| o.is_ok()).count();
        let summary = BatchSummary {
            total,
            converted,
            failed: total - converted,
            elapsed: start.elapsed(),
        };
        info!(
            total,
            converted,
            failed = summary.failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "batch complete"
        );
        progress.done(&summary);
        Ok(outcomes)
    }

    /// Resolve each document independently on its own task.
    async fn finalize_each(
        &self,
        prepared: Vec<(String, Result<PreparedDocument>)>,
    ) -> Vec<(String, Result<ConversionOutput>)> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut handles = Vec::with_capacity(prepared.len());

        for (id, result) in prepared {
            let document = match result {
                Ok(document) => document,
                Err(e) => {
                    handles.push((id, None, Some(e)));
                    continue;
                }
            };
            let sem = semaphore.clone();
            let store = self.store.clone();
            let options = self.options.clone();
            let handle = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.map_err(|e| ConversionError::Aborted {
                    document: document.id.clone(),
                    message: e.to_string(),
                })?;
                finalize(document, store.as_ref(), &options).await
            });
            handles.push((id, Some(handle), None));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (id, handle, early) in handles {
            let result = match (handle, early) {
                (Some(handle), _) => match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(ConversionError::Aborted {
                        document: id.clone(),
                        message: e.to_string(),
                    }),
                },
                (None, Some(e)) => Err(e),
                (None, None) => Err(ConversionError::Aborted {
                    document: id.clone(),
                    message: "no task was started".into(),
                }),
            };
            results.push((id, result));
        }
        results
    }

    /// Resolve every document's references with one store call per
    /// category across the whole batch.
    async fn finalize_shared(
        &self,
        prepared: Vec<(String, Result<PreparedDocument>)>,
    ) -> Vec<(String, Result<ConversionOutput>)> {
        let sets: Vec<Option<ReferenceSet>> = prepared
            .iter()
            .map(|(_, r)| r.as_ref().ok().map(PreparedDocument::references))
            .collect();

        let mut merged = ReferenceSet::default();
        for set in sets.iter().flatten() {
            merged.merge(set);
        }

        let label = prepared
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(id, _)| id.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let mut resolved = ResolvedIds::default();
        let mut failed: BTreeMap<String, ConversionError> = BTreeMap::new();
        for (category, slugs) in merged.categories() {
            let mut single = ReferenceSet::default();
            for slug in slugs {
                single.insert(category, slug);
            }
            match lookup_references(&label, &single, self.store.as_ref(), self.options.lookup_timeout)
                .await
            {
                Ok(ids) => resolved.merge(ids),
                Err(e) => {
                    failed.insert(category.to_string(), e);
                }
            }
        }
        debug!(
            categories = merged.categories().count(),
            calls = resolved.calls(),
            failed = failed.len(),
            "shared lookup complete"
        );

        prepared
            .into_iter()
            .zip(sets)
            .map(|((id, result), set)| {
                let result = result.and_then(|mut document| {
                    let set = set.unwrap_or_default();
                    if let Some((category, e)) = set
                        .categories()
                        .find_map(|(c, _)| failed.get(c).map(|e| (c, e)))
                    {
                        return Err(reattribute(&document.id, category, e));
                    }
                    let substituted =
                        apply_references(&document.id, &mut document.document, &resolved)?;
                    let stats = ResolveStats {
                        references: set.len(),
                        substituted,
                        store_calls: set.categories().count(),
                    };
                    complete(document, stats, self.options.validation)
                });
                (id, result)
            })
            .collect()
    }
}

/// Fail the batch if any document uses unhandled components.
fn strict_gate(prepared: &[(String, Result<PreparedDocument>)]) -> Result<()> {
    let mut offenders = Vec::new();
    let mut components: Vec<UnhandledComponent> = Vec::new();

    for (id, result) in prepared {
        let Ok(document) = result else {
            continue;
        };
        if document.unhandled.is_empty() {
            continue;
        }
        offenders.push(id.as_str());
        for component in &document.unhandled {
            match components.iter_mut().find(|c| c.name == component.name) {
                Some(existing) => existing.count += component.count,
                None => components.push(component.clone()),
            }
        }
    }

    if offenders.is_empty() {
        return Ok(());
    }
    warn!(
        documents = offenders.len(),
        components = components.len(),
        "unhandled components block the batch"
    );
    Err(ConversionError::UnregisteredComponent {
        document: offenders.join(", "),
        components,
    })
}

/// Copy a shared lookup failure onto one document.
fn reattribute(document: &str, category: &str, error: &ConversionError) -> ConversionError {
    match error {
        ConversionError::Timeout { timeout_ms, .. } => ConversionError::Timeout {
            document: document.to_string(),
            category: category.to_string(),
            timeout_ms: *timeout_ms,
        },
        ConversionError::Lookup { message, .. } => ConversionError::Lookup {
            document: document.to_string(),
            category: category.to_string(),
            message: message.clone(),
        },
        other => ConversionError::Lookup {
            document: document.to_string(),
            category: category.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use docweave_shared::{
        BlockNode, InlineNode, MemoryStore, SYMBOLIC_REF_KEY, TextFormat, ViolationKind,
        load_config_from,
    };

    use super::*;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures")
            .join(name)
    }

    fn config() -> AppConfig {
        load_config_from(&fixture("docweave.toml")).expect("fixture config")
    }

    fn registry() -> Registry {
        Registry::from_config(&config()).expect("fixture registry")
    }

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with("phone-numbers", "example-phone", "abc123")
            .with("phone-numbers", "support-line", "def456")
            .with("addresses", "office-london", "addr-1")
            .with("addresses", "office-hq", "addr-0")
    }

    /// Records every call; fails categories listed in `failing`.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryStore,
        failing: Vec<String>,
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl RecordingStore {
        fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    impl InstanceStore for RecordingStore {
        async fn batch_resolve(
            &self,
            category: &str,
            slugs: &[String],
        ) -> Result<HashMap<String, String>> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((category.to_string(), slugs.to_vec()));
            }
            if self.failing.iter().any(|c| c == category) {
                return Err(ConversionError::Storage(format!("{category} unavailable")));
            }
            self.inner.batch_resolve(category, slugs).await
        }
    }

    #[tokio::test]
    async fn heading_and_paragraph_document() {
        let raw = RawDocument::new("a.mdx", "# Title\n\nHello **world**.");
        let out = convert(&raw, &registry(), &store(), &ConvertOptions::default())
            .await
            .expect("convert");
        assert_eq!(
            out.document.children,
            vec![
                BlockNode::Heading {
                    level: 1,
                    children: vec![InlineNode::text("Title", TextFormat::PLAIN)],
                },
                BlockNode::Paragraph {
                    children: vec![
                        InlineNode::text("Hello ", TextFormat::PLAIN),
                        InlineNode::text("world", TextFormat::BOLD),
                        InlineNode::text(".", TextFormat::PLAIN),
                    ],
                },
            ]
        );
        assert!(out.warnings.is_empty());
        assert_eq!(out.source_hash.len(), 64);
        assert_eq!(out.editor_state()["root"]["children"][0]["tag"], "h1");
    }

    #[tokio::test]
    async fn phone_number_resolves_to_instance_id() {
        let raw = RawDocument::new("phone.mdx", "<PhoneNumber />");
        let out = convert(&raw, &registry(), &store(), &ConvertOptions::default())
            .await
            .expect("convert");

        let BlockNode::Paragraph { children } = &out.document.children[0] else {
            panic!("expected paragraph, got {:?}", out.document.children);
        };
        assert_eq!(children.len(), 1);
        let state = out.editor_state();
        let node = &state["root"]["children"][0]["children"][0];
        assert_eq!(node["type"], "inlineBlock");
        assert_eq!(node["fields"]["instanceId"], "abc123");
        assert!(node["fields"].get(SYMBOLIC_REF_KEY).is_none());
        assert_eq!(out.stats.store_calls, 1);
    }

    #[tokio::test]
    async fn unknown_widget_fails_strict_conversion() {
        let raw = RawDocument::new("w.mdx", "<UnknownWidget foo=\"bar\" />");
        let err = convert(&raw, &registry(), &store(), &ConvertOptions::default())
            .await
            .unwrap_err();
        match err {
            ConversionError::UnregisteredComponent {
                document,
                components,
            } => {
                assert_eq!(document, "w.mdx");
                assert_eq!(components.len(), 1);
                assert_eq!(components[0].name, "UnknownWidget");
                assert_eq!(components[0].count, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn lenient_mode_keeps_literal_and_warns() {
        let raw = RawDocument::new("w.mdx", "Before <UnknownWidget foo=\"bar\" /> after");
        let options = ConvertOptions::default().lenient();
        let out = convert(&raw, &registry(), &store(), &options)
            .await
            .expect("convert");
        assert_eq!(
            out.document.plain_text(),
            "Before <UnknownWidget foo=\"bar\" /> after"
        );
        assert!(
            out.warnings
                .iter()
                .any(|w| w.kind == WarningKind::UnregisteredComponent)
        );
    }

    #[tokio::test]
    async fn sample_fixture_converts() {
        let source = std::fs::read_to_string(fixture("getting-started.mdx")).expect("fixture");
        let raw = RawDocument::new("getting-started.mdx", source);
        let out = convert(&raw, &registry(), &store(), &ConvertOptions::default())
            .await
            .expect("convert");

        assert_eq!(out.front_matter.text("title"), Some("Getting started"));
        assert!(validate(&out.editor_state()).is_empty());
        let json = out.editor_state().to_string();
        assert!(json.contains("\"instanceId\":\"abc123\""));
        assert!(json.contains("\"address\":\"addr-1\""));
        assert!(!json.contains(SYMBOLIC_REF_KEY));
        assert_eq!(out.stats.store_calls, 2);
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_parse_error() {
        let err = RawDocument::from_bytes("bin.mdx", vec![0xc3, 0x28]).unwrap_err();
        assert!(matches!(err, ConversionError::Parse { .. }));
    }

    #[test]
    fn reject_policy_fails_on_violations() {
        let mut document = Document::default();
        document.children.push(BlockNode::Heading {
            level: 9,
            children: vec![],
        });
        let prepared = PreparedDocument {
            id: "bad.mdx".into(),
            document,
            front_matter: FrontMatter::default(),
            warnings: vec![],
            unhandled: vec![],
            source_hash: String::new(),
        };

        let err = complete(
            prepared.clone(),
            ResolveStats::default(),
            ValidationPolicy::Reject,
        )
        .unwrap_err();
        match err {
            ConversionError::StructuralValidation {
                document,
                violations,
            } => {
                assert_eq!(document, "bad.mdx");
                assert_eq!(violations[0].kind, ViolationKind::HeadingTag);
            }
            other => panic!("unexpected {other:?}"),
        }

        let out = complete(prepared, ResolveStats::default(), ValidationPolicy::Warn)
            .expect("warn policy keeps the document");
        assert_eq!(out.warnings[0].kind, WarningKind::StructuralValidation);
    }

    fn batch() -> Vec<RawDocument> {
        vec![
            RawDocument::new("one.mdx", "Call <PhoneNumber /> or <PhoneNumber />."),
            RawDocument::new("two.mdx", "Visit <Address office=\"london\" />."),
            RawDocument::new("three.mdx", "Plain text only."),
            RawDocument::new("four.mdx", "Support: <SupportLine />"),
        ]
    }

    #[tokio::test]
    async fn batch_outcomes_are_isolated_and_ordered() {
        let converter = Converter::new(
            Arc::new(registry()),
            Arc::new(MemoryStore::new().with("phone-numbers", "example-phone", "abc123")),
            ConvertOptions::default(),
        );
        let outcomes = converter
            .convert_batch(batch(), &SilentProgress)
            .await
            .expect("batch");

        let ids: Vec<_> = outcomes.iter().map(|o| o.document_id.as_str()).collect();
        assert_eq!(ids, ["one.mdx", "two.mdx", "three.mdx", "four.mdx"]);
        assert!(outcomes[0].is_ok());
        assert!(matches!(
            &outcomes[1].result,
            Err(ConversionError::UnresolvedReference { category, slugs, .. })
                if category == "addresses" && slugs == &vec!["office-london".to_string()]
        ));
        assert!(outcomes[2].is_ok());
        assert!(matches!(
            &outcomes[3].result,
            Err(ConversionError::UnresolvedReference { slugs, .. })
                if slugs == &vec!["support-line".to_string()]
        ));
    }

    #[tokio::test]
    async fn strict_batch_is_blocked_by_any_unhandled_component() {
        let converter = Converter::new(
            Arc::new(registry()),
            Arc::new(store()),
            ConvertOptions::default(),
        );
        let mut documents = batch();
        documents.push(RawDocument::new("five.mdx", "<Mystery />\n\n<Mystery />"));
        documents.push(RawDocument::new("six.mdx", "<Mystery /> and <Gadget />"));

        let err = converter
            .convert_batch(documents, &SilentProgress)
            .await
            .unwrap_err();
        match err {
            ConversionError::UnregisteredComponent {
                document,
                components,
            } => {
                assert_eq!(document, "five.mdx, six.mdx");
                assert_eq!(components.len(), 2);
                assert_eq!(components[0].name, "Mystery");
                assert_eq!(components[0].count, 3);
                assert_eq!(components[1].name, "Gadget");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn shared_lookup_matches_per_document_results() {
        let store = Arc::new(RecordingStore {
            inner: store(),
            ..Default::default()
        });
        let mut options = ConvertOptions::default();
        options.shared_lookup = true;
        let converter = Converter::new(Arc::new(registry()), store.clone(), options);

        let shared = converter
            .convert_batch(batch(), &SilentProgress)
            .await
            .expect("batch");

        let calls = store.calls();
        assert_eq!(calls.len(), 2, "one call per category: {calls:?}");
        assert_eq!(calls[0].0, "addresses");
        assert_eq!(calls[1].0, "phone-numbers");
        assert_eq!(
            calls[1].1,
            vec!["example-phone".to_string(), "support-line".to_string()]
        );

        let separate = Converter::new(
            Arc::new(registry()),
            Arc::new(self::store()),
            ConvertOptions::default(),
        )
        .convert_batch(batch(), &SilentProgress)
        .await
        .expect("batch");

        for (a, b) in shared.iter().zip(&separate) {
            let a = a.result.as_ref().expect("shared outcome");
            let b = b.result.as_ref().expect("separate outcome");
            assert_eq!(a.document, b.document);
        }
    }

    #[tokio::test]
    async fn shared_lookup_failure_only_hits_referencing_documents() {
        let store = Arc::new(RecordingStore {
            inner: store(),
            failing: vec!["addresses".into()],
            ..Default::default()
        });
        let mut options = ConvertOptions::default();
        options.shared_lookup = true;
        let converter = Converter::new(Arc::new(registry()), store, options);

        let outcomes = converter
            .convert_batch(batch(), &SilentProgress)
            .await
            .expect("batch");
        assert!(outcomes[0].is_ok());
        match &outcomes[1].result {
            Err(e @ ConversionError::Lookup { document, category, .. }) => {
                assert_eq!(document, "two.mdx");
                assert_eq!(category, "addresses");
                assert!(e.is_retryable());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(outcomes[2].is_ok());
        assert!(outcomes[3].is_ok());
    }

    #[tokio::test]
    async fn from_config_uses_converter_section() {
        let converter =
            Converter::from_config(&config(), Arc::new(store())).expect("converter");
        assert!(converter.options().strict);
        assert!(converter.registry().lookup("PhoneNumber").is_some());
        let out = converter
            .convert(&RawDocument::new("x.mdx", "Hi <Phone />"))
            .await
            .expect("convert");
        assert!(out.editor_state().to_string().contains("abc123"));
    }

    #[tokio::test]
    async fn converts_against_sqlite_store() {
        let path = std::env::temp_dir().join(format!("dw_core_{}.db", uuid::Uuid::now_v7()));
        let storage = docweave_storage::Storage::open(&path).await.expect("open db");
        storage
            .upsert_instance("phone-numbers", "example-phone", "db-phone")
            .await
            .unwrap();
        storage
            .upsert_instance("addresses", "office-london", "db-addr")
            .await
            .unwrap();

        let converter = Converter::new(
            Arc::new(registry()),
            Arc::new(storage),
            ConvertOptions::default(),
        );
        let out = converter
            .convert(&RawDocument::new(
                "db.mdx",
                "Call <PhoneNumber />\n\n<Address office=\"london\" />",
            ))
            .await
            .expect("convert");
        let json = out.editor_state().to_string();
        assert!(json.contains("\"instanceId\":\"db-phone\""));
        assert!(json.contains("\"address\":\"db-addr\""));

        let err = converter
            .convert(&RawDocument::new("db2.mdx", "<SupportLine />"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::UnresolvedReference { .. }));
    }
}
