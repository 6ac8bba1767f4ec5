//! The external data-store contract used by reference resolution.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{PoisonError, RwLock};

use crate::error::Result;

/// Resolves `(category, slug)` pairs to instance ids.
///
/// A slug missing from the returned map is unresolved. Implementations must
/// not invent ids for unknown slugs.
pub trait InstanceStore: Send + Sync {
    fn batch_resolve(
        &self,
        category: &str,
        slugs: &[String],
    ) -> impl Future<Output = Result<HashMap<String, String>>> + Send;
}

impl<S: InstanceStore> InstanceStore for std::sync::Arc<S> {
    fn batch_resolve(
        &self,
        category: &str,
        slugs: &[String],
    ) -> impl Future<Output = Result<HashMap<String, String>>> + Send {
        (**self).batch_resolve(category, slugs)
    }
}

/// In-process store backed by a map. Useful for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    instances: RwLock<HashMap<(String, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(self, category: &str, slug: &str, id: &str) -> Self {
        self.insert(category, slug, id);
        self
    }

    // Every write is a single `insert`, so a poisoned map is still consistent.
    pub fn insert(&self, category: &str, slug: &str, id: &str) {
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((category.to_string(), slug.to_string()), id.to_string());
    }

    pub fn len(&self) -> usize {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InstanceStore for MemoryStore {
    async fn batch_resolve(
        &self,
        category: &str,
        slugs: &[String],
    ) -> Result<HashMap<String, String>> {
        let map = self.instances.read().unwrap_or_else(PoisonError::into_inner);
        Ok(slugs
            .iter()
            .filter_map(|slug| {
                map.get(&(category.to_string(), slug.clone()))
                    .map(|id| (slug.clone(), id.clone()))
            })
            .collect())
    }
}
