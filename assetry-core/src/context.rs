use std::sync::Arc;

use crate::asset_metadata::AssetMetadataStore;
use crate::engine::InvocationEngine;
use crate::query::{PolarsQueryEngine, QueryEngine, ASSET_SCHEME};
use crate::store::{glob_escape, normalize_path, AsyncStorage, MemoryStorage};

/// Default root of run records and manifests.
pub const DEFAULT_METADATA_LOCATION: &str = ".asset_metadata";

/// Services needed to invoke assets: storage, query engine and metadata root.
///
/// Built once and passed by reference. Clones share the same storage and
/// query engine.
#[derive(Clone)]
pub struct AssetContext {
    storage: Arc<dyn AsyncStorage>,
    query_engine: Arc<dyn QueryEngine>,
    metadata_location: String,
    scheme: String,
}

impl AssetContext {
    pub fn new(storage: Arc<dyn AsyncStorage>) -> Self {
        AssetContext {
            storage,
            query_engine: Arc::new(PolarsQueryEngine::new()),
            metadata_location: DEFAULT_METADATA_LOCATION.to_owned(),
            scheme: ASSET_SCHEME.to_owned(),
        }
    }

    /// Context over a fresh in-memory storage.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    pub fn with_metadata_location(mut self, location: &str) -> Self {
        self.metadata_location = normalize_path(location);
        self
    }

    pub fn with_query_engine(mut self, query_engine: Arc<dyn QueryEngine>) -> Self {
        self.query_engine = query_engine;
        self
    }

    pub fn storage(&self) -> &Arc<dyn AsyncStorage> {
        &self.storage
    }

    pub fn metadata_location(&self) -> &str {
        &self.metadata_location
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Query engine with the context storage registered.
    /// Registration happens on first use and is not repeated for the same storage.
    pub fn query_engine(&self) -> &dyn QueryEngine {
        self.query_engine
            .register_storage(&self.scheme, self.storage.clone());
        self.query_engine.as_ref()
    }

    /// URI of a storage path under the context scheme.
    /// The query engine expands URIs as globs, so the path is escaped.
    pub fn uri(&self, path: &str) -> String {
        format!("{}://{}", self.scheme, glob_escape(&normalize_path(path)))
    }

    pub fn metadata_store(&self) -> AssetMetadataStore<'_> {
        AssetMetadataStore::new(self)
    }

    pub fn engine(&self) -> InvocationEngine<'_> {
        InvocationEngine::new(self)
    }
}
