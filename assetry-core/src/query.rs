//! Query engine collaborator.
//!
//! Storages are registered under a URI scheme (`asset://...`). Reads take glob
//! patterns under a registered scheme and return a [Relation] backed by a polars
//! `DataFrame`.

use std::collections::HashMap;
use std::io::Cursor;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use polars::prelude::*;
use tracing::debug;

use crate::error::Error;
use crate::materializer::Record;
use crate::options::ReadJsonOptions;
use crate::store::AsyncStorage;

/// Scheme under which the context storage is registered.
pub const ASSET_SCHEME: &str = "asset";

fn polars_error(e: PolarsError) -> Error {
    Error::query_error(format!("{} (Polars Error)", e))
}

/// Tabular result of a read.
#[derive(Debug, Clone)]
pub struct Relation {
    frame: DataFrame,
}

impl Relation {
    pub fn new(frame: DataFrame) -> Self {
        Relation { frame }
    }

    pub fn empty() -> Self {
        Relation {
            frame: DataFrame::empty(),
        }
    }

    /// Build a relation from JSON records.
    /// Non-object records become a single `value` column.
    pub fn from_records(records: &[Record], options: &ReadJsonOptions) -> Result<Self, Error> {
        if records.is_empty() {
            return Ok(Relation::empty());
        }
        let mut buffer = Vec::new();
        for record in records {
            let record = sanitize_record(unnest_record(record.clone(), options.unnest_depth));
            let record = match record {
                serde_json::Value::Object(_) => record,
                other => serde_json::json!({ "value": other }),
            };
            serde_json::to_writer(&mut buffer, &record)?;
            buffer.push(b'\n');
        }
        let frame = JsonReader::new(Cursor::new(buffer))
            .with_json_format(JsonFormat::JsonLines)
            .infer_schema_len(options.infer_schema_length.and_then(NonZeroUsize::new))
            .finish()
            .map_err(polars_error)?;
        Ok(Relation { frame })
    }

    pub fn from_parquet(data: Vec<u8>) -> Result<Self, Error> {
        let frame = ParquetReader::new(Cursor::new(data))
            .finish()
            .map_err(polars_error)?;
        Ok(Relation { frame })
    }

    /// Stack relations; differing columns are merged by name.
    pub fn concat(relations: Vec<Relation>) -> Result<Self, Error> {
        let mut relations = relations.into_iter().filter(|r| r.frame.width() > 0);
        let mut result = match relations.next() {
            Some(first) => first,
            None => return Ok(Relation::empty()),
        };
        for relation in relations {
            result = match result.frame.vstack(&relation.frame) {
                Ok(frame) => Relation { frame },
                Err(_) => {
                    let mut records = result.records()?;
                    records.extend(relation.records()?);
                    Relation::from_records(&records, &ReadJsonOptions::default())?
                }
            };
        }
        Ok(result)
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    pub fn data_frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn into_data_frame(self) -> DataFrame {
        self.frame
    }

    /// Rows as JSON objects.
    pub fn records(&self) -> Result<Vec<Record>, Error> {
        if self.frame.width() == 0 {
            return Ok(Vec::new());
        }
        let mut buffer = Vec::new();
        let mut frame = self.frame.clone();
        JsonWriter::new(&mut buffer)
            .with_json_format(JsonFormat::JsonLines)
            .finish(&mut frame)
            .map_err(polars_error)?;
        buffer
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).map_err(Error::from))
            .collect()
    }

    pub fn to_parquet(&self) -> Result<Vec<u8>, Error> {
        let mut buffer = Vec::new();
        let mut frame = self.frame.clone();
        ParquetWriter::new(&mut buffer)
            .finish(&mut frame)
            .map_err(polars_error)?;
        Ok(buffer)
    }
}

/// Replace empty nested objects by null; columnar writers can't store them.
pub fn sanitize_record(record: Record) -> Record {
    match record {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| match v {
                    serde_json::Value::Object(inner) if inner.is_empty() => (k, serde_json::Value::Null),
                    other => (k, sanitize_record(other)),
                })
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sanitize_record).collect())
        }
        other => other,
    }
}

/// Spread nested objects into their parent, `depth` levels deep.
/// A child key colliding with an existing column is kept as `parent.child`.
pub fn unnest_record(record: Record, depth: usize) -> Record {
    if depth == 0 {
        return record;
    }
    match record {
        serde_json::Value::Object(map) => {
            let mut result = serde_json::Map::new();
            let mut nested = Vec::new();
            for (key, value) in map {
                match value {
                    serde_json::Value::Object(inner) if !inner.is_empty() => nested.push((key, inner)),
                    value => {
                        result.insert(key, value);
                    }
                }
            }
            for (parent, inner) in nested {
                let inner = unnest_record(serde_json::Value::Object(inner), depth - 1);
                if let serde_json::Value::Object(inner) = inner {
                    for (key, value) in inner {
                        let key = if result.contains_key(&key) {
                            format!("{}.{}", parent, key)
                        } else {
                            key
                        };
                        result.insert(key, value);
                    }
                }
            }
            serde_json::Value::Object(result)
        }
        other => other,
    }
}

/// Records from a JSON payload: a JSON array, a single document or JSON lines.
pub fn parse_json_records(data: &[u8]) -> Result<Vec<Record>, Error> {
    let mut records = Vec::new();
    for value in serde_json::Deserializer::from_slice(data).into_iter::<serde_json::Value>() {
        match value? {
            serde_json::Value::Array(items) => records.extend(items),
            value => records.push(value),
        }
    }
    Ok(records)
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Register a storage under a scheme.
    /// Returns false when this very storage object is already registered there.
    fn register_storage(&self, scheme: &str, storage: Arc<dyn AsyncStorage>) -> bool;

    fn is_registered(&self, scheme: &str) -> bool;

    /// Raw records of all JSON files matching the URIs.
    async fn scan_json(&self, uris: &[String]) -> Result<Vec<Record>, Error>;

    async fn read_json(&self, uris: &[String], options: &ReadJsonOptions) -> Result<Relation, Error> {
        let records = self.scan_json(uris).await?;
        Relation::from_records(&records, options)
    }

    async fn read_parquet(&self, uris: &[String]) -> Result<Relation, Error>;
}

/// Query engine reading through polars.
#[derive(Default)]
pub struct PolarsQueryEngine {
    storages: Mutex<HashMap<String, Arc<dyn AsyncStorage>>>,
}

impl PolarsQueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn storage_for(&self, scheme: &str) -> Result<Arc<dyn AsyncStorage>, Error> {
        let storages = self
            .storages
            .lock()
            .map_err(|_| Error::query_error("Query engine registry is poisoned".to_owned()))?;
        storages
            .get(scheme)
            .cloned()
            .ok_or_else(|| Error::query_error(format!("No storage registered for scheme '{}'", scheme)))
    }

    /// Matching paths for each URI, with the storage serving them.
    async fn expand(&self, uris: &[String]) -> Result<Vec<(Arc<dyn AsyncStorage>, String)>, Error> {
        let mut result = Vec::new();
        for uri in uris {
            let (scheme, pattern) = uri
                .split_once("://")
                .ok_or_else(|| Error::query_error(format!("URI '{}' has no scheme", uri)))?;
            let storage = self.storage_for(scheme)?;
            for path in storage.glob(pattern).await? {
                result.push((storage.clone(), path));
            }
        }
        debug!(files = result.len(), "query engine expanded uris");
        Ok(result)
    }
}

fn same_storage(a: &Arc<dyn AsyncStorage>, b: &Arc<dyn AsyncStorage>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

#[async_trait]
impl QueryEngine for PolarsQueryEngine {
    fn register_storage(&self, scheme: &str, storage: Arc<dyn AsyncStorage>) -> bool {
        let mut storages = match self.storages.lock() {
            Ok(storages) => storages,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = storages.get(scheme) {
            if same_storage(existing, &storage) {
                return false;
            }
        }
        debug!(scheme, storage = %storage.storage_name(), "registering storage");
        storages.insert(scheme.to_owned(), storage);
        true
    }

    fn is_registered(&self, scheme: &str) -> bool {
        match self.storages.lock() {
            Ok(storages) => storages.contains_key(scheme),
            Err(poisoned) => poisoned.into_inner().contains_key(scheme),
        }
    }

    async fn scan_json(&self, uris: &[String]) -> Result<Vec<Record>, Error> {
        let mut records = Vec::new();
        for (storage, path) in self.expand(uris).await? {
            let data = storage.read(&path).await?;
            records.extend(
                parse_json_records(&data).map_err(|e| Error::new(e.error_type, format!("{}: {}", path, e.message)))?,
            );
        }
        Ok(records)
    }

    async fn read_parquet(&self, uris: &[String]) -> Result<Relation, Error> {
        let mut relations = Vec::new();
        for (storage, path) in self.expand(uris).await? {
            let data = storage.read(&path).await?;
            relations.push(Relation::from_parquet(data)?);
        }
        Relation::concat(relations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStorage;
    use serde_json::json;

    #[test]
    fn registration_is_idempotent_per_storage_object() {
        let engine = PolarsQueryEngine::new();
        let a: Arc<dyn AsyncStorage> = Arc::new(MemoryStorage::new());
        let b: Arc<dyn AsyncStorage> = Arc::new(MemoryStorage::new());
        assert!(engine.register_storage(ASSET_SCHEME, a.clone()));
        assert!(!engine.register_storage(ASSET_SCHEME, a.clone()));
        assert!(engine.register_storage(ASSET_SCHEME, b));
        assert!(engine.is_registered(ASSET_SCHEME));
        assert!(!engine.is_registered("other"));
    }

    #[test]
    fn parse_payload_forms() -> Result<(), Error> {
        assert_eq!(parse_json_records(b"[{\"a\":1},{\"a\":2}]")?.len(), 2);
        assert_eq!(parse_json_records(b"{\"a\":1}\n{\"a\":2}\n\n{\"a\":3}\n")?.len(), 3);
        assert_eq!(parse_json_records(b"{\n  \"a\": 1\n}")?.len(), 1);
        assert!(parse_json_records(b"{oops").is_err());
        Ok(())
    }

    #[test]
    fn unnest_one_level() {
        let record = json!({"id": "r1", "parameters": {"customer": "acme", "id": 5, "deep": {"x": 1}}});
        let flat = unnest_record(record, 1);
        assert_eq!(flat["customer"], "acme");
        assert_eq!(flat["parameters.id"], 5);
        assert_eq!(flat["deep"], json!({"x": 1}));
    }

    #[test]
    fn sanitize_empty_objects() {
        let record = sanitize_record(json!({"a": {}, "b": {"c": {}}, "d": 1}));
        assert_eq!(record, json!({"a": null, "b": {"c": null}, "d": 1}));
    }

    #[test]
    fn relation_records_roundtrip() -> Result<(), Error> {
        let records = vec![json!({"a": 1, "b": "x"}), json!({"a": 2, "c": true})];
        let relation = Relation::from_records(&records, &ReadJsonOptions::default())?;
        assert_eq!(relation.height(), 2);
        let mut columns = relation.column_names();
        columns.sort();
        assert_eq!(columns, vec!["a", "b", "c"]);
        let back = relation.records()?;
        assert_eq!(back[0]["b"], "x");
        assert_eq!(back[1]["c"], true);
        Ok(())
    }

    #[test]
    fn parquet_roundtrip_and_concat() -> Result<(), Error> {
        let first = Relation::from_records(&[json!({"a": 1})], &ReadJsonOptions::default())?;
        let second = Relation::from_records(&[json!({"a": 2, "b": "y"})], &ReadJsonOptions::default())?;
        let first = Relation::from_parquet(first.to_parquet()?)?;
        let combined = Relation::concat(vec![first, Relation::empty(), second])?;
        assert_eq!(combined.height(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn read_json_under_scheme() -> Result<(), Error> {
        let storage: Arc<dyn AsyncStorage> = Arc::new(MemoryStorage::new());
        storage.write_data("d/a.json", b"{\"v\":1}\n{\"v\":2}\n".to_vec()).await?;
        storage.write_data("d/sub/b.json", b"[{\"v\":3}]".to_vec()).await?;
        let engine = PolarsQueryEngine::new();
        engine.register_storage(ASSET_SCHEME, storage);
        let relation = engine
            .read_json(&["asset://d/**/*.json".to_owned()], &ReadJsonOptions::default())
            .await?;
        assert_eq!(relation.height(), 3);
        let e = engine.scan_json(&["nope://d/*.json".to_owned()]).await.unwrap_err();
        assert_eq!(e.error_type, crate::error::ErrorType::QueryError);
        Ok(())
    }
}
