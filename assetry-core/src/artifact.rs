//! Stored asset output.
//!
//! [DataArtifact] is data about to be written, [Artifact] is the reference an
//! invocation returns. Reading back goes through the context's query engine.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use tracing::{debug, info};

use crate::context::AssetContext;
use crate::error::Error;
use crate::materializer::Record;
use crate::metadata::AssetRun;
use crate::options::{ArtifactFileType, ReadJsonOptions};
use crate::query::{sanitize_record, Relation};
use crate::store::{join_path, AsyncStorage};

/// Records to be written to one path.
#[derive(Debug, Clone, PartialEq)]
pub struct DataArtifact {
    pub path: String,
    pub filetype: ArtifactFileType,
    pub records: Vec<Record>,
}

impl DataArtifact {
    /// File type implied by the path extension.
    pub fn new(path: &str, records: Vec<Record>) -> Result<Self, Error> {
        Ok(DataArtifact {
            path: path.to_owned(),
            filetype: ArtifactFileType::from_path(path)?,
            records,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// JSON is written as JSON lines.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        match self.filetype {
            ArtifactFileType::Json => {
                let mut buffer = Vec::new();
                for record in &self.records {
                    serde_json::to_writer(&mut buffer, record)?;
                    buffer.push(b'\n');
                }
                Ok(buffer)
            }
            ArtifactFileType::Parquet => {
                let records = self
                    .records
                    .iter()
                    .cloned()
                    .map(sanitize_record)
                    .collect::<Vec<_>>();
                Relation::from_records(&records, &ReadJsonOptions::default())?.to_parquet()
            }
        }
    }

    /// Write the artifact; returns false when there was nothing to write.
    pub async fn persist(&self, storage: &dyn AsyncStorage) -> Result<bool, Error> {
        if self.is_empty() {
            return Ok(false);
        }
        let data = self.encode()?;
        debug!(path = %self.path, records = self.records.len(), "writing artifact");
        storage.write_data(&self.path, data).await?;
        Ok(true)
    }
}

/// Writes materializer batches as numbered fragments under one directory.
pub struct DataArtifactCollector {
    directory: String,
    filetype: ArtifactFileType,
    fragments: Vec<DataArtifact>,
}

impl DataArtifactCollector {
    pub fn new(directory: &str, filetype: ArtifactFileType) -> Self {
        DataArtifactCollector {
            directory: directory.to_owned(),
            filetype,
            fragments: Vec::new(),
        }
    }

    pub fn fragment_path(&self, number: usize) -> String {
        join_path(
            &self.directory,
            &format!("fragment={}.{}", number, self.filetype.extension()),
        )
    }

    /// Add a batch; empty batches are skipped. Fragments are numbered from 1.
    pub fn collect(&mut self, records: Vec<Record>) {
        if records.is_empty() {
            return;
        }
        let path = self.fragment_path(self.fragments.len() + 1);
        self.fragments.push(DataArtifact {
            path,
            filetype: self.filetype,
            records,
        });
    }

    pub fn fragments(&self) -> &[DataArtifact] {
        &self.fragments
    }

    pub fn paths(&self) -> Vec<String> {
        self.fragments.iter().map(|f| f.path.clone()).collect()
    }

    /// All records in fragment order.
    pub fn combined_records(&self) -> Vec<Record> {
        self.fragments
            .iter()
            .flat_map(|f| f.records.iter().cloned())
            .collect()
    }

    pub async fn persist(&self, storage: &dyn AsyncStorage) -> Result<Vec<String>, Error> {
        let mut written = Vec::new();
        for fragment in &self.fragments {
            if fragment.persist(storage).await? {
                written.push(fragment.path.clone());
            }
        }
        Ok(written)
    }
}

/// Reads several stored artifacts as one relation.
#[derive(Debug, Clone, PartialEq)]
pub struct DataArtifactQuery {
    paths: Vec<String>,
    read_json_options: ReadJsonOptions,
}

impl DataArtifactQuery {
    pub fn new(paths: Vec<String>) -> Self {
        DataArtifactQuery {
            paths,
            read_json_options: ReadJsonOptions::default(),
        }
    }

    pub fn with_read_json_options(mut self, options: ReadJsonOptions) -> Self {
        self.read_json_options = options;
        self
    }

    /// `None` when there are no paths.
    pub async fn query(&self, context: &AssetContext) -> Result<Option<Relation>, Error> {
        if self.paths.is_empty() {
            return Ok(None);
        }
        let filetypes = self
            .paths
            .iter()
            .map(|p| ArtifactFileType::from_path(p))
            .collect::<Result<Vec<_>, Error>>()?;
        let filetypes = filetypes.into_iter().unique().collect::<Vec<_>>();
        if filetypes.len() > 1 {
            return Err(Error::query_error(format!(
                "Cannot query artifacts of different filetypes: {}",
                filetypes.iter().join(", ")
            )));
        }
        let uris = self.paths.iter().map(|p| context.uri(p)).collect::<Vec<_>>();
        let engine = context.query_engine();
        let relation = match filetypes[0] {
            ArtifactFileType::Json => engine.read_json(&uris, &self.read_json_options).await?,
            ArtifactFileType::Parquet => engine.read_parquet(&uris).await?,
        };
        Ok(Some(relation))
    }
}

/// Result of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    /// Resolved asset path holding the combined payload.
    pub path: String,
    pub filetype: ArtifactFileType,
    /// Fragment files written by the run (or by the cached run).
    pub artifact_paths: Vec<String>,
    pub asset_id: String,
    pub asset_name: String,
    /// Run record of this invocation; `None` on a cache hit.
    pub run: Option<AssetRun>,
    /// Materialization time of the previous successful run.
    pub last_materialized: Option<DateTime<Utc>>,
    pub cached: bool,
    pub read_json_options: ReadJsonOptions,
}

impl Artifact {
    pub fn new(path: &str, asset_id: &str, asset_name: &str) -> Result<Self, Error> {
        Ok(Artifact {
            path: path.to_owned(),
            filetype: ArtifactFileType::from_path(path)?,
            artifact_paths: Vec::new(),
            asset_id: asset_id.to_owned(),
            asset_name: asset_name.to_owned(),
            run: None,
            last_materialized: None,
            cached: false,
            read_json_options: ReadJsonOptions::default(),
        })
    }

    pub fn data_written(&self) -> bool {
        !self.artifact_paths.is_empty()
    }

    pub async fn exists(&self, context: &AssetContext) -> Result<bool, Error> {
        context.storage().exists(&self.path).await
    }

    /// Read the data back.
    /// Falls back to the fragments when the combined file is absent.
    pub async fn query(&self, context: &AssetContext) -> Result<Option<Relation>, Error> {
        if self.exists(context).await? {
            info!(path = %self.path, "querying artifact");
            return DataArtifactQuery::new(vec![self.path.clone()])
                .with_read_json_options(self.read_json_options.clone())
                .query(context)
                .await;
        }
        DataArtifactQuery::new(self.artifact_paths.clone())
            .with_read_json_options(self.read_json_options.clone())
            .query(context)
            .await
    }

    pub async fn records(&self, context: &AssetContext) -> Result<Vec<Record>, Error> {
        match self.query(context).await? {
            Some(relation) => relation.records(),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStorage;
    use serde_json::json;

    #[test]
    fn fragment_paths() {
        let mut collector = DataArtifactCollector::new("out/_artifacts", ArtifactFileType::Parquet);
        collector.collect(vec![json!({"a": 1})]);
        collector.collect(Vec::new());
        collector.collect(vec![json!({"a": 2}), json!({"a": 3})]);
        assert_eq!(
            collector.paths(),
            vec![
                "out/_artifacts/fragment=1.parquet",
                "out/_artifacts/fragment=2.parquet"
            ]
        );
        assert_eq!(collector.combined_records().len(), 3);
    }

    #[test]
    fn json_encoded_as_lines() -> Result<(), Error> {
        let artifact = DataArtifact::new("a.json", vec![json!({"a": 1}), json!({"a": 2})])?;
        assert_eq!(artifact.encode()?, b"{\"a\":1}\n{\"a\":2}\n".to_vec());
        assert!(DataArtifact::new("a.csv", Vec::new()).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn empty_artifact_not_written() -> Result<(), Error> {
        let storage = MemoryStorage::new();
        let artifact = DataArtifact::new("a.json", Vec::new())?;
        assert!(!artifact.persist(&storage).await?);
        assert!(!storage.exists("a.json").await?);
        Ok(())
    }

    #[tokio::test]
    async fn query_mixed_filetypes_fails() -> Result<(), Error> {
        let context = AssetContext::in_memory();
        let query = DataArtifactQuery::new(vec!["a.json".to_owned(), "b.parquet".to_owned()]);
        let e = query.query(&context).await.unwrap_err();
        assert!(e.message.contains("different filetypes"));
        assert!(DataArtifactQuery::new(Vec::new()).query(&context).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn parquet_artifact_roundtrip() -> Result<(), Error> {
        let context = AssetContext::in_memory();
        let artifact = DataArtifact::new(
            "out/x.parquet",
            vec![json!({"a": 1, "meta": {"k": "v"}}), json!({"a": 2, "meta": {}})],
        )?;
        assert!(artifact.persist(context.storage().as_ref()).await?);
        let reference = Artifact::new("out/x.parquet", "id", "x")?;
        let records = reference.records(&context).await?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["a"], 2);
        Ok(())
    }
}
