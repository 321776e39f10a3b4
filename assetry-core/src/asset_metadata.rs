//! Run & manifest store.
//!
//! Layout under the metadata root:
//! ```text
//! asset_name=<name>/asset_id=<id>/asset_run_id=<run-id>/metadata.json
//! asset_name=<name>/asset_id=<id>/manifest.json
//! ```
//! There is no reconstruction of a manifest from run records; history is read
//! with [AssetMetadataStore::get_asset_metadata].

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::context::AssetContext;
use crate::error::Error;
use crate::metadata::{parse_timestamp, AssetManifest, AssetManifestRun, AssetRun, ManifestRunStatus};
use crate::options::ReadJsonOptions;
use crate::query::Relation;
use crate::store::{glob_escape, join_path};

const MANIFEST_FILE: &str = "manifest.json";
const RUN_FILE: &str = "metadata.json";

pub struct AssetMetadataStore<'a> {
    context: &'a AssetContext,
}

impl<'a> AssetMetadataStore<'a> {
    pub fn new(context: &'a AssetContext) -> Self {
        AssetMetadataStore { context }
    }

    pub fn asset_directory(&self, asset_name: &str, asset_id: &str) -> String {
        join_path(
            self.context.metadata_location(),
            &format!("asset_name={}/asset_id={}", asset_name, asset_id),
        )
    }

    pub fn run_path(&self, asset_name: &str, asset_id: &str, run_id: &str) -> String {
        join_path(
            &self.asset_directory(asset_name, asset_id),
            &format!("asset_run_id={}/{}", run_id, RUN_FILE),
        )
    }

    pub fn manifest_path(&self, asset_name: &str, asset_id: &str) -> String {
        join_path(&self.asset_directory(asset_name, asset_id), MANIFEST_FILE)
    }

    /// Write the run record, then replace the manifest.
    ///
    /// Without `status` the manifest status is `UNKNOWN`; without
    /// `artifact_paths` the run keeps its own list.
    pub async fn persist(
        &self,
        run: &AssetRun,
        artifact_paths: Option<&[String]>,
        asset_signature: Option<&str>,
        status: Option<ManifestRunStatus>,
    ) -> Result<AssetManifest, Error> {
        let storage = self.context.storage();
        let status = status.unwrap_or(ManifestRunStatus::Unknown);

        let mut record = run.clone();
        if let Some(paths) = artifact_paths {
            record.artifact_paths = paths.to_vec();
        }
        record.status = status;

        let run_path = self.run_path(&run.asset_name, &run.asset_id, &run.id);
        storage.write_json(&run_path, &record).await?;
        debug!(path = %run_path, "run record written");

        let manifest = match self.load_asset_manifest(&run.asset_name, &run.asset_id).await? {
            Some(manifest) => manifest,
            None => AssetManifest::new(&run.asset_name, &run.asset_id),
        };
        let manifest_run = AssetManifestRun {
            id: run.id.clone(),
            metadata_path: run_path,
            materialized: run.materialized,
        };
        let manifest = manifest
            .with_signature(asset_signature)
            .with_run(manifest_run, status, record.artifact_paths.clone());
        let manifest_path = self.manifest_path(&run.asset_name, &run.asset_id);
        storage.write_json(&manifest_path, &manifest).await?;
        info!(
            asset_name = %run.asset_name,
            asset_id = %run.asset_id,
            asset_run_id = %run.id,
            status = ?status,
            "manifest updated"
        );
        Ok(manifest)
    }

    /// Manifest of an asset identity, if one was ever written.
    pub async fn load_asset_manifest(&self, asset_name: &str, asset_id: &str) -> Result<Option<AssetManifest>, Error> {
        let path = self.manifest_path(asset_name, asset_id);
        let storage = self.context.storage();
        if !storage.exists(&path).await? {
            return Ok(None);
        }
        let data = storage.read(&path).await?;
        let manifest = serde_json::from_slice::<AssetManifest>(&data).map_err(|e| {
            Error::manifest_validation_error(format!("Invalid manifest '{}': {}", path, e)).with_path(&path)
        })?;
        Ok(Some(manifest))
    }

    /// All run records of an asset identity, nested objects unnested one level.
    /// `None` when no run record exists.
    pub async fn get_asset_metadata(&self, asset_name: &str, asset_id: &str) -> Result<Option<Relation>, Error> {
        let directory = self.asset_directory(asset_name, asset_id);
        let manifest_path = self.manifest_path(asset_name, asset_id);
        let paths = self
            .context
            .storage()
            .glob(&join_path(&glob_escape(&directory), "**/*.json"))
            .await?
            .into_iter()
            .filter(|p| *p != manifest_path)
            .collect::<Vec<_>>();
        if paths.is_empty() {
            return Ok(None);
        }
        let uris = paths.iter().map(|p| self.context.uri(p)).collect::<Vec<_>>();
        let records = self.context.query_engine().scan_json(&uris).await?;
        let options = ReadJsonOptions::default().with_unnest_depth(1);
        Ok(Some(Relation::from_records(&records, &options)?))
    }

    /// Last materialization time: manifest first, then the latest run record.
    pub async fn get_last_materialized(&self, asset_name: &str, asset_id: &str) -> Result<Option<DateTime<Utc>>, Error> {
        if let Some(manifest) = self.load_asset_manifest(asset_name, asset_id).await? {
            if manifest.last_materialized.is_some() {
                return Ok(manifest.last_materialized);
            }
        }
        let relation = match self.get_asset_metadata(asset_name, asset_id).await? {
            Some(relation) => relation,
            None => return Ok(None),
        };
        let mut latest: Option<DateTime<Utc>> = None;
        for record in relation.records()? {
            if let Some(text) = record.get("materialized").and_then(|v| v.as_str()) {
                let ts = parse_timestamp(text)?;
                latest = Some(latest.map_or(ts, |l| l.max(ts)));
            }
        }
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn persist_and_load() -> Result<(), Error> {
        let context = AssetContext::in_memory();
        let store = context.metadata_store();
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let run = AssetRun::new("run-1", "abc", "orders").with_materialized(ts)?;
        let paths = vec!["a.parquet".to_owned()];
        store
            .persist(&run, Some(&paths), Some("sig"), Some(ManifestRunStatus::Success))
            .await?;

        assert!(context.storage().exists(".asset_metadata/asset_name=orders/asset_id=abc/asset_run_id=run-1/metadata.json").await?);
        let manifest = store.load_asset_manifest("orders", "abc").await?.unwrap();
        assert_eq!(manifest.last_status, ManifestRunStatus::Success);
        assert_eq!(manifest.last_artifacts, paths);
        assert_eq!(manifest.last_materialized, Some(ts));
        assert_eq!(manifest.asset_signature.as_deref(), Some("sig"));
        let last_run = manifest.last_run.unwrap();
        assert_eq!(last_run.id, "run-1");
        assert!(last_run.metadata_path.ends_with("/asset_run_id=run-1/metadata.json"));
        Ok(())
    }

    #[tokio::test]
    async fn persist_without_status() -> Result<(), Error> {
        let context = AssetContext::in_memory();
        let store = context.metadata_store();
        let run = AssetRun::new("run-1", "abc", "orders");
        store.persist(&run, None, Some("sig"), None).await?;
        let manifest = store.load_asset_manifest("orders", "abc").await?.unwrap();
        assert_eq!(manifest.last_status, ManifestRunStatus::Unknown);
        assert_eq!(manifest.last_run.unwrap().materialized, None);
        assert!(manifest.last_artifacts.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn missing_metadata() -> Result<(), Error> {
        let context = AssetContext::in_memory();
        let store = context.metadata_store();
        assert!(store.load_asset_manifest("x", "y").await?.is_none());
        assert!(store.get_asset_metadata("x", "y").await?.is_none());
        assert!(store.get_last_materialized("x", "y").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn run_records_of_names_with_glob_characters() -> Result<(), Error> {
        let context = AssetContext::in_memory();
        let store = context.metadata_store();
        for name in ["acme[eu]", "acmee", "acme{1,2}"] {
            let run = AssetRun::new("run-1", "abc", name);
            store.persist(&run, None, None, Some(ManifestRunStatus::Success)).await?;
        }
        let relation = store.get_asset_metadata("acme[eu]", "abc").await?.unwrap();
        assert_eq!(relation.height(), 1);
        assert_eq!(relation.records()?[0]["asset_name"], "acme[eu]");
        assert_eq!(store.get_asset_metadata("acme{1,2}", "abc").await?.unwrap().height(), 1);
        assert!(store.get_asset_metadata("acme[e]", "abc").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn invalid_manifest_is_a_validation_error() -> Result<(), Error> {
        let context = AssetContext::in_memory();
        let store = context.metadata_store();
        let path = store.manifest_path("x", "y");
        context
            .storage()
            .write_data(
                &path,
                br#"{"asset_name":"x","asset_id":"y","manifest_version":"1","updated_at":"2024-01-01T00:00:00"}"#.to_vec(),
            )
            .await?;
        let e = store.load_asset_manifest("x", "y").await.unwrap_err();
        assert!(e.is_manifest_validation_error());
        Ok(())
    }
}
