//! Invocation engine.
//!
//! Runs one resolved invocation: cache decision, materializer call, artifact
//! writes, run record and manifest update. Nothing is recorded unless the run
//! succeeds; an error or a dropped future leaves the metadata untouched.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::artifact::{Artifact, DataArtifact, DataArtifactCollector};
use crate::asset::{AssetDefinition, ResolvedAsset};
use crate::context::AssetContext;
use crate::error::Error;
use crate::materializer::Batch;
use crate::metadata::{AssetManifest, AssetRun, ManifestRunStatus};
use crate::options::ArtifactFileType;
use crate::store::{join_path, parent_path};

const DEFAULT_ARTIFACTS_DIR: &str = "_artifacts";

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct InvocationEngine<'a> {
    context: &'a AssetContext,
}

impl<'a> InvocationEngine<'a> {
    pub fn new(context: &'a AssetContext) -> Self {
        InvocationEngine { context }
    }

    pub async fn run(&self, definition: &AssetDefinition, resolved: ResolvedAsset) -> Result<Artifact, Error> {
        // the combined payload must be writable before anything runs
        ArtifactFileType::from_path(&resolved.path).map_err(|e| e.with_asset(&resolved.name))?;

        let store = self.context.metadata_store();
        let manifest = store.load_asset_manifest(&resolved.name, &resolved.id).await?;
        if let Some(artifact) = cached_artifact(&resolved, manifest.as_ref(), Utc::now())? {
            info!(
                asset_name = %resolved.name,
                asset_id = %resolved.id,
                artifacts = artifact.artifact_paths.len(),
                "cache hit, skipping materialization"
            );
            return Ok(artifact);
        }
        let last_materialized = self.get_last_materialized(&resolved).await?;

        let runtime = Utc::now();
        let run_id = run_id(&resolved.id, runtime);
        info!(
            asset_run_id = %run_id,
            asset_id = %resolved.id,
            asset_name = %resolved.name,
            path = %resolved.path,
            "materializing asset"
        );

        let batches = definition
            .materializer
            .materialize(resolved.arguments.clone())
            .await
            .map_err(|e| e.with_asset(&resolved.name))?
            .collect()
            .await
            .map_err(|e| e.with_asset(&resolved.name))?;

        let mut collector = DataArtifactCollector::new(
            &artifacts_base(&resolved, runtime),
            resolved.options.artifact_filetype,
        );
        for batch in batches {
            match batch {
                Batch::Records(records) => collector.collect(records),
                Batch::Artifact(artifact) => {
                    debug!(path = %artifact.path, "reading composed artifact");
                    collector.collect(artifact.records(self.context).await?);
                }
            }
        }

        let storage = self.context.storage().as_ref();
        let artifact_paths = collector.persist(storage).await?;
        let combined = DataArtifact::new(&resolved.path, collector.combined_records())?;
        if combined.persist(storage).await? {
            info!(path = %resolved.path, fragments = artifact_paths.len(), "artifacts written");
        } else {
            warn!(asset_name = %resolved.name, path = %resolved.path, "materializer produced no data");
            storage.delete_path(&resolved.path, false).await?;
        }

        let materialized = Utc::now();
        let mut run = AssetRun::new(&run_id, &resolved.id, &resolved.name)
            .with_asset_path(&resolved.path)
            .with_runtime(runtime)?
            .with_materialized(materialized)?
            .with_parameters(resolved.arguments.to_json());
        run.duration_milliseconds = Some((materialized - runtime).num_milliseconds());
        run.artifact_paths = artifact_paths.clone();
        run.status = ManifestRunStatus::Success;

        store
            .persist(
                &run,
                Some(&artifact_paths),
                Some(&resolved.signature),
                Some(ManifestRunStatus::Success),
            )
            .await?;

        let mut artifact = Artifact::new(&resolved.path, &resolved.id, &resolved.name)?;
        artifact.artifact_paths = artifact_paths;
        artifact.run = Some(run);
        artifact.last_materialized = last_materialized;
        artifact.read_json_options = resolved.options.read_json_options.clone();
        Ok(artifact)
    }

    /// Last materialization of the resolved asset identity.
    pub async fn get_last_materialized(&self, resolved: &ResolvedAsset) -> Result<Option<DateTime<Utc>>, Error> {
        self.context
            .metadata_store()
            .get_last_materialized(&resolved.name, &resolved.id)
            .await
    }
}

/// Artifact of a reusable earlier run, if the cache policy allows one.
fn cached_artifact(
    resolved: &ResolvedAsset,
    manifest: Option<&AssetManifest>,
    now: DateTime<Utc>,
) -> Result<Option<Artifact>, Error> {
    let expiration = match resolved.options.cache_expiration {
        Some(expiration) => expiration,
        None => return Ok(None),
    };
    let manifest = match manifest {
        Some(manifest) if manifest.last_status.is_success() => manifest,
        _ => return Ok(None),
    };
    let materialized = match manifest.last_materialized {
        Some(materialized) => materialized,
        None => return Ok(None),
    };
    if now - materialized > expiration {
        debug!(asset_id = %resolved.id, %materialized, "cached materialization expired");
        return Ok(None);
    }
    if manifest.asset_signature.as_deref() != Some(resolved.signature.as_str()) {
        debug!(asset_id = %resolved.id, "asset signature changed");
        return Ok(None);
    }
    let mut artifact = Artifact::new(&resolved.path, &resolved.id, &resolved.name)?;
    artifact.artifact_paths = manifest.last_artifacts.clone();
    artifact.last_materialized = Some(materialized);
    artifact.cached = true;
    artifact.read_json_options = resolved.options.read_json_options.clone();
    Ok(Some(artifact))
}

/// Directory receiving the fragments of one run.
fn artifacts_base(resolved: &ResolvedAsset, runtime: DateTime<Utc>) -> String {
    let base = if resolved.artifacts_dir.is_empty() {
        join_path(&parent_path(&resolved.path), DEFAULT_ARTIFACTS_DIR)
    } else {
        resolved.artifacts_dir.clone()
    };
    if resolved.options.snapshot_artifacts {
        join_path(&base, &format!("runtime={}", runtime.format("%Y-%m-%dT%H_%M_%S%.6fZ")))
    } else {
        base
    }
}

fn run_id(asset_id: &str, runtime: DateTime<Utc>) -> String {
    let counter = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
    let key = format!(
        "{}:{}:{}",
        asset_id,
        runtime.timestamp_nanos_opt().unwrap_or_default(),
        counter
    );
    let mut id = blake3::hash(key.as_bytes()).to_hex().to_string();
    id.truncate(32);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arguments::{BoundArguments, ParameterList};
    use crate::asset::AssetDeclaration;
    use crate::materializer::Output;
    use chrono::TimeDelta;

    fn resolved(path: &str, artifacts_dir: Option<&str>) -> Result<ResolvedAsset, Error> {
        AssetDeclaration::new(path)
            .artifacts_dir(artifacts_dir)
            .cache_expiration(TimeDelta::hours(1))
            .materializer("x", ParameterList::empty(), |_: BoundArguments| async {
                Ok::<Output, Error>(Output::Empty)
            })
            .resolve(&args![])
    }

    #[test]
    fn artifacts_base_defaults_next_to_path() -> Result<(), Error> {
        let runtime = Utc::now();
        assert_eq!(artifacts_base(&resolved("out/x.json", None)?, runtime), "out/_artifacts");
        assert_eq!(artifacts_base(&resolved("x.json", None)?, runtime), "_artifacts");
        assert_eq!(artifacts_base(&resolved("x.json", Some("raw/x"))?, runtime), "raw/x");

        let mut snapshot = resolved("x.json", Some("raw/x"))?;
        snapshot.options.snapshot_artifacts = true;
        assert!(artifacts_base(&snapshot, runtime).starts_with("raw/x/runtime="));
        Ok(())
    }

    #[test]
    fn cache_decision() -> Result<(), Error> {
        let resolved = resolved("x.json", None)?;
        let now = Utc::now();
        let mut run = crate::metadata::AssetManifestRun::new("r", "m");
        run.materialized = Some(now - TimeDelta::minutes(5));
        let manifest = AssetManifest::new("x", &resolved.id)
            .with_signature(Some(&resolved.signature))
            .with_run(run, ManifestRunStatus::Success, vec!["_artifacts/fragment=1.json".to_owned()]);

        let hit = cached_artifact(&resolved, Some(&manifest), now)?.unwrap();
        assert!(hit.cached);
        assert_eq!(hit.artifact_paths, manifest.last_artifacts);
        assert!(hit.run.is_none());

        assert!(cached_artifact(&resolved, None, now)?.is_none());
        assert!(cached_artifact(&resolved, Some(&manifest), now + TimeDelta::hours(2))?.is_none());
        let changed = manifest.clone().with_signature(Some("other"));
        assert!(cached_artifact(&resolved, Some(&changed), now)?.is_none());
        let failed = AssetManifest {
            last_status: ManifestRunStatus::Failure,
            ..manifest
        };
        assert!(cached_artifact(&resolved, Some(&failed), now)?.is_none());
        Ok(())
    }

    #[test]
    fn run_ids_are_unique() {
        let now = Utc::now();
        assert_ne!(run_id("a", now), run_id("a", now));
    }
}
