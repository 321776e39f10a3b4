use std::fmt::Display;
use std::str::FromStr;

use chrono::TimeDelta;

use crate::error::Error;

/// Expiration used by `cache_first()` when none is given.
pub const CACHE_FIRST_CACHE_EXPIRATION: TimeDelta = TimeDelta::days(365);

/// File type of stored artifacts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFileType {
    #[default]
    Json,
    Parquet,
}

impl ArtifactFileType {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFileType::Json => "json",
            ArtifactFileType::Parquet => "parquet",
        }
    }

    /// File type implied by a path extension.
    pub fn from_path(path: &str) -> Result<Self, Error> {
        let extension = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
        extension
            .parse()
            .map_err(|_| Error::not_supported(format!("Unsupported file format: '{}'", path)).with_path(path))
    }
}

impl Display for ArtifactFileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for ArtifactFileType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" | "jsonl" | "ndjson" => Ok(ArtifactFileType::Json),
            "parquet" => Ok(ArtifactFileType::Parquet),
            _ => Err(Error::not_supported(format!("Unsupported artifact file type: '{}'", s))),
        }
    }
}

/// Hints used when reading JSON artifacts back.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ReadJsonOptions {
    /// Rows used for schema inference; all rows when unset.
    #[serde(default)]
    pub infer_schema_length: Option<usize>,
    /// Nested objects spread into columns this many levels deep.
    #[serde(default)]
    pub unnest_depth: usize,
}

impl ReadJsonOptions {
    pub fn with_infer_schema_length(mut self, rows: usize) -> Self {
        self.infer_schema_length = Some(rows);
        self
    }
    pub fn with_unnest_depth(mut self, depth: usize) -> Self {
        self.unnest_depth = depth;
        self
    }
}

/// Options attached to an asset definition.
/// Every derivation owns its own copy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssetOptions {
    /// Resolved artifacts directory, empty when not configured.
    pub artifacts_dir: String,
    pub artifact_filetype: ArtifactFileType,
    pub snapshot_artifacts: bool,
    pub read_json_options: ReadJsonOptions,
    pub cache_expiration: Option<TimeDelta>,
}

/// Explicit overrides for `with_options`; `None` keeps the current value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OptionsOverride {
    pub path: Option<String>,
    pub name: Option<String>,
    pub artifacts_dir: Option<String>,
    pub artifact_filetype: Option<ArtifactFileType>,
    pub snapshot_artifacts: Option<bool>,
    pub read_json_options: Option<ReadJsonOptions>,
    pub cache_expiration: Option<TimeDelta>,
}

impl OptionsOverride {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_owned());
        self
    }
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }
    pub fn artifacts_dir(mut self, artifacts_dir: &str) -> Self {
        self.artifacts_dir = Some(artifacts_dir.to_owned());
        self
    }
    pub fn artifact_filetype(mut self, filetype: ArtifactFileType) -> Self {
        self.artifact_filetype = Some(filetype);
        self
    }
    pub fn snapshot_artifacts(mut self, snapshot: bool) -> Self {
        self.snapshot_artifacts = Some(snapshot);
        self
    }
    pub fn read_json_options(mut self, options: ReadJsonOptions) -> Self {
        self.read_json_options = Some(options);
        self
    }
    pub fn cache_expiration(mut self, expiration: TimeDelta) -> Self {
        self.cache_expiration = Some(expiration);
        self
    }
}
