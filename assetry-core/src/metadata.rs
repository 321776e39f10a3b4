//! Run records and manifests.
//!
//! A run record ([AssetRun]) is written once per invocation and never
//! rewritten. The manifest ([AssetManifest]) is the single mutable summary
//! of the latest run of an asset identity. All timestamps are timezone-aware;
//! naive timestamps are rejected with a `ManifestValidationError`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::error::Error;

pub const MANIFEST_VERSION: &str = "1";

/// Conversion into an aware UTC timestamp.
pub trait TryIntoTimestamp {
    fn try_into_timestamp(self) -> Result<DateTime<Utc>, Error>;
}

impl<Tz: TimeZone> TryIntoTimestamp for DateTime<Tz> {
    fn try_into_timestamp(self) -> Result<DateTime<Utc>, Error> {
        Ok(self.with_timezone(&Utc))
    }
}

impl TryIntoTimestamp for NaiveDateTime {
    fn try_into_timestamp(self) -> Result<DateTime<Utc>, Error> {
        Err(Error::manifest_validation_error(format!(
            "Timestamp '{}' must be timezone-aware",
            self
        )))
    }
}

impl TryIntoTimestamp for &str {
    fn try_into_timestamp(self) -> Result<DateTime<Utc>, Error> {
        parse_timestamp(self)
    }
}

/// Parse an RFC 3339 timestamp; a missing offset is a validation error.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, Error> {
    match DateTime::parse_from_rfc3339(text) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(e) => {
            let naive = text.parse::<NaiveDateTime>().is_ok()
                || NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").is_ok();
            if naive {
                Err(Error::manifest_validation_error(format!(
                    "Timestamp '{}' must be timezone-aware",
                    text
                )))
            } else {
                Err(Error::manifest_validation_error(format!(
                    "Invalid timestamp '{}': {}",
                    text, e
                )))
            }
        }
    }
}

mod aware_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_some(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        match text {
            Some(text) => super::parse_timestamp(&text)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

mod required_aware_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_timestamp(&text).map_err(serde::de::Error::custom)
    }
}

/// Outcome of the latest run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ManifestRunStatus {
    #[default]
    Unknown,
    Running,
    Success,
    Failure,
}

impl ManifestRunStatus {
    pub fn is_success(&self) -> bool {
        match self {
            ManifestRunStatus::Success => true,
            ManifestRunStatus::Unknown => false,
            ManifestRunStatus::Running => false,
            ManifestRunStatus::Failure => false,
        }
    }
    /// Finished, either successfully or with a failure.
    pub fn is_finished(&self) -> bool {
        match self {
            ManifestRunStatus::Success => true,
            ManifestRunStatus::Failure => true,
            ManifestRunStatus::Unknown => false,
            ManifestRunStatus::Running => false,
        }
    }
}

/// Record of one invocation attempt.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AssetRun {
    pub id: String,
    pub asset_id: String,
    pub asset_name: String,
    #[serde(default)]
    pub asset_path: Option<String>,
    #[serde(default, with = "aware_timestamp")]
    pub runtime: Option<DateTime<Utc>>,
    /// Set only when the run succeeded.
    #[serde(default, with = "aware_timestamp")]
    pub materialized: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_milliseconds: Option<i64>,
    #[serde(default)]
    pub artifact_paths: Vec<String>,
    #[serde(default)]
    pub status: ManifestRunStatus,
    /// Bound arguments of the run.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl AssetRun {
    pub fn new(id: &str, asset_id: &str, asset_name: &str) -> Self {
        AssetRun {
            id: id.to_owned(),
            asset_id: asset_id.to_owned(),
            asset_name: asset_name.to_owned(),
            asset_path: None,
            runtime: None,
            materialized: None,
            duration_milliseconds: None,
            artifact_paths: Vec::new(),
            status: ManifestRunStatus::Unknown,
            parameters: serde_json::Value::Null,
        }
    }

    pub fn with_asset_path(mut self, path: &str) -> Self {
        self.asset_path = Some(path.to_owned());
        self
    }

    pub fn with_runtime<T: TryIntoTimestamp>(mut self, runtime: T) -> Result<Self, Error> {
        self.runtime = Some(runtime.try_into_timestamp()?);
        Ok(self)
    }

    pub fn with_materialized<T: TryIntoTimestamp>(mut self, materialized: T) -> Result<Self, Error> {
        self.materialized = Some(materialized.try_into_timestamp()?);
        Ok(self)
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn is_materialized(&self) -> bool {
        self.materialized.is_some()
    }
}

/// Reference from a manifest to the run record it summarizes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AssetManifestRun {
    pub id: String,
    pub metadata_path: String,
    #[serde(default, with = "aware_timestamp")]
    pub materialized: Option<DateTime<Utc>>,
}

impl AssetManifestRun {
    pub fn new(id: &str, metadata_path: &str) -> Self {
        AssetManifestRun {
            id: id.to_owned(),
            metadata_path: metadata_path.to_owned(),
            materialized: None,
        }
    }

    pub fn with_materialized<T: TryIntoTimestamp>(mut self, materialized: T) -> Result<Self, Error> {
        self.materialized = Some(materialized.try_into_timestamp()?);
        Ok(self)
    }
}

/// Latest-state summary of an asset identity.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AssetManifest {
    pub asset_name: String,
    pub asset_id: String,
    pub manifest_version: String,
    #[serde(with = "required_aware_timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_status: ManifestRunStatus,
    #[serde(default, with = "aware_timestamp")]
    pub last_materialized: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_artifacts: Vec<String>,
    #[serde(default)]
    pub last_run: Option<AssetManifestRun>,
    #[serde(default)]
    pub asset_signature: Option<String>,
}

impl AssetManifest {
    pub fn new(asset_name: &str, asset_id: &str) -> Self {
        AssetManifest {
            asset_name: asset_name.to_owned(),
            asset_id: asset_id.to_owned(),
            manifest_version: MANIFEST_VERSION.to_owned(),
            updated_at: Utc::now(),
            last_status: ManifestRunStatus::Unknown,
            last_materialized: None,
            last_artifacts: Vec::new(),
            last_run: None,
            asset_signature: None,
        }
    }

    pub fn with_updated_at<T: TryIntoTimestamp>(mut self, updated_at: T) -> Result<Self, Error> {
        self.updated_at = updated_at.try_into_timestamp()?;
        Ok(self)
    }

    pub fn with_signature(mut self, signature: Option<&str>) -> Self {
        self.asset_signature = signature.map(|s| s.to_owned());
        self
    }

    /// Manifest describing `run` as the latest run.
    /// The four `last_*` fields are replaced together.
    pub fn with_run(self, run: AssetManifestRun, status: ManifestRunStatus, artifacts: Vec<String>) -> Self {
        AssetManifest {
            updated_at: Utc::now(),
            last_status: status,
            last_materialized: run.materialized,
            last_artifacts: artifacts,
            last_run: Some(run),
            ..self
        }
    }

    pub fn has_successful_run(&self) -> bool {
        self.last_status.is_success() && self.last_materialized.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate};

    fn naive() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap()
    }

    #[test]
    fn naive_timestamp_rejected() {
        let e = AssetManifestRun::new("run-1", "m.json")
            .with_materialized(naive())
            .unwrap_err();
        assert!(e.is_manifest_validation_error());
        let e = AssetRun::new("run-1", "id", "name")
            .with_materialized("2024-01-02T03:04:05")
            .unwrap_err();
        assert!(e.is_manifest_validation_error());
        assert!(e.message.contains("timezone-aware"));
    }

    #[test]
    fn aware_timestamp_accepted() -> Result<(), Error> {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let ts = offset.from_local_datetime(&naive()).unwrap();
        let run = AssetManifestRun::new("run-1", "m.json").with_materialized(ts)?;
        assert_eq!(run.materialized, Some(ts.with_timezone(&Utc)));
        Ok(())
    }

    #[test]
    fn naive_timestamp_rejected_on_load() {
        let json = r#"{"id":"r","metadata_path":"m","materialized":"2024-01-02T03:04:05"}"#;
        let result = serde_json::from_str::<AssetManifestRun>(json);
        assert!(result.is_err());
        let json = r#"{"id":"r","metadata_path":"m","materialized":"2024-01-02T03:04:05+00:00"}"#;
        assert!(serde_json::from_str::<AssetManifestRun>(json).is_ok());
    }

    #[test]
    fn manifest_defaults_and_with_run() -> Result<(), Error> {
        let manifest = AssetManifest::new("orders", "abc");
        assert_eq!(manifest.manifest_version, "1");
        assert_eq!(manifest.last_status, ManifestRunStatus::Unknown);
        assert!(manifest.last_artifacts.is_empty());

        let ts = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let run = AssetManifestRun::new("run-1", "m.json").with_materialized(ts)?;
        let updated = manifest.with_run(run, ManifestRunStatus::Success, vec!["a.parquet".to_owned()]);
        assert_eq!(updated.last_status, ManifestRunStatus::Success);
        assert_eq!(updated.last_materialized, Some(ts));
        assert_eq!(updated.last_artifacts, vec!["a.parquet".to_owned()]);
        assert_eq!(updated.last_run.as_ref().map(|r| r.id.as_str()), Some("run-1"));
        assert!(updated.has_successful_run());
        Ok(())
    }

    #[test]
    fn status_serialization() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(serde_json::to_string(&ManifestRunStatus::Success)?, "\"SUCCESS\"");
        let status: ManifestRunStatus = serde_json::from_str("\"UNKNOWN\"")?;
        assert_eq!(status, ManifestRunStatus::Unknown);
        Ok(())
    }
}
