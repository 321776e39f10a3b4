//! Storage builder: turns a [StorageConfig] into a storage and an `AssetContext`.

use std::collections::HashMap;
use std::sync::Arc;

use assetry_core::context::AssetContext;
use assetry_core::error::Error;
use assetry_core::store::AsyncStorage;
use opendal::Operator;
use tracing::info;

use crate::config::StorageConfig;
use crate::opendal_storage::OpenDalStorage;

/// Builder for creating an [AssetContext] from configuration.
pub struct StorageBuilder {
    config: StorageConfig,
}

impl StorageBuilder {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    /// Create a builder from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        Ok(Self::new(StorageConfig::from_yaml(yaml)?))
    }

    /// Create a builder from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(Self::new(StorageConfig::from_json(json)?))
    }

    /// Create a builder from the process environment.
    pub fn from_env() -> Self {
        Self::new(StorageConfig::from_env())
    }

    /// Expand environment variables, then build the context.
    pub fn build(mut self) -> Result<AssetContext, Error> {
        self.config.expand_env_vars()?;
        self.build_without_env_expansion()
    }

    /// Build the context from the configuration as it is.
    pub fn build_without_env_expansion(self) -> Result<AssetContext, Error> {
        let storage = create_storage(&self.config)?;
        info!(
            storage = %storage.storage_name(),
            metadata_location = %self.config.metadata_location,
            "asset context created"
        );
        Ok(AssetContext::new(storage).with_metadata_location(&self.config.metadata_location))
    }
}

/// Context over the configured storage; environment variables are expanded.
pub fn build_context(config: &StorageConfig) -> Result<AssetContext, Error> {
    StorageBuilder::new(config.clone()).build()
}

/// Storage selected by `filesystem_url`, with the backend options and the
/// selected credential set applied.
pub fn create_storage(config: &StorageConfig) -> Result<Arc<dyn AsyncStorage>, Error> {
    let (scheme, mut options) = parse_filesystem_url(&config.filesystem_url)?;
    options.extend(config.backend_options()?);
    let operator = create_opendal_operator(&scheme, options)?;
    Ok(Arc::new(OpenDalStorage::new(operator)))
}

/// OpenDAL scheme and root options for a filesystem URL.
///
/// `s3://bucket/prefix`, `gs://bucket/prefix` and `az://container/prefix`
/// map to the bucket and root options of the respective services.
pub fn parse_filesystem_url(url: &str) -> Result<(String, HashMap<String, String>), Error> {
    let mut options = HashMap::new();
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (scheme.to_lowercase(), rest),
        None => ("file".to_owned(), url),
    };
    let bucket_service = |service: &str, bucket_key: &str, options: &mut HashMap<String, String>| {
        let (bucket, root) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(Error::configuration_error(format!("Missing bucket in filesystem URL '{}'", url)));
        }
        options.insert(bucket_key.to_owned(), bucket.to_owned());
        options.insert("root".to_owned(), format!("/{}", root));
        Ok(service.to_owned())
    };
    let service = match scheme.as_str() {
        "file" | "fs" | "local" => {
            if rest.is_empty() {
                return Err(Error::configuration_error(format!("Missing path in filesystem URL '{}'", url)));
            }
            options.insert("root".to_owned(), rest.to_owned());
            "fs".to_owned()
        }
        "memory" | "mem" => {
            if !rest.is_empty() {
                options.insert("root".to_owned(), format!("/{}", rest));
            }
            "memory".to_owned()
        }
        "s3" | "s3a" => bucket_service("s3", "bucket", &mut options)?,
        "gs" | "gcs" => bucket_service("gcs", "bucket", &mut options)?,
        "az" | "abfs" | "azblob" => bucket_service("azblob", "container", &mut options)?,
        other => {
            if !rest.is_empty() {
                options.insert("root".to_owned(), rest.to_owned());
            }
            other.to_owned()
        }
    };
    Ok((service, options))
}

/// Create an OpenDAL Operator from scheme and configuration.
fn create_opendal_operator(scheme: &str, config: HashMap<String, String>) -> Result<Operator, Error> {
    let config_pairs: Vec<(String, String)> = config.into_iter().collect();

    Operator::via_iter(scheme, config_pairs).map_err(|e| {
        Error::configuration_error(format!(
            "Failed to create OpenDAL operator for scheme '{}': {}",
            scheme, e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filesystem_url() {
        let (scheme, options) = parse_filesystem_url("file://./.tmp/storage").unwrap();
        assert_eq!(scheme, "fs");
        assert_eq!(options["root"], "./.tmp/storage");

        let (scheme, options) = parse_filesystem_url("/data/assets").unwrap();
        assert_eq!(scheme, "fs");
        assert_eq!(options["root"], "/data/assets");

        let (scheme, options) = parse_filesystem_url("s3://lake/raw/assets").unwrap();
        assert_eq!(scheme, "s3");
        assert_eq!(options["bucket"], "lake");
        assert_eq!(options["root"], "/raw/assets");

        let (scheme, options) = parse_filesystem_url("az://container").unwrap();
        assert_eq!(scheme, "azblob");
        assert_eq!(options["container"], "container");
        assert_eq!(options["root"], "/");

        let (scheme, options) = parse_filesystem_url("memory://").unwrap();
        assert_eq!(scheme, "memory");
        assert!(options.is_empty());

        assert!(parse_filesystem_url("s3://").is_err());
        assert!(parse_filesystem_url("file://").is_err());
    }

    #[test]
    fn test_create_memory_storage() {
        let storage = create_storage(&StorageConfig::new("memory://")).unwrap();
        assert!(storage.storage_name().starts_with("memory"));
    }

    #[test]
    fn test_unknown_scheme() {
        let result = create_storage(&StorageConfig::new("nosuchservice://x"));
        assert!(result.is_err());
    }

    #[test]
    fn test_context_metadata_location() {
        let context = StorageBuilder::from_yaml("filesystem_url: memory://\nmetadata_location: ./runs/")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(context.metadata_location(), "runs");
    }
}
