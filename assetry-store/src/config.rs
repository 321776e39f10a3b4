//! Storage configuration.
//!
//! A [StorageConfig] selects the storage backend by URL, names the metadata
//! root and carries named credential sets. It can be loaded from YAML, JSON,
//! TOML or the process environment and is turned into an `AssetContext` by
//! [build_context](crate::storage_builder::build_context).

use std::collections::HashMap;

use assetry_core::error::Error;

pub const DEFAULT_FILESYSTEM_URL: &str = "file://./.tmp/storage";
pub const DEFAULT_METADATA_LOCATION: &str = assetry_core::context::DEFAULT_METADATA_LOCATION;

pub const FILESYSTEM_URL_VAR: &str = "FILESYSTEM_URL";
pub const ASSET_METADATA_LOCATION_VAR: &str = "ASSET_METADATA_LOCATION";
pub const FILESYSTEM_BLOCK_NAME_VAR: &str = "FILESYSTEM_BLOCK_NAME";

fn default_filesystem_url() -> String {
    DEFAULT_FILESYSTEM_URL.to_owned()
}

fn default_metadata_location() -> String {
    DEFAULT_METADATA_LOCATION.to_owned()
}

/// Configuration of the storage collaborator.
///
/// # Example (YAML)
/// ```yaml
/// filesystem_url: s3://data-lake/assets
/// metadata_location: .asset_metadata
/// credential_block: lake
/// credentials:
///   lake:
///     access_key_id: ${LAKE_KEY_ID}
///     secret_access_key: ${LAKE_SECRET}
/// options:
///   region: eu-west-1
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// `file://path`, `memory://`, `s3://bucket/prefix`, `gs://bucket/prefix`,
    /// `az://container/prefix`, `<scheme>://root` or a bare local path.
    #[serde(default = "default_filesystem_url")]
    pub filesystem_url: String,

    /// Root of run records and manifests, relative to the storage root.
    #[serde(default = "default_metadata_location")]
    pub metadata_location: String,

    /// Name of the credential set passed to the backend.
    #[serde(default)]
    pub credential_block: Option<String>,

    /// Named credential sets: name to backend option map.
    #[serde(default)]
    pub credentials: HashMap<String, HashMap<String, String>>,

    /// Extra backend options.
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            filesystem_url: default_filesystem_url(),
            metadata_location: default_metadata_location(),
            credential_block: None,
            credentials: HashMap::new(),
            options: HashMap::new(),
        }
    }
}

impl StorageConfig {
    pub fn new(filesystem_url: &str) -> Self {
        StorageConfig {
            filesystem_url: filesystem_url.to_owned(),
            ..Self::default()
        }
    }

    pub fn with_metadata_location(mut self, location: &str) -> Self {
        self.metadata_location = location.to_owned();
        self
    }

    pub fn with_credential_block(mut self, name: &str) -> Self {
        self.credential_block = Some(name.to_owned());
        self
    }

    pub fn with_credentials(mut self, name: &str, credentials: HashMap<String, String>) -> Self {
        self.credentials.insert(name.to_owned(), credentials);
        self
    }

    pub fn with_option(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.to_owned(), value.into());
        self
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        serde_yaml::from_str(yaml).map_err(|e| {
            Error::configuration_error(format!("Failed to parse YAML configuration: {}", e))
        })
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| {
            Error::configuration_error(format!("Failed to parse JSON configuration: {}", e))
        })
    }

    /// Load configuration from a TOML string.
    #[cfg(feature = "toml")]
    pub fn from_toml(toml: &str) -> Result<Self, Error> {
        toml::from_str(toml).map_err(|e| {
            Error::configuration_error(format!("Failed to parse TOML configuration: {}", e))
        })
    }

    /// Configuration from `FILESYSTEM_URL`, `ASSET_METADATA_LOCATION` and
    /// `FILESYSTEM_BLOCK_NAME`; unset variables keep the defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Like [StorageConfig::from_env] with a custom variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = StorageConfig::default();
        if let Some(url) = lookup(FILESYSTEM_URL_VAR) {
            config.filesystem_url = url;
        }
        if let Some(location) = lookup(ASSET_METADATA_LOCATION_VAR) {
            config.metadata_location = location;
        }
        config.credential_block = lookup(FILESYSTEM_BLOCK_NAME_VAR).filter(|b| !b.is_empty());
        config
    }

    /// Serialize configuration to YAML string.
    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).map_err(|e| {
            Error::general_error(format!("Failed to serialize configuration to YAML: {}", e))
        })
    }

    /// Serialize configuration to JSON string.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| {
            Error::general_error(format!("Failed to serialize configuration to JSON: {}", e))
        })
    }

    /// Expand `${VAR_NAME}` references in all string values.
    pub fn expand_env_vars(&mut self) -> Result<(), Error> {
        self.filesystem_url = expand_env_vars(&self.filesystem_url)?;
        self.metadata_location = expand_env_vars(&self.metadata_location)?;
        for credentials in self.credentials.values_mut() {
            for value in credentials.values_mut() {
                *value = expand_env_vars(value)?;
            }
        }
        for value in self.options.values_mut() {
            if let serde_json::Value::String(s) = value {
                *s = expand_env_vars(s)?;
            }
        }
        Ok(())
    }

    /// Backend options: `options` plus the selected credential set.
    pub fn backend_options(&self) -> Result<HashMap<String, String>, Error> {
        let mut result = HashMap::new();
        for (key, value) in &self.options {
            let string_value = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => value.to_string(),
            };
            result.insert(key.clone(), string_value);
        }
        if let Some(block) = &self.credential_block {
            let credentials = self.credentials.get(block).ok_or_else(|| {
                Error::configuration_error(format!(
                    "Credential block '{}' is not configured; available: {}",
                    block,
                    self.credentials.keys().cloned().collect::<Vec<_>>().join(", ")
                ))
            })?;
            result.extend(credentials.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(result)
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR_NAME}` syntax. If the environment variable is not set,
/// returns an error.
///
/// # Example
/// ```
/// use assetry_store::config::expand_env_vars;
/// std::env::set_var("ASSETRY_DOC_VAR", "hello");
/// assert_eq!(expand_env_vars("prefix_${ASSETRY_DOC_VAR}_suffix").unwrap(), "prefix_hello_suffix");
/// ```
pub fn expand_env_vars(input: &str) -> Result<String, Error> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(ch) => var_name.push(ch),
                    None => {
                        return Err(Error::configuration_error(format!(
                            "Unclosed environment variable reference in: {}",
                            input
                        )))
                    }
                }
            }
            let value = std::env::var(&var_name).map_err(|_| {
                Error::configuration_error(format!("Environment variable '{}' is not set", var_name))
            })?;
            result.push_str(&value);
        } else {
            result.push(c);
        }
    }

    Ok(result)
}
