//! Credentials read from environment variables.
//!
//! Fields are read from `{PREFIX}_{FIELD}` variables when
//! [EnvCredentials::from_env] is called; nothing is cached between calls.
//! `{PREFIX}_CREDENTIAL_BLOCK_NAME` names the credential set the values are
//! stored under in a [StorageConfig].

use std::collections::BTreeMap;
use std::fmt;

use assetry_core::error::Error;

use crate::config::StorageConfig;

const REDACTED: &str = "***";

/// Description of one credential field.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialField {
    pub name: String,
    pub default: Option<String>,
    pub required: bool,
    pub secret: bool,
}

impl CredentialField {
    pub fn required(name: &str) -> Self {
        CredentialField {
            name: name.to_owned(),
            default: None,
            required: true,
            secret: false,
        }
    }

    pub fn optional(name: &str) -> Self {
        CredentialField {
            required: false,
            ..Self::required(name)
        }
    }

    pub fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.to_owned());
        self
    }

    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    fn variable(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.name).to_uppercase()
    }
}

#[derive(Clone, PartialEq)]
pub struct EnvCredentials {
    prefix: String,
    credential_block: Option<String>,
    values: BTreeMap<String, String>,
    secrets: Vec<String>,
}

impl EnvCredentials {
    pub fn from_env(prefix: &str, fields: &[CredentialField]) -> Result<Self, Error> {
        Self::from_vars(prefix, fields, |name| std::env::var(name).ok())
    }

    /// Like [EnvCredentials::from_env] with a custom variable lookup.
    pub fn from_vars(
        prefix: &str,
        fields: &[CredentialField],
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, Error> {
        let mut values = BTreeMap::new();
        let mut missing = Vec::new();
        for field in fields {
            let variable = field.variable(prefix);
            match lookup(&variable).or_else(|| field.default.clone()) {
                Some(value) => {
                    values.insert(field.name.clone(), value);
                }
                None if field.required => missing.push(variable),
                None => {}
            }
        }
        if !missing.is_empty() {
            return Err(Error::configuration_error(format!(
                "Missing credential environment variable(s): {}",
                missing.join(", ")
            )));
        }
        let credential_block = lookup(&format!("{}_CREDENTIAL_BLOCK_NAME", prefix).to_uppercase())
            .filter(|b| !b.is_empty());
        Ok(EnvCredentials {
            prefix: prefix.to_owned(),
            credential_block,
            values,
            secrets: fields.iter().filter(|f| f.secret).map(|f| f.name.clone()).collect(),
        })
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(|s| s.as_str())
    }

    pub fn credential_block(&self) -> Option<&str> {
        self.credential_block.as_deref()
    }

    /// Store the values as a credential set of `config` and select it.
    /// The set is named by the credential block, or by the lowercase prefix.
    pub fn apply(&self, config: &mut StorageConfig) {
        let name = self
            .credential_block
            .clone()
            .unwrap_or_else(|| self.prefix.to_lowercase());
        config.credentials.insert(
            name.clone(),
            self.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        );
        config.credential_block = Some(name);
    }
}

impl fmt::Debug for EnvCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self
            .values
            .iter()
            .map(|(k, v)| {
                if self.secrets.contains(k) {
                    (k.as_str(), REDACTED)
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect::<BTreeMap<_, _>>();
        f.debug_struct("EnvCredentials")
            .field("prefix", &self.prefix)
            .field("credential_block", &self.credential_block)
            .field("values", &values)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<CredentialField> {
        vec![
            CredentialField::required("access_key_id"),
            CredentialField::required("secret_access_key").secret(),
            CredentialField::optional("region").with_default("us-east-1"),
            CredentialField::optional("endpoint"),
        ]
    }

    fn lookup(name: &str) -> Option<String> {
        match name {
            "LAKE_ACCESS_KEY_ID" => Some("id".to_owned()),
            "LAKE_SECRET_ACCESS_KEY" => Some("very-secret".to_owned()),
            "LAKE_CREDENTIAL_BLOCK_NAME" => Some("prod".to_owned()),
            _ => None,
        }
    }

    #[test]
    fn test_from_vars() {
        let credentials = EnvCredentials::from_vars("lake", &fields(), lookup).unwrap();
        assert_eq!(credentials.get("access_key_id"), Some("id"));
        assert_eq!(credentials.get("region"), Some("us-east-1"));
        assert_eq!(credentials.get("endpoint"), None);
        assert_eq!(credentials.credential_block(), Some("prod"));
    }

    #[test]
    fn test_missing_required() {
        let e = EnvCredentials::from_vars("other", &fields(), lookup).unwrap_err();
        assert!(e.message.contains("OTHER_ACCESS_KEY_ID"));
        assert!(e.message.contains("OTHER_SECRET_ACCESS_KEY"));
    }

    #[test]
    fn test_secrets_redacted() {
        let credentials = EnvCredentials::from_vars("lake", &fields(), lookup).unwrap();
        let debug = format!("{:?}", credentials);
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("***"));
        assert!(debug.contains("\"id\""));
    }

    #[test]
    fn test_apply() {
        let credentials = EnvCredentials::from_vars("lake", &fields(), lookup).unwrap();
        let mut config = StorageConfig::new("s3://lake");
        credentials.apply(&mut config);
        assert_eq!(config.credential_block.as_deref(), Some("prod"));
        let options = config.backend_options().unwrap();
        assert_eq!(options["secret_access_key"], "very-secret");
    }
}
