//! Storage collaborator.
//!
//! Storages address data by POSIX-like paths relative to their root. Paths are
//! normalized: leading `/` and `./` are dropped and repeated separators collapse.

use std::collections::BTreeMap;

use async_trait::async_trait;
use globset::{GlobBuilder, GlobMatcher};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Error;

#[async_trait]
pub trait AsyncStorage: Send + Sync {
    /// Get storage name
    fn storage_name(&self) -> String;

    /// Read a whole file.
    async fn read(&self, path: &str) -> Result<Vec<u8>, Error>;

    /// Write a whole file, replacing existing content.
    async fn write_data(&self, path: &str, data: Vec<u8>) -> Result<(), Error>;

    async fn exists(&self, path: &str) -> Result<bool, Error>;

    /// Paths of files matching a glob pattern, sorted.
    /// `*` stays within one directory level, `**` spans any number of levels.
    async fn glob(&self, pattern: &str) -> Result<Vec<String>, Error>;

    /// Remove a file, or with `recursive` everything below a directory.
    async fn delete_path(&self, path: &str, recursive: bool) -> Result<(), Error>;
}

impl dyn AsyncStorage {
    pub async fn read_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let data = self.read(path).await?;
        serde_json::from_slice(&data).map_err(|e| {
            Error::storage_read_error(path, &self.storage_name(), &format!("invalid JSON: {}", e))
        })
    }

    pub async fn write_json<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<(), Error> {
        let data = serde_json::to_vec_pretty(value)?;
        self.write_data(path, data).await
    }
}

/// Normalized storage path.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join path segments, skipping empty ones.
pub fn join_path(base: &str, name: &str) -> String {
    normalize_path(&format!("{}/{}", base, name))
}

/// Directory part of a path; empty for top-level files.
pub fn parent_path(path: &str) -> String {
    let path = normalize_path(path);
    match path.rsplit_once('/') {
        Some((parent, _)) => parent.to_owned(),
        None => String::new(),
    }
}

/// Glob pattern matching exactly `path`.
pub fn glob_escape(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '{' | '}' => {
                escaped.push('[');
                escaped.push(c);
                escaped.push(']');
            }
            _ => escaped.push_str(&globset::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    escaped
}

/// Text of a pattern component without wildcards, `[c]` escapes undone.
fn literal_component(part: &str) -> Option<String> {
    let mut literal = String::new();
    let mut chars = part.chars();
    while let Some(c) = chars.next() {
        match c {
            '[' => {
                let inner = chars.next()?;
                if inner == '!' || inner == '^' || chars.next()? != ']' {
                    return None;
                }
                literal.push(inner);
            }
            '*' | '?' | '{' | '}' | ']' | '\\' => return None,
            _ => literal.push(c),
        }
    }
    Some(literal)
}

/// Literal directory prefix of a glob pattern, used to narrow listings.
pub fn glob_prefix(pattern: &str) -> String {
    let pattern = normalize_path(pattern);
    let parts = pattern.split('/').collect::<Vec<_>>();
    let mut prefix = Vec::new();
    for part in &parts {
        match literal_component(part) {
            Some(literal) => prefix.push(literal),
            None => break,
        }
    }
    if prefix.len() == parts.len() {
        // no wildcard; the pattern is a file path
        prefix.pop();
    }
    prefix.join("/")
}

pub fn glob_matcher(pattern: &str) -> Result<GlobMatcher, Error> {
    GlobBuilder::new(&normalize_path(pattern))
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| Error::general_error(format!("Invalid glob pattern '{}': {}", pattern, e)))
}

/// Storage keeping files in memory.
#[derive(Default)]
pub struct MemoryStorage {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AsyncStorage for MemoryStorage {
    fn storage_name(&self) -> String {
        "memory".to_owned()
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, Error> {
        let path = normalize_path(path);
        match self.data.read().await.get(&path) {
            Some(data) => Ok(data.clone()),
            None => Err(Error::path_not_found(&path)),
        }
    }

    async fn write_data(&self, path: &str, data: Vec<u8>) -> Result<(), Error> {
        let path = normalize_path(path);
        debug!(path = %path, bytes = data.len(), "memory write");
        self.data.write().await.insert(path, data);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, Error> {
        let path = normalize_path(path);
        let data = self.data.read().await;
        if data.contains_key(&path) {
            return Ok(true);
        }
        let directory = format!("{}/", path);
        Ok(data.keys().any(|k| k.starts_with(&directory)))
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<String>, Error> {
        let matcher = glob_matcher(pattern)?;
        Ok(self
            .data
            .read()
            .await
            .keys()
            .filter(|k| matcher.is_match(k.as_str()))
            .cloned()
            .collect())
    }

    async fn delete_path(&self, path: &str, recursive: bool) -> Result<(), Error> {
        let path = normalize_path(path);
        let mut data = self.data.write().await;
        data.remove(&path);
        if recursive {
            let directory = format!("{}/", path);
            data.retain(|k, _| !k.starts_with(&directory) && !path.is_empty());
        }
        Ok(())
    }
}
