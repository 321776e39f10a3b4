use assetry_core::error::Error;
use assetry_core::store::{glob_matcher, glob_prefix, normalize_path, AsyncStorage};
use async_trait::async_trait;
use opendal::{ErrorKind, Operator};
use tracing::debug;

/// Storage over an OpenDAL operator (local filesystem, memory, object stores).
pub struct OpenDalStorage {
    op: Operator,
    name: String,
}

impl OpenDalStorage {
    pub fn new(op: Operator) -> Self {
        let info = op.info();
        let name = format!("{} {}", info.scheme(), info.root());
        OpenDalStorage { op, name }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    fn map_read_error<T>(&self, path: &str, res: opendal::Result<T>) -> Result<T, Error> {
        res.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                Error::path_not_found(path)
            } else {
                Error::storage_read_error(path, &self.storage_name(), &format!("{e} (OpenDAL Read Error)"))
            }
        })
    }

    fn map_write_error<T>(&self, path: &str, res: opendal::Result<T>) -> Result<T, Error> {
        res.map_err(|e| Error::storage_write_error(path, &self.storage_name(), &format!("{e} (OpenDAL Write Error)")))
    }
}

#[async_trait]
impl AsyncStorage for OpenDalStorage {
    fn storage_name(&self) -> String {
        format!("{} storage", self.name)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, Error> {
        let path = normalize_path(path);
        let buffer = self.map_read_error(&path, self.op.read(&path).await)?;
        Ok(buffer.to_vec())
    }

    async fn write_data(&self, path: &str, data: Vec<u8>) -> Result<(), Error> {
        let path = normalize_path(path);
        debug!(path = %path, bytes = data.len(), storage = %self.name, "write");
        self.map_write_error(&path, self.op.write(&path, data).await)?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, Error> {
        let path = normalize_path(path);
        self.map_read_error(&path, self.op.exists(&path).await)
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<String>, Error> {
        let matcher = glob_matcher(pattern)?;
        let prefix = glob_prefix(pattern);
        let directory = if prefix.is_empty() {
            "/".to_owned()
        } else {
            format!("{}/", prefix)
        };
        let entries = match self.op.list_with(&directory).recursive(true).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return self.map_read_error(&directory, Err(e)),
        };
        let mut paths = entries
            .iter()
            .map(|entry| entry.path())
            .filter(|path| !path.ends_with('/'))
            .map(normalize_path)
            .filter(|path| matcher.is_match(path.as_str()))
            .collect::<Vec<_>>();
        paths.sort();
        Ok(paths)
    }

    async fn delete_path(&self, path: &str, recursive: bool) -> Result<(), Error> {
        let path = normalize_path(path);
        if recursive {
            let directory = format!("{}/", path);
            match self.op.remove_all(&directory).await {
                Err(e) if e.kind() != ErrorKind::NotFound => {
                    return self.map_write_error(&path, Err(e));
                }
                _ => {}
            }
        }
        self.map_write_error(&path, self.op.delete(&path).await)
    }
}
