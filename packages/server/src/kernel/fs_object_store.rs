//! Object store backed by a local directory.
//!
//! Keys map to relative paths under the root. Published URLs use the
//! configured public base when there is one, otherwise `file://` paths.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use newsdesk::{ObjectStore, Stage, StageError};

pub struct FsObjectStore {
    root: PathBuf,
    public_url: Option<String>,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_url: None,
        }
    }

    pub fn with_public_url(mut self, base: impl Into<String>) -> Self {
        self.public_url = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `key` under the root, refusing anything that escapes it.
    fn resolve(&self, stage: Stage, key: &str) -> Result<PathBuf, StageError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StageError::permanent(
                stage,
                format!("invalid object key `{}`", key),
            ));
        }
        Ok(self.root.join(relative))
    }

    fn url_for(&self, key: &str, path: &Path) -> String {
        match &self.public_url {
            Some(base) => format!("{}/{}", base, key),
            None => format!("file://{}", path.display()),
        }
    }
}

fn io_error(stage: Stage, key: &str, error: std::io::Error) -> StageError {
    let message = format!("{}: {}", key, error);
    match error.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidInput => {
            StageError::permanent(stage, message)
        }
        _ => StageError::transient(stage, message),
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, StageError> {
        let path = self.resolve(Stage::Upload, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(Stage::Upload, key, e))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| io_error(Stage::Upload, key, e))?;

        debug!(key, content_type, bytes = bytes.len(), "object stored");
        Ok(self.url_for(key, &path))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StageError> {
        let path = self.resolve(Stage::Load, key)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| io_error(Stage::Load, key, e))
    }
}
