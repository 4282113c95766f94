// Object storage
// The loader only needs to read one object; writing exists so the CLI can stage a source file.

use crate::error::{LoadError, LoadResult};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

pub const URI_SCHEME: &str = "gs://";

/// Location of an object: bucket plus key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUri {
    pub bucket: String,
    pub key: String,
}

impl ObjectUri {
    pub fn new(bucket: &str, key: &str) -> LoadResult<Self> {
        let bucket = bucket.trim();
        let key = key.trim().trim_start_matches('/');

        if bucket.is_empty() || bucket.contains('/') {
            return Err(LoadError::invalid_config(
                "GCS_BUCKET_NAME",
                format!("'{}' is not a bucket name", bucket),
            ));
        }

        let escapes = Path::new(key)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(LoadError::invalid_config(
                "GCS_CSV_FILE_PATH",
                format!("'{}' is not an object path", key),
            ));
        }

        Ok(ObjectUri {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// Parse `gs://bucket/path/to/object`
    pub fn parse(uri: &str) -> LoadResult<Self> {
        let rest = uri.strip_prefix(URI_SCHEME).ok_or_else(|| {
            LoadError::invalid_config("source", format!("'{}' must start with {}", uri, URI_SCHEME))
        })?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        Self::new(bucket, key)
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", URI_SCHEME, self.bucket, self.key)
    }
}

pub trait ObjectStore: Send + Sync {
    /// Read a whole object. A missing object is `SourceNotFound`.
    fn read_object(&self, uri: &ObjectUri) -> LoadResult<Vec<u8>>;

    /// Create or replace an object
    fn write_object(&self, uri: &ObjectUri, body: &[u8]) -> LoadResult<()>;
}

/// Object store backed by a directory: `<root>/<bucket>/<key>`
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalObjectStore { root: root.into() }
    }

    pub fn path_for(&self, uri: &ObjectUri) -> PathBuf {
        self.root.join(&uri.bucket).join(&uri.key)
    }
}

impl ObjectStore for LocalObjectStore {
    fn read_object(&self, uri: &ObjectUri) -> LoadResult<Vec<u8>> {
        let path = self.path_for(uri);
        tracing::debug!(%uri, path = %path.display(), "reading object");

        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(LoadError::SourceNotFound(uri.to_string()))
            }
            Err(e) => Err(LoadError::TransientService(format!(
                "object storage read of {}: {}",
                uri, e
            ))),
        }
    }

    fn write_object(&self, uri: &ObjectUri, body: &[u8]) -> LoadResult<()> {
        let path = self.path_for(uri);
        let io_err = |e: std::io::Error| {
            LoadError::TransientService(format!("object storage write of {}: {}", uri, e))
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&path, body).map_err(io_err)?;

        tracing::info!(%uri, bytes = body.len(), "object written");
        Ok(())
    }
}
