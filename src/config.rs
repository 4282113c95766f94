// Loader configuration
// Every named deploy/trigger parameter must be supplied; nothing here has a baked-in value.

use crate::error::{LoadError, LoadResult};
use crate::storage::ObjectUri;
use crate::warehouse::{TableId, WriteDisposition};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const REGION: &str = "REGION";
pub const REGISTRY_NAME: &str = "REGISTRY_NAME";
pub const IMAGE_NAME: &str = "IMAGE_NAME";
pub const SERVICE_NAME: &str = "SERVICE_NAME";
pub const PORT: &str = "PORT";
pub const PROJECT_ID: &str = "GCP_PROJECT_ID";
pub const DATASET: &str = "BQ_DATASET";
pub const TABLE_NAME: &str = "BQ_TABLE_NAME";
pub const BUCKET_NAME: &str = "GCS_BUCKET_NAME";
pub const SOURCE_PATH: &str = "GCS_CSV_FILE_PATH";

/// Parameters that must be present, in reporting order
pub const REQUIRED: [&str; 10] = [
    REGION,
    REGISTRY_NAME,
    IMAGE_NAME,
    SERVICE_NAME,
    PORT,
    PROJECT_ID,
    DATASET,
    TABLE_NAME,
    BUCKET_NAME,
    SOURCE_PATH,
];

// Backend locations and load behaviour; optional
pub const STORAGE_ROOT: &str = "STORAGE_ROOT";
pub const WAREHOUSE_ROOT: &str = "WAREHOUSE_ROOT";
pub const WRITE_DISPOSITION: &str = "WRITE_DISPOSITION";

pub const DEFAULT_STORAGE_ROOT: &str = "storage";
pub const DEFAULT_WAREHOUSE_ROOT: &str = "warehouse";

/// Load `.env` from the working directory (or a parent) into the process
/// environment. Variables already set are kept. Returns the file used.
pub fn load_dotenv() -> Option<PathBuf> {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::debug!(path = %path.display(), "loaded .env");
            Some(path)
        }
        Err(e) if e.not_found() => None,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable .env");
            None
        }
    }
}

/// Load a specific env file; same precedence as `load_dotenv`
pub fn load_env_file(path: &Path) -> LoadResult<()> {
    dotenvy::from_path(path)
        .map_err(|e| LoadError::invalid_config(path.display().to_string(), e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    pub region: String,
    pub registry_name: String,
    pub image_name: String,
    pub service_name: String,
    pub port: u16,
    pub source: ObjectUri,
    pub destination: TableId,
    pub storage_root: PathBuf,
    pub warehouse_root: PathBuf,
    pub write_disposition: WriteDisposition,
}

impl LoaderConfig {
    /// Resolve from process environment variables
    pub fn from_env() -> LoadResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from a map of parameter name to value
    pub fn from_map(values: &HashMap<String, String>) -> LoadResult<Self> {
        Self::from_lookup(|key| values.get(key).cloned())
    }

    /// Resolve through an arbitrary lookup. Blank values count as missing, and
    /// all missing names are reported together.
    pub fn from_lookup<F>(lookup: F) -> LoadResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let missing: Vec<String> = REQUIRED
            .iter()
            .filter(|key| get(**key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(LoadError::ConfigurationMissing(missing));
        }

        let required = |key: &str| get(key).unwrap_or_default();

        let port_value = required(PORT);
        let port: u16 = port_value.parse().map_err(|_| {
            LoadError::invalid_config(PORT, format!("'{}' is not a port number", port_value))
        })?;

        let source = ObjectUri::new(&required(BUCKET_NAME), &required(SOURCE_PATH))?;
        let destination = TableId::new(
            &required(PROJECT_ID),
            &required(DATASET),
            &required(TABLE_NAME),
        )?;

        let write_disposition = match get(WRITE_DISPOSITION) {
            Some(value) => value.parse()?,
            None => WriteDisposition::default(),
        };

        Ok(LoaderConfig {
            region: required(REGION),
            registry_name: required(REGISTRY_NAME),
            image_name: required(IMAGE_NAME),
            service_name: required(SERVICE_NAME),
            port,
            source,
            destination,
            storage_root: get(STORAGE_ROOT)
                .unwrap_or_else(|| DEFAULT_STORAGE_ROOT.to_string())
                .into(),
            warehouse_root: get(WAREHOUSE_ROOT)
                .unwrap_or_else(|| DEFAULT_WAREHOUSE_ROOT.to_string())
                .into(),
            write_disposition,
        })
    }

    /// Container image reference the service is deployed from
    pub fn image_uri(&self) -> String {
        format!(
            "{}-docker.pkg.dev/{}/{}/{}",
            self.region, self.destination.project, self.registry_name, self.image_name
        )
    }
}
