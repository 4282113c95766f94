// Loader: object storage CSV -> warehouse table
// Read the whole source, parse every row, then write one batch. No retries.

use crate::config::LoaderConfig;
use crate::error::LoadResult;
use crate::record::parse_records;
use crate::storage::{LocalObjectStore, ObjectStore, ObjectUri};
use crate::warehouse::{SqliteWarehouse, TableId, Warehouse, WriteDisposition};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Outcome of one successful load
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub job_id: Uuid,
    pub source: String,
    pub destination: String,
    pub write_disposition: WriteDisposition,
    /// Rows appended by this load
    pub rows_loaded: usize,
    /// Rows in the destination after the load; `None` if the count could not
    /// be read once the batch was committed
    pub table_rows: Option<u64>,
    pub source_sha256: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct Loader<S, W> {
    store: S,
    warehouse: W,
    disposition: WriteDisposition,
}

impl Loader<LocalObjectStore, SqliteWarehouse> {
    /// Loader over the local backends named in the configuration
    pub fn from_config(config: &LoaderConfig) -> Self {
        Loader::new(
            LocalObjectStore::new(&config.storage_root),
            SqliteWarehouse::new(&config.warehouse_root),
        )
        .with_disposition(config.write_disposition)
    }
}

impl<S: ObjectStore, W: Warehouse> Loader<S, W> {
    pub fn new(store: S, warehouse: W) -> Self {
        Loader {
            store,
            warehouse,
            disposition: WriteDisposition::default(),
        }
    }

    /// Builder pattern: choose append or truncate
    pub fn with_disposition(mut self, disposition: WriteDisposition) -> Self {
        self.disposition = disposition;
        self
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    /// Load every row of `source` into `destination`.
    ///
    /// Parsing finishes before anything is written, so a bad row leaves the
    /// destination untouched. Appending does not deduplicate: loading the same
    /// file twice doubles its rows.
    pub fn load(&self, source: &ObjectUri, destination: &TableId) -> LoadResult<LoadReport> {
        let job_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = tracing::info_span!("load", %job_id, %source, %destination);
        let _guard = span.enter();

        tracing::info!(disposition = %self.disposition, "load started");

        let body = self.store.read_object(source).map_err(|e| {
            tracing::error!(kind = e.kind(), error = %e, "reading source failed");
            e
        })?;
        let source_sha256 = format!("{:x}", Sha256::digest(&body));
        tracing::debug!(bytes = body.len(), sha256 = %source_sha256, "source read");

        let records = parse_records(&body).map_err(|e| {
            tracing::error!(kind = e.kind(), error = %e, "parsing source failed");
            e
        })?;
        tracing::debug!(rows = records.len(), "source parsed");

        let rows_loaded = self
            .warehouse
            .write_rows(destination, &records, self.disposition)
            .map_err(|e| {
                tracing::error!(kind = e.kind(), error = %e, "writing rows failed");
                e
            })?;

        // The batch is committed; a failed count must not turn the load into a failure
        let table_rows = match self.warehouse.row_count(destination) {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(kind = e.kind(), error = %e, "counting destination rows failed");
                None
            }
        };

        let finished_at = Utc::now();
        tracing::info!(
            rows_loaded,
            table_rows = ?table_rows,
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "load complete"
        );

        Ok(LoadReport {
            job_id,
            source: source.to_string(),
            destination: destination.to_string(),
            write_disposition: self.disposition,
            rows_loaded,
            table_rows,
            source_sha256,
            started_at,
            finished_at,
        })
    }
}

/// Run the load described by a configuration against the local backends
pub fn run_load(config: &LoaderConfig) -> LoadResult<LoadReport> {
    Loader::from_config(config).load(&config.source, &config.destination)
}
