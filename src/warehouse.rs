// Warehouse tables
// project -> dataset -> table, backed by one SQLite file per dataset.

use crate::error::{LoadError, LoadResult};
use crate::record::StateRecord;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Destination columns and their declared types, in order
pub const COLUMNS: [(&str, &str); 5] = [
    ("state", "TEXT"),
    ("abbreviation", "TEXT"),
    ("capital", "TEXT"),
    ("population", "INTEGER"),
    ("area_sq_mi", "INTEGER"),
];

/// Fully-qualified table name: `project.dataset.table`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableId {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableId {
    pub fn new(project: &str, dataset: &str, table: &str) -> LoadResult<Self> {
        Ok(TableId {
            project: identifier("GCP_PROJECT_ID", project)?,
            dataset: identifier("BQ_DATASET", dataset)?,
            table: identifier("BQ_TABLE_NAME", table)?,
        })
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// `[A-Za-z_][A-Za-z0-9_-]*`
fn identifier(key: &str, value: &str) -> LoadResult<String> {
    let value = value.trim();
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        None => false,
    };

    if !valid {
        return Err(LoadError::invalid_config(
            key,
            format!("'{}' is not a valid identifier", value),
        ));
    }
    Ok(value.to_string())
}

/// What happens to rows already in the destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteDisposition {
    /// Add the batch after existing rows (no deduplication)
    #[default]
    Append,
    /// Replace the table contents with the batch
    Truncate,
}

impl WriteDisposition {
    pub fn name(&self) -> &str {
        match self {
            WriteDisposition::Append => "append",
            WriteDisposition::Truncate => "truncate",
        }
    }
}

impl fmt::Display for WriteDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WriteDisposition {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(WriteDisposition::Append),
            "truncate" => Ok(WriteDisposition::Truncate),
            other => Err(LoadError::invalid_config(
                "WRITE_DISPOSITION",
                format!("expected 'append' or 'truncate', got '{}'", other),
            )),
        }
    }
}

pub trait Warehouse: Send + Sync {
    /// Provision the destination table (and its dataset) if absent
    fn create_table(&self, table: &TableId) -> LoadResult<()>;

    /// Write a batch in one unit: all rows land or none do
    fn write_rows(
        &self,
        table: &TableId,
        rows: &[StateRecord],
        disposition: WriteDisposition,
    ) -> LoadResult<usize>;

    fn row_count(&self, table: &TableId) -> LoadResult<u64>;

    fn read_rows(&self, table: &TableId) -> LoadResult<Vec<StateRecord>>;
}

/// SQLite-backed warehouse rooted at a directory: `<root>/<project>/<dataset>.db`
#[derive(Debug, Clone)]
pub struct SqliteWarehouse {
    root: PathBuf,
}

impl SqliteWarehouse {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SqliteWarehouse { root: root.into() }
    }

    pub fn dataset_path(&self, table: &TableId) -> PathBuf {
        self.root
            .join(&table.project)
            .join(format!("{}.db", table.dataset))
    }

    /// Open an existing dataset; a missing dataset is a schema problem, not a new file
    fn open_dataset(&self, table: &TableId) -> LoadResult<Connection> {
        let path = self.dataset_path(table);
        if !path.exists() {
            return Err(LoadError::schema(
                table,
                format!("dataset {}.{} does not exist", table.project, table.dataset),
            ));
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    /// Table must exist, carry every destination column with its declared type,
    /// and have no other column an insert of those five would leave NULL
    fn check_schema(conn: &Connection, table: &TableId) -> LoadResult<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table.table))?;
        let columns: Vec<TableColumn> = stmt
            .query_map([], |row| {
                Ok(TableColumn {
                    name: row.get(1)?,
                    declared_type: row.get(2)?,
                    not_null: row.get::<_, i64>(3)? != 0,
                    has_default: row.get::<_, Value>(4)? != Value::Null,
                    primary_key: row.get::<_, i64>(5)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err(LoadError::schema(table, "table does not exist"));
        }

        for (name, expected_type) in COLUMNS {
            match columns.iter().find(|col| col.name == name) {
                None => {
                    return Err(LoadError::schema(table, format!("missing column {}", name)));
                }
                Some(col) if !col.declared_type.eq_ignore_ascii_case(expected_type) => {
                    return Err(LoadError::schema(
                        table,
                        format!(
                            "column {} is {}, expected {}",
                            name, col.declared_type, expected_type
                        ),
                    ));
                }
                Some(_) => {}
            }
        }

        let unfillable = columns.iter().find(|col| {
            !COLUMNS.iter().any(|(name, _)| col.name == *name)
                && col.not_null
                && !col.has_default
                && !col.is_rowid_alias()
        });
        if let Some(col) = unfillable {
            return Err(LoadError::schema(
                table,
                format!("extra column {} is NOT NULL without a default", col.name),
            ));
        }

        Ok(())
    }
}

/// One row of `PRAGMA table_info`
struct TableColumn {
    name: String,
    declared_type: String,
    not_null: bool,
    has_default: bool,
    primary_key: bool,
}

impl TableColumn {
    /// `INTEGER PRIMARY KEY` is filled from the rowid
    fn is_rowid_alias(&self) -> bool {
        self.primary_key && self.declared_type.eq_ignore_ascii_case("INTEGER")
    }
}

fn to_integer(table: &TableId, column: &str, value: u64) -> LoadResult<i64> {
    i64::try_from(value).map_err(|_| {
        LoadError::schema(
            table,
            format!("{} value {} does not fit INTEGER", column, value),
        )
    })
}

impl Warehouse for SqliteWarehouse {
    fn create_table(&self, table: &TableId) -> LoadResult<()> {
        let path = self.dataset_path(table);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LoadError::TransientService(format!("creating dataset directory: {}", e))
            })?;
        }

        let conn = Connection::open(&path)?;
        // WAL for crash recovery
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let column_defs: Vec<String> = COLUMNS
            .iter()
            .map(|(name, ty)| format!("{} {} NOT NULL", name, ty))
            .collect();
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
                table.table,
                column_defs.join(", ")
            ),
            [],
        )?;

        Self::check_schema(&conn, table)?;
        tracing::info!(%table, path = %path.display(), "table ready");
        Ok(())
    }

    fn write_rows(
        &self,
        table: &TableId,
        rows: &[StateRecord],
        disposition: WriteDisposition,
    ) -> LoadResult<usize> {
        let mut conn = self.open_dataset(table)?;
        Self::check_schema(&conn, table)?;

        let tx = conn.transaction()?;

        if disposition == WriteDisposition::Truncate {
            let removed = tx.execute(&format!("DELETE FROM \"{}\"", table.table), [])?;
            tracing::debug!(%table, removed, "table truncated");
        }

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO \"{}\" (state, abbreviation, capital, population, area_sq_mi)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                table.table
            ))?;

            for row in rows {
                stmt.execute(params![
                    row.state,
                    row.abbreviation,
                    row.capital,
                    to_integer(table, "population", row.population)?,
                    to_integer(table, "area_sq_mi", row.area_sq_mi)?,
                ])?;
                inserted += 1;
            }
        }

        // Dropping an uncommitted transaction rolls it back
        tx.commit()?;

        Ok(inserted)
    }

    fn row_count(&self, table: &TableId) -> LoadResult<u64> {
        let conn = self.open_dataset(table)?;
        Self::check_schema(&conn, table)?;

        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", table.table),
            [],
            |row| row.get(0),
        )?;

        Ok(count.max(0) as u64)
    }

    fn read_rows(&self, table: &TableId) -> LoadResult<Vec<StateRecord>> {
        let conn = self.open_dataset(table)?;
        Self::check_schema(&conn, table)?;

        let mut stmt = conn.prepare(&format!(
            "SELECT state, abbreviation, capital, population, area_sq_mi
             FROM \"{}\"
             ORDER BY rowid",
            table.table
        ))?;

        let rows = stmt
            .query_map([], |row| {
                let population: i64 = row.get(3)?;
                let area: i64 = row.get(4)?;

                Ok(StateRecord {
                    state: row.get(0)?,
                    abbreviation: row.get(1)?,
                    capital: row.get(2)?,
                    population: u64::try_from(population)
                        .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(3, population))?,
                    area_sq_mi: u64::try_from(area)
                        .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(4, area))?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(state: &str, abbreviation: &str) -> StateRecord {
        StateRecord {
            state: state.to_string(),
            abbreviation: abbreviation.to_string(),
            capital: "Capital".to_string(),
            population: 1000,
            area_sq_mi: 100,
        }
    }

    fn table() -> TableId {
        TableId::new("demo-project", "census", "states").unwrap()
    }

    #[test]
    fn test_table_id_display() {
        assert_eq!(table().to_string(), "demo-project.census.states");
    }

    #[test]
    fn test_table_id_rejects_bad_identifiers() {
        let err = TableId::new("demo", "census", "states; DROP TABLE x").unwrap_err();
        assert_eq!(err.kind(), "ConfigurationInvalid");
        assert!(TableId::new("demo", "", "states").is_err());
        assert!(TableId::new("1demo", "census", "states").is_err());
    }

    #[test]
    fn test_write_disposition_from_str() {
        assert_eq!("append".parse::<WriteDisposition>().unwrap(), WriteDisposition::Append);
        assert_eq!("TRUNCATE".parse::<WriteDisposition>().unwrap(), WriteDisposition::Truncate);
        assert!("upsert".parse::<WriteDisposition>().is_err());
        assert_eq!(WriteDisposition::default(), WriteDisposition::Append);
    }

    #[test]
    fn test_create_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = SqliteWarehouse::new(dir.path());
        let table = table();

        warehouse.create_table(&table).unwrap();
        let rows = vec![record("Alabama", "AL"), record("Alaska", "AK")];
        let written = warehouse
            .write_rows(&table, &rows, WriteDisposition::Append)
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(warehouse.row_count(&table).unwrap(), 2);
        assert_eq!(warehouse.read_rows(&table).unwrap(), rows);
    }

    #[test]
    fn test_create_table_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = SqliteWarehouse::new(dir.path());

        warehouse.create_table(&table()).unwrap();
        warehouse.create_table(&table()).unwrap();
        assert_eq!(warehouse.row_count(&table()).unwrap(), 0);
    }

    #[test]
    fn test_append_duplicates_and_truncate_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = SqliteWarehouse::new(dir.path());
        let table = table();
        warehouse.create_table(&table).unwrap();

        let rows = vec![record("Alabama", "AL")];
        warehouse.write_rows(&table, &rows, WriteDisposition::Append).unwrap();
        warehouse.write_rows(&table, &rows, WriteDisposition::Append).unwrap();
        assert_eq!(warehouse.row_count(&table).unwrap(), 2);

        warehouse.write_rows(&table, &rows, WriteDisposition::Truncate).unwrap();
        assert_eq!(warehouse.row_count(&table).unwrap(), 1);
    }

    #[test]
    fn test_missing_dataset_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = SqliteWarehouse::new(dir.path());

        let err = warehouse
            .write_rows(&table(), &[record("Alabama", "AL")], WriteDisposition::Append)
            .unwrap_err();

        assert_eq!(err.kind(), "SchemaError");
        assert!(!warehouse.dataset_path(&table()).exists());
    }

    #[test]
    fn test_missing_table_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = SqliteWarehouse::new(dir.path());
        warehouse.create_table(&table()).unwrap();

        let other = TableId::new("demo-project", "census", "capitals").unwrap();
        let err = warehouse.row_count(&other).unwrap_err();

        assert_eq!(err.kind(), "SchemaError");
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_column_mismatch_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = SqliteWarehouse::new(dir.path());
        let table = table();

        let path = warehouse.dataset_path(&table);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let conn = Connection::open(&path).unwrap();
        conn.execute(
            "CREATE TABLE states (state TEXT, abbreviation TEXT, capital TEXT, population TEXT)",
            [],
        )
        .unwrap();
        drop(conn);

        let err = warehouse
            .write_rows(&table, &[record("Alabama", "AL")], WriteDisposition::Append)
            .unwrap_err();
        assert_eq!(err.kind(), "SchemaError");

        // Inspect the message of a type mismatch too
        let conn = Connection::open(&path).unwrap();
        conn.execute("ALTER TABLE states ADD COLUMN area_sq_mi INTEGER", []).unwrap();
        drop(conn);
        let err = warehouse.row_count(&table).unwrap_err();
        assert!(err.to_string().contains("column population is TEXT"));
    }

    #[test]
    fn test_extra_required_column_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = SqliteWarehouse::new(dir.path());
        let table = table();

        let path = warehouse.dataset_path(&table);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let conn = Connection::open(&path).unwrap();
        conn.execute(
            "CREATE TABLE states (state TEXT, abbreviation TEXT, capital TEXT,
                population INTEGER, area_sq_mi INTEGER, region TEXT NOT NULL)",
            [],
        )
        .unwrap();
        drop(conn);

        let california = StateRecord {
            state: "California".to_string(),
            abbreviation: "CA".to_string(),
            capital: "Sacramento".to_string(),
            population: 39538223,
            area_sq_mi: 163695,
        };
        let err = warehouse
            .write_rows(&table, &[california], WriteDisposition::Append)
            .unwrap_err();

        assert_eq!(err.kind(), "SchemaError");
        assert!(err.to_string().contains("region"));
    }

    #[test]
    fn test_extra_columns_with_defaults_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = SqliteWarehouse::new(dir.path());
        let table = table();

        let path = warehouse.dataset_path(&table);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let conn = Connection::open(&path).unwrap();
        conn.execute(
            "CREATE TABLE states (id INTEGER PRIMARY KEY, state TEXT, abbreviation TEXT,
                capital TEXT, population INTEGER, area_sq_mi INTEGER,
                region TEXT NOT NULL DEFAULT 'unknown', notes TEXT)",
            [],
        )
        .unwrap();
        drop(conn);

        let written = warehouse
            .write_rows(&table, &[record("Alabama", "AL")], WriteDisposition::Append)
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(warehouse.row_count(&table).unwrap(), 1);
    }

    #[test]
    fn test_out_of_range_value_rolls_back_batch() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = SqliteWarehouse::new(dir.path());
        let table = table();
        warehouse.create_table(&table).unwrap();

        let mut bad = record("Texas", "TX");
        bad.population = u64::MAX;
        let rows = vec![record("Alabama", "AL"), bad];

        let err = warehouse
            .write_rows(&table, &rows, WriteDisposition::Append)
            .unwrap_err();

        assert_eq!(err.kind(), "SchemaError");
        assert_eq!(warehouse.row_count(&table).unwrap(), 0);
    }
}
