// Load error types
// Every failure of a load surfaces as one of these kinds; nothing is retried.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Missing required configuration: {}", .0.join(", "))]
    ConfigurationMissing(Vec<String>),

    #[error("Invalid configuration for {key}: {message}")]
    ConfigurationInvalid { key: String, message: String },

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: u64, message: String },

    #[error("Schema error for table {table}: {message}")]
    Schema { table: String, message: String },

    #[error("Service call failed: {0}")]
    TransientService(String),
}

impl LoadError {
    /// Create a new Parse error at a 1-based source line
    pub fn parse(line: u64, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Create a new Schema error for a destination table
    pub fn schema(table: impl ToString, message: impl Into<String>) -> Self {
        Self::Schema {
            table: table.to_string(),
            message: message.into(),
        }
    }

    /// Create a new ConfigurationInvalid error
    pub fn invalid_config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigurationInvalid {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::ConfigurationMissing(_) => "ConfigurationMissing",
            LoadError::ConfigurationInvalid { .. } => "ConfigurationInvalid",
            LoadError::SourceNotFound(_) => "SourceNotFound",
            LoadError::Parse { .. } => "ParseError",
            LoadError::Schema { .. } => "SchemaError",
            LoadError::TransientService(_) => "TransientServiceError",
        }
    }

    /// Line number carried by a parse error
    pub fn line(&self) -> Option<u64> {
        match self {
            LoadError::Parse { line, .. } => Some(*line),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for LoadError {
    fn from(err: rusqlite::Error) -> Self {
        LoadError::TransientService(format!("warehouse: {}", err))
    }
}

/// Result type alias for load operations
pub type LoadResult<T> = Result<T, LoadError>;
