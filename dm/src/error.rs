//! Fatal error taxonomy for a mapping run
//!
//! Recoverable failures (dropped fields, rejected rows, failed writes) never
//! surface here: they are counted and audited at the narrowest scope. Only
//! the errors below abort a run.

use thiserror::Error;

use crate::schema::SchemaError;
use crate::source::SourceError;

/// Errors that abort a mapping run
#[derive(Debug, Error)]
pub enum MapperError {
    /// Missing or invalid map, schema path or setting (FatalConfigError)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Schema could not be loaded, dereferenced or normalized
    #[error("Schema resolution error: {0}")]
    Schema(#[from] SchemaError),

    /// Row source could not be opened
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MapperError {
    /// Build a configuration error from anything displayable
    pub fn config(message: impl Into<String>) -> Self {
        MapperError::Config(message.into())
    }

    /// Every variant aborts the run; kept explicit so callers can match on it
    pub fn is_fatal(&self) -> bool {
        match self {
            MapperError::Config(_) => true,
            MapperError::Schema(_) => true,
            MapperError::Source(_) => true,
            MapperError::Io(_) => true,
            MapperError::Json(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message() {
        let err = MapperError::config("Map path not specified");
        assert_eq!(err.to_string(), "Configuration error: Map path not specified");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_schema_error_converts() {
        let err: MapperError = SchemaError::MissingEntityType.into();
        assert!(matches!(err, MapperError::Schema(_)));
        assert!(err.is_fatal());
    }
}
