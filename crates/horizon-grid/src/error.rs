//! Error types for the row model.

use std::path::PathBuf;

/// Result type alias for row model operations.
pub type Result<T> = std::result::Result<T, GridError>;

/// Errors that can occur in the row model.
///
/// Only construction and option loading return these as hard failures.
/// Mid-session operations collect them per offending row or column and keep
/// going.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    /// Two rows resolved to the same id within one node manager.
    #[error("Duplicate row id '{id}', row rejected")]
    DuplicateRowId { id: String },

    /// A remove or update referenced an id with no matching node.
    #[error("No row node found with id '{id}'")]
    RowNotFound { id: String },

    /// A remove or update needs an id but no row id getter is configured.
    #[error("Row id getter is required to match transaction rows")]
    MissingRowId,

    /// A tree data path was empty or collided with an existing row.
    #[error("Invalid tree data path for row '{id}': {reason}")]
    InvalidTreePath { id: String, reason: String },

    /// A column names an aggregation function that is not registered.
    #[error("Unknown aggregation function '{name}' on column '{col_id}'")]
    UnknownAggFunc { col_id: String, name: String },

    /// A filter descriptor could not be applied.
    #[error("Invalid filter on column '{col_id}': {reason}")]
    InvalidFilter { col_id: String, reason: String },

    /// Required configuration is missing at construction time.
    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    /// Two column definitions share an id.
    #[error("Duplicate column id '{col_id}'")]
    DuplicateColumn { col_id: String },

    /// A column id does not exist in the column model.
    #[error("Unknown column '{col_id}'")]
    UnknownColumn { col_id: String },

    /// Options could not be deserialised.
    #[error("Invalid grid options: {message}")]
    Config { message: String },

    /// Options file I/O error.
    #[error("Failed to read grid options '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GridError {
    /// Create a tree path error.
    pub fn invalid_tree_path(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTreePath {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a filter error.
    pub fn invalid_filter(col_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            col_id: col_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for per-row data integrity problems.
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            Self::DuplicateRowId { .. }
                | Self::RowNotFound { .. }
                | Self::MissingRowId
                | Self::InvalidTreePath { .. }
        )
    }
}
