use std::collections::BTreeMap;
use std::path::PathBuf;

use rowbook_xlsx::XlsxError;
use thiserror::Error;

use crate::projection::LogicalRow;

/// Per-field validation messages, keyed by column name.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("sheet not found: {0}")]
    SheetNotFound(String),
    #[error("row not found: {0}")]
    RowNotFound(String),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("version conflict: expected {expected}, current is {}", .current.version)]
    VersionConflict {
        expected: u64,
        current: Box<LogicalRow>,
    },
    #[error("validation failed: {}", describe_fields(.0))]
    Validation(FieldErrors),
    #[error("sheet is read-only: {0}")]
    ReadOnly(String),
    #[error("write failed: {0}")]
    WriteFailure(String),
}

fn describe_fields(fields: &FieldErrors) -> String {
    fields
        .iter()
        .map(|(field, message)| format!("{field}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl StoreError {
    /// Stable wire code used in the JSON envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not-found",
            StoreError::SheetNotFound(_) => "sheet-not-found",
            StoreError::RowNotFound(_) => "row-not-found",
            StoreError::InvalidDocument(_) => "invalid-document",
            StoreError::VersionConflict { .. } => "version-conflict",
            StoreError::Validation(_) => "validation-error",
            StoreError::ReadOnly(_) => "read-only",
            StoreError::WriteFailure(_) => "write-failure",
        }
    }

    pub(crate) fn write_failure(err: impl std::fmt::Display) -> Self {
        StoreError::WriteFailure(err.to_string())
    }
}

/// Errors raised while reading a workbook are document problems. Write paths map their own
/// failures through [`StoreError::write_failure`].
impl From<XlsxError> for StoreError {
    fn from(err: XlsxError) -> Self {
        StoreError::InvalidDocument(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
