//! Row-oriented record storage on top of XLSX/XLSM workbooks.
//!
//! A worksheet is read as a table: the header row is inferred ([`header`]), rows below it become
//! [`LogicalRow`]s keyed by a primary-key column, and a `_version` column carries an optimistic
//! concurrency counter. Writes are streamed into the worksheet XML so styles, formulas and every
//! untouched part survive. Macro-enabled workbooks are never rewritten in place unless both the
//! per-call force flag and the `ALLOW_XLSM_OVERWRITE` switch are set; otherwise edits land in a
//! macro-free `<file>.data.xlsx` sidecar ([`safe_write`]).
//!
//! [`api`] wraps every operation in a JSON envelope for callers across a process boundary.

pub mod api;
pub mod config;
pub mod crud;
pub mod error;
pub mod handle;
pub mod header;
pub mod metadata;
pub mod migrate;
pub mod projection;
pub mod query;
pub mod safe_write;
pub mod validate;
pub mod version;

pub use config::{ConfigError, StoreConfig};
pub use crud::{create_row, delete_row, update_row, Mutation, MutationOptions};
pub use error::{FieldErrors, Result, StoreError};
pub use handle::WorkbookHandle;
pub use metadata::{workbook_meta, SheetMeta, WorkbookMeta};
pub use migrate::{migrate_to_data_sheet, MigrateOptions, MigrationReport, MigrationStatus};
pub use projection::{Column, LogicalRow, SheetLayout};
pub use query::{read_sheet, ReadOptions, SheetPage, SortDirection, SortSpec};
pub use safe_write::{ensure_working_copy, WritePlan, WriteTarget};
pub use validate::Fields;
pub use version::VERSION_COLUMN;
