//! JSON operation contracts.
//!
//! Every operation returns a JSON value and never fails: errors become
//! `{"error": <code>, "message": ...}` envelopes. A version conflict also carries the current row
//! under `current`, and a validation error its per-field messages under `fields`.

use std::path::Path;

use rowbook_xlsx::CellValue;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::StoreConfig;
use crate::crud::{self, MutationOptions};
use crate::error::{FieldErrors, Result, StoreError};
use crate::metadata::workbook_meta;
use crate::migrate::{migrate_to_data_sheet as migrate, MigrateOptions};
use crate::query::{read_sheet as read, ReadOptions};
use crate::safe_write;
use crate::validate::Fields;

pub fn error_envelope(err: &StoreError) -> Value {
    let mut envelope = json!({
        "error": err.code(),
        "message": err.to_string(),
    });
    match err {
        StoreError::VersionConflict { current, .. } => {
            envelope["current"] = serde_json::to_value(&**current).unwrap_or(Value::Null);
        }
        StoreError::Validation(fields) => {
            envelope["fields"] = serde_json::to_value(fields).unwrap_or(Value::Null);
        }
        _ => {}
    }
    envelope
}

fn envelope<T: Serialize>(result: Result<T>) -> Value {
    match result.and_then(|value| {
        serde_json::to_value(value).map_err(|err| StoreError::InvalidDocument(err.to_string()))
    }) {
        Ok(value) => value,
        Err(err) => {
            log::debug!("operation failed: {err}");
            error_envelope(&err)
        }
    }
}

/// Convert a JSON object of field values. Arrays and nested objects are rejected per field.
pub fn fields_from_json(value: &Value) -> Result<Fields> {
    let empty = Map::new();
    let object = match value {
        Value::Object(object) => object,
        Value::Null => &empty,
        _ => {
            let mut errors = FieldErrors::new();
            errors.insert("fields".to_string(), "expected a JSON object".to_string());
            return Err(StoreError::Validation(errors));
        }
    };

    let mut fields = Fields::new();
    let mut errors = FieldErrors::new();
    for (name, value) in object {
        let cell = match value {
            Value::Null => CellValue::Null,
            Value::Bool(b) => CellValue::Boolean(*b),
            Value::Number(n) => match n.as_f64() {
                Some(n) => CellValue::Number(n),
                None => {
                    errors.insert(name.clone(), "number out of range".to_string());
                    continue;
                }
            },
            Value::String(s) => CellValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => {
                errors.insert(name.clone(), "expected a scalar value".to_string());
                continue;
            }
        };
        fields.insert(name.clone(), cell);
    }
    if errors.is_empty() {
        Ok(fields)
    } else {
        Err(StoreError::Validation(errors))
    }
}

/// `{sheets: [{name, columns, rows, hidden, headerRow}]}`
pub fn get_workbook_meta(path: &Path, config: &StoreConfig) -> Value {
    envelope(workbook_meta(path, config))
}

/// `{headers, rows, total, page, pageSize}`
pub fn read_sheet(path: &Path, sheet: &str, options: &ReadOptions, config: &StoreConfig) -> Value {
    envelope(read(path, sheet, options, config))
}

/// `{success: true, row}`
pub fn create_row(
    path: &Path,
    sheet: &str,
    fields: &Value,
    options: &MutationOptions,
    config: &StoreConfig,
) -> Value {
    let result = fields_from_json(fields)
        .and_then(|fields| crud::create_row(path, sheet, &fields, config, options));
    envelope(result.map(|m| {
        json!({
            "success": true,
            "row": m.row,
            "writtenTo": m.written_to.display().to_string(),
        })
    }))
}

/// `{success: true, row}` or `{error: "version-conflict", current}`
pub fn update_row(
    path: &Path,
    sheet: &str,
    key: &str,
    changes: &Value,
    expected_version: Option<u64>,
    options: &MutationOptions,
    config: &StoreConfig,
) -> Value {
    let result = fields_from_json(changes).and_then(|changes| {
        crud::update_row(path, sheet, key, &changes, expected_version, config, options)
    });
    envelope(result.map(|m| {
        json!({
            "success": true,
            "row": m.row,
            "writtenTo": m.written_to.display().to_string(),
        })
    }))
}

/// `{success: true}` or `{error: "version-conflict", current}`
pub fn delete_row(
    path: &Path,
    sheet: &str,
    key: &str,
    expected_version: Option<u64>,
    options: &MutationOptions,
    config: &StoreConfig,
) -> Value {
    let result = crud::delete_row(path, sheet, key, expected_version, config, options);
    envelope(result.map(|m| {
        json!({ "success": true, "writtenTo": m.written_to.display().to_string() })
    }))
}

/// `{path}` of the macro-free working copy.
pub fn ensure_working_copy(path: &Path) -> Value {
    let result = safe_write::ensure_working_copy(path);
    envelope(result.map(|p| json!({ "path": p.display().to_string() })))
}

pub fn migrate_to_data_sheet(path: &Path, options: &MigrateOptions, config: &StoreConfig) -> Value {
    envelope(migrate(path, config, options))
}
