//! Field validation for create/update requests.

use std::collections::{BTreeMap, HashSet};

use rowbook_xlsx::CellValue;

use crate::error::{FieldErrors, Result, StoreError};
use crate::projection::{LogicalRow, SheetLayout};
use crate::version::VERSION_COLUMN;

/// Field values of a create/update request, keyed by column name.
pub type Fields = BTreeMap<String, CellValue>;

pub const CREATED_AT_COLUMN: &str = "_created_at";
pub const CREATED_BY_COLUMN: &str = "_created_by";
pub const UPDATED_AT_COLUMN: &str = "_updated_at";
pub const UPDATED_BY_COLUMN: &str = "_updated_by";

/// Stamped by the engine when present in the header; never set by callers.
pub const AUDIT_COLUMNS: [&str; 4] = [
    CREATED_AT_COLUMN,
    CREATED_BY_COLUMN,
    UPDATED_AT_COLUMN,
    UPDATED_BY_COLUMN,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Create,
    Update,
}

/// Headers ending in `*` or containing `(required)` mark required columns.
pub fn is_required_column(name: &str) -> bool {
    let name = name.trim();
    name.ends_with('*') || name.to_lowercase().contains("(required)")
}

/// Columns whose existing values are all numbers (and that hold at least one).
pub fn numeric_columns(layout: &SheetLayout, rows: &[LogicalRow]) -> HashSet<String> {
    layout
        .columns
        .iter()
        .filter(|column| column.name != VERSION_COLUMN)
        .filter(|column| {
            let mut values = rows
                .iter()
                .filter_map(|row| row.get(&column.name))
                .filter(|value| !value.is_null())
                .peekable();
            values.peek().is_some() && values.all(|value| matches!(value, CellValue::Number(_)))
        })
        .map(|column| column.name.clone())
        .collect()
}

pub struct Validator<'a> {
    pub layout: &'a SheetLayout,
    pub key_column: &'a str,
    pub numeric: HashSet<String>,
    /// Columns holding a formula in the row being updated.
    pub formula_columns: HashSet<String>,
}

impl<'a> Validator<'a> {
    pub fn new(layout: &'a SheetLayout, key_column: &'a str, rows: &[LogicalRow]) -> Self {
        Self {
            layout,
            key_column,
            numeric: numeric_columns(layout, rows),
            formula_columns: HashSet::new(),
        }
    }

    /// Check `fields` and return them cleaned: storage and audit columns dropped, numeric text
    /// aimed at numeric columns coerced to numbers, blank text turned into nulls.
    pub fn validate(&self, fields: &Fields, mode: Mode) -> Result<Fields> {
        let mut errors = FieldErrors::new();
        let mut cleaned = Fields::new();

        for (name, value) in fields {
            if name == VERSION_COLUMN || AUDIT_COLUMNS.contains(&name.as_str()) {
                log::debug!("ignoring managed column {name:?}");
                continue;
            }
            if name == self.key_column {
                if mode == Mode::Update {
                    log::debug!("ignoring key change on update");
                    continue;
                }
                cleaned.insert(name.clone(), value.clone());
                continue;
            }
            if self.layout.column(name).is_none() {
                errors.insert(name.clone(), "unknown column".to_string());
                continue;
            }
            if self.formula_columns.contains(name) {
                errors.insert(name.clone(), "cell holds a formula".to_string());
                continue;
            }

            let value = match value {
                CellValue::Text(text) if text.trim().is_empty() => CellValue::Null,
                CellValue::Text(text) if self.numeric.contains(name) => {
                    match text.trim().parse::<f64>() {
                        Ok(n) if n.is_finite() => CellValue::Number(n),
                        _ => {
                            errors.insert(name.clone(), "expected a number".to_string());
                            continue;
                        }
                    }
                }
                CellValue::Number(n) if !n.is_finite() => {
                    errors.insert(name.clone(), "expected a finite number".to_string());
                    continue;
                }
                other => other.clone(),
            };
            if value.is_null() && is_required_column(name) {
                errors.insert(name.clone(), "value is required".to_string());
                continue;
            }
            cleaned.insert(name.clone(), value);
        }

        if mode == Mode::Create {
            for column in &self.layout.columns {
                let missing = cleaned.get(&column.name).map_or(true, CellValue::is_null);
                if is_required_column(&column.name) && missing && !errors.contains_key(&column.name)
                {
                    errors.insert(column.name.clone(), "value is required".to_string());
                }
            }
        }

        if errors.is_empty() {
            Ok(cleaned)
        } else {
            log::debug!("rejected fields: {errors:?}");
            Err(StoreError::Validation(errors))
        }
    }
}
