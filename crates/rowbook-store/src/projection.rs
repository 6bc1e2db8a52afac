//! Sheet layout (header row + columns) and the logical-row projection of the rows below it.

use rowbook_xlsx::{CellValue, Row, Worksheet};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::header::{column_names, infer_header_row, HEADER_SCAN_ROWS};
use crate::version::{read_version, VERSION_COLUMN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// 0-based sheet column.
    pub col: u32,
}

/// Where a sheet's records live: the inferred header row and its named columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLayout {
    /// 0-based sheet row of the header.
    pub header_row: u32,
    pub columns: Vec<Column>,
}

impl SheetLayout {
    /// Infer the layout from the cells holding values. `None` for a sheet without any.
    pub fn infer(sheet: &Worksheet) -> Option<Self> {
        let range = sheet.value_range()?;
        let scan_end = range
            .end
            .row
            .min(range.start.row.saturating_add(HEADER_SCAN_ROWS as u32 - 1));
        let grid: Vec<Vec<CellValue>> = (range.start.row..=scan_end)
            .map(|r| {
                (range.start.col..=range.end.col)
                    .map(|c| sheet.row(r).map(|row| row.value(c).clone()).unwrap_or_default())
                    .collect()
            })
            .collect();

        let offset = infer_header_row(&grid);
        let names = grid.get(offset).map(|row| column_names(row)).unwrap_or_default();
        let columns = names
            .into_iter()
            .zip(range.start.col..)
            .map(|(name, col)| Column { name, col })
            .collect();
        Some(Self {
            header_row: range.start.row + offset as u32,
            columns,
        })
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// First sheet column right of the header.
    pub fn next_free_col(&self) -> u32 {
        self.columns.iter().map(|c| c.col + 1).max().unwrap_or(0)
    }

    /// Append a column after the last header column and return its sheet column.
    pub fn push_column(&mut self, name: &str) -> u32 {
        let col = self.next_free_col();
        self.columns.push(Column {
            name: name.to_string(),
            col,
        });
        col
    }
}

/// One record: column values in header order plus its key and version.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalRow {
    /// 0-based sheet row.
    pub row: u32,
    pub key: String,
    /// `true` when the key cell is empty and `key` is the `#<row>` fallback.
    pub key_is_fallback: bool,
    pub version: u64,
    pub key_column: String,
    pub values: Vec<(String, CellValue)>,
}

/// `#<excel row number>` key of a row whose key cell is empty.
pub fn fallback_key(row: u32) -> String {
    format!("#{}", row + 1)
}

impl LogicalRow {
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Excel's 1-based row number.
    pub fn excel_row(&self) -> u32 {
        self.row + 1
    }

    #[cfg(test)]
    pub(crate) fn for_tests(key: &str, version: u64) -> Self {
        Self {
            row: 1,
            key: key.to_string(),
            key_is_fallback: false,
            version,
            key_column: "id".to_string(),
            values: vec![
                ("id".to_string(), CellValue::from(key)),
                (VERSION_COLUMN.to_string(), CellValue::Number(version as f64)),
            ],
        }
    }
}

/// Serializes as a JSON object in column order. The key and `_version` are always present;
/// they are appended when the sheet has no such column.
impl Serialize for LogicalRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let has_key = self.values.iter().any(|(name, _)| *name == self.key_column);
        let has_version = self.values.iter().any(|(name, _)| name == VERSION_COLUMN);
        let len = self.values.len() + usize::from(!has_key) + usize::from(!has_version);
        let mut map = serializer.serialize_map(Some(len))?;
        for (name, value) in &self.values {
            if *name == self.key_column && self.key_is_fallback {
                map.serialize_entry(name, &self.key)?;
            } else if name == VERSION_COLUMN {
                map.serialize_entry(name, &self.version)?;
            } else {
                map.serialize_entry(name, value)?;
            }
        }
        if !has_key {
            map.serialize_entry(&self.key_column, &self.key)?;
        }
        if !has_version {
            map.serialize_entry(VERSION_COLUMN, &self.version)?;
        }
        map.end()
    }
}

/// Project one sheet row. `None` for rows whose cells under the header are all blank.
pub fn project_row(row: &Row, layout: &SheetLayout, key_column: &str) -> Option<LogicalRow> {
    let values: Vec<(String, CellValue)> = layout
        .columns
        .iter()
        .map(|column| {
            let value = row.value(column.col);
            let value = if value.is_blank() {
                CellValue::Null
            } else {
                value.clone()
            };
            (column.name.clone(), value)
        })
        .collect();
    if values.iter().all(|(_, value)| value.is_null()) {
        return None;
    }

    let key_value = layout.column(key_column).map(|c| row.value(c.col));
    let (key, key_is_fallback) = match key_value {
        Some(value) if !value.is_blank() => (value.display(), false),
        _ => (fallback_key(row.index), true),
    };
    let version = layout
        .column(VERSION_COLUMN)
        .map(|c| read_version(row.value(c.col)))
        .unwrap_or(1);

    Some(LogicalRow {
        row: row.index,
        key,
        key_is_fallback,
        version,
        key_column: key_column.to_string(),
        values,
    })
}

/// Every non-blank row strictly below the header, in sheet order.
pub fn project_rows(sheet: &Worksheet, layout: &SheetLayout, key_column: &str) -> Vec<LogicalRow> {
    sheet
        .rows
        .iter()
        .filter(|row| row.index > layout.header_row)
        .filter_map(|row| {
            let projected = project_row(row, layout, key_column);
            if projected.is_none() {
                log::trace!("skipping blank row {}", row.index + 1);
            }
            projected
        })
        .collect()
}

pub fn find_row<'a>(rows: &'a [LogicalRow], key: &str) -> Option<&'a LogicalRow> {
    rows.iter().find(|r| r.key == key)
}
