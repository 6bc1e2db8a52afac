//! Single-row create, update and delete.
//!
//! Each call opens the workbook fresh, patches the one affected row of the worksheet part and
//! persists through the safe-write policy. Other sheets and parts are carried over unchanged.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use rowbook_xlsx::{
    apply_row_edit, drop_calc_chain, read_worksheet, CellPatch, CellRef, CellValue, PatchOutcome,
    RowEdit, Worksheet,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::{FieldErrors, Result, StoreError};
use crate::handle::WorkbookHandle;
use crate::projection::{find_row, project_row, project_rows, LogicalRow, SheetLayout};
use crate::safe_write::{open_for_write, persist, WritePlan};
use crate::validate::{
    Fields, Mode, Validator, AUDIT_COLUMNS, CREATED_AT_COLUMN, CREATED_BY_COLUMN, UPDATED_AT_COLUMN,
    UPDATED_BY_COLUMN,
};
use crate::version::{check_expected, next_version, VERSION_COLUMN};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MutationOptions {
    /// Ask to overwrite a macro-enabled original in place. Only honored together with the
    /// `ALLOW_XLSM_OVERWRITE` environment switch.
    pub force_overwrite: bool,
    /// Recorded in `_created_by` / `_updated_by`; defaults to `system`.
    pub user: Option<String>,
    /// Position among the logical rows for a created row. Appended when absent or past the end.
    pub index: Option<usize>,
}

impl MutationOptions {
    fn user(&self) -> &str {
        self.user
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or("system")
    }
}

/// A freshly generated primary key.
pub fn new_key() -> String {
    Uuid::new_v4().to_string()
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Result of a successful mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub row: LogicalRow,
    /// File the mutated workbook was written to (the original or its sidecar).
    pub written_to: PathBuf,
}

/// One sheet of one workbook being edited.
struct SheetEdit {
    plan: WritePlan,
    handle: WorkbookHandle,
    part: String,
    xml: Vec<u8>,
    structural: bool,
}

impl SheetEdit {
    fn open(path: &Path, sheet: &str, config: &StoreConfig, options: &MutationOptions) -> Result<Self> {
        if config.is_read_only(sheet) {
            log::warn!("rejected mutation of read-only sheet {sheet:?}");
            return Err(StoreError::ReadOnly(sheet.to_string()));
        }
        let (plan, handle) = open_for_write(path, options.force_overwrite)?;
        let part = handle.worksheet_part(sheet)?;
        let xml = handle.package.require_part(&part)?.to_vec();
        Ok(Self {
            plan,
            handle,
            part,
            xml,
            structural: false,
        })
    }

    fn worksheet(&self) -> Result<Worksheet> {
        Ok(read_worksheet(&self.xml, &self.handle.shared_strings)?)
    }

    fn apply(&mut self, edit: &RowEdit) -> Result<PatchOutcome> {
        let outcome = apply_row_edit(&self.xml, edit, &mut self.handle.shared_strings)?;
        if !outcome.skipped_formula_cols.is_empty() {
            log::warn!(
                "left formula cells untouched in columns {:?}",
                outcome.skipped_formula_cols
            );
        }
        self.xml.clone_from(&outcome.xml);
        self.structural |= edit.is_structural();
        Ok(outcome)
    }

    /// Project sheet row `row` of the edited part.
    fn project(&self, row: u32, layout: &SheetLayout, key_column: &str) -> Result<LogicalRow> {
        let sheet = self.worksheet()?;
        sheet
            .row(row)
            .and_then(|r| project_row(r, layout, key_column))
            .ok_or_else(|| StoreError::WriteFailure(format!("row {} vanished while editing", row + 1)))
    }

    fn commit(self) -> Result<PathBuf> {
        let mut package = self.handle.package;
        package.set_part(self.part, self.xml);
        self.handle
            .shared_strings
            .write_back(&mut package)
            .map_err(StoreError::write_failure)?;
        if self.structural {
            drop_calc_chain(&mut package).map_err(StoreError::write_failure)?;
        }
        persist(package, &self.plan)
    }
}

/// Append header cells for `names` missing from `layout`, after the last header column.
fn ensure_columns(edit: &mut SheetEdit, layout: &mut SheetLayout, names: &[&str]) -> Result<()> {
    let mut cells = BTreeMap::new();
    for name in names {
        if layout.column(name).is_none() {
            let col = layout.push_column(name);
            cells.insert(col, CellPatch::Set(CellValue::from(*name)));
        }
    }
    if cells.is_empty() {
        return Ok(());
    }
    log::info!("adding columns {names:?} to header row {}", layout.header_row + 1);
    edit.apply(&RowEdit::Update {
        row: layout.header_row,
        cells,
    })?;
    Ok(())
}

fn set_if_present(cells: &mut BTreeMap<u32, CellValue>, layout: &SheetLayout, column: &str, value: &str) {
    if let Some(c) = layout.column(column) {
        cells.insert(c.col, CellValue::from(value));
    }
}

/// Insert a row. A missing or blank key is generated; `_version` starts at 1.
pub fn create_row(
    path: &Path,
    sheet: &str,
    fields: &Fields,
    config: &StoreConfig,
    options: &MutationOptions,
) -> Result<Mutation> {
    let key_column = config.pk_name.as_str();
    let mut edit = SheetEdit::open(path, sheet, config, options)?;
    let worksheet = edit.worksheet()?;

    let (mut layout, rows) = match SheetLayout::infer(&worksheet) {
        Some(layout) => {
            let rows = project_rows(&worksheet, &layout, key_column);
            (layout, rows)
        }
        None => {
            // Empty sheet: the request's field names become the header.
            let mut layout = SheetLayout {
                header_row: 0,
                columns: Vec::new(),
            };
            layout.push_column(key_column);
            for name in fields.keys() {
                if name != key_column
                    && name != VERSION_COLUMN
                    && !AUDIT_COLUMNS.contains(&name.as_str())
                {
                    layout.push_column(name);
                }
            }
            let header = layout
                .columns
                .iter()
                .map(|c| (c.col, CellPatch::Set(CellValue::from(c.name.as_str()))))
                .collect();
            edit.apply(&RowEdit::Update { row: 0, cells: header })?;
            (layout, Vec::new())
        }
    };

    let cleaned = Validator::new(&layout, key_column, &rows).validate(fields, Mode::Create)?;
    let key = match cleaned.get(key_column).filter(|v| !v.is_blank()) {
        Some(value) => {
            let key = value.display();
            if find_row(&rows, &key).is_some() {
                let mut errors = FieldErrors::new();
                errors.insert(key_column.to_string(), "key already exists".to_string());
                return Err(StoreError::Validation(errors));
            }
            key
        }
        None => new_key(),
    };
    ensure_columns(&mut edit, &mut layout, &[key_column, VERSION_COLUMN])?;

    let mut cells: BTreeMap<u32, CellValue> = BTreeMap::new();
    for (name, value) in &cleaned {
        if let Some(column) = layout.column(name) {
            cells.insert(column.col, value.clone());
        }
    }
    if let Some(column) = layout.column(key_column) {
        let value = cleaned
            .get(key_column)
            .filter(|v| !v.is_blank())
            .cloned()
            .unwrap_or_else(|| CellValue::from(key.as_str()));
        cells.insert(column.col, value);
    }
    if let Some(column) = layout.column(VERSION_COLUMN) {
        cells.insert(column.col, CellValue::Number(1.0));
    }
    set_if_present(&mut cells, &layout, CREATED_AT_COLUMN, &timestamp());
    set_if_present(&mut cells, &layout, CREATED_BY_COLUMN, options.user());

    let position = options.index.filter(|&i| i < rows.len());
    let target_row = match position {
        Some(i) => rows[i].row,
        None => rows
            .last()
            .map(|r| r.row + 1)
            .unwrap_or(layout.header_row + 1),
    };
    // Styles come from the nearest record above the new row (or the one it pushes down).
    let style_source = match position {
        Some(0) => rows.first(),
        Some(i) => rows.get(i - 1),
        None => rows.last(),
    };
    let styles: BTreeMap<u32, u32> = style_source
        .and_then(|source| worksheet.row(source.row))
        .map(|source| {
            layout
                .columns
                .iter()
                .filter_map(|c| source.cell(c.col).and_then(|cell| cell.style).map(|s| (c.col, s)))
                .collect()
        })
        .unwrap_or_default();

    edit.apply(&RowEdit::Insert {
        row: target_row,
        cells,
        styles,
    })?;
    let row = edit.project(target_row, &layout, key_column)?;
    let written_to = edit.commit()?;
    log::info!("created row {} in {sheet:?} at row {}", row.key, target_row + 1);
    Ok(Mutation { row, written_to })
}

/// Apply `changes` to the row keyed `key`, bumping its version.
///
/// With `expected_version` given, a mismatch fails with a version conflict and nothing is
/// written. The key and `_version` cannot be changed through `changes`.
pub fn update_row(
    path: &Path,
    sheet: &str,
    key: &str,
    changes: &Fields,
    expected_version: Option<u64>,
    config: &StoreConfig,
    options: &MutationOptions,
) -> Result<Mutation> {
    let key_column = config.pk_name.as_str();
    let mut edit = SheetEdit::open(path, sheet, config, options)?;
    let worksheet = edit.worksheet()?;
    let mut layout =
        SheetLayout::infer(&worksheet).ok_or_else(|| StoreError::RowNotFound(key.to_string()))?;
    let rows = project_rows(&worksheet, &layout, key_column);
    let current = find_row(&rows, key)
        .cloned()
        .ok_or_else(|| StoreError::RowNotFound(key.to_string()))?;
    check_expected(&current, expected_version)?;

    let cleaned = {
        let mut validator = Validator::new(&layout, key_column, &rows);
        validator.formula_columns = layout
            .columns
            .iter()
            .filter(|c| {
                worksheet
                    .cell(CellRef::new(current.row, c.col))
                    .is_some_and(|cell| cell.has_formula())
            })
            .map(|c| c.name.clone())
            .collect::<HashSet<_>>();
        validator.validate(changes, Mode::Update)?
    };

    ensure_columns(&mut edit, &mut layout, &[key_column, VERSION_COLUMN])?;

    let mut cells: BTreeMap<u32, CellPatch> = BTreeMap::new();
    for (name, value) in &cleaned {
        if let Some(column) = layout.column(name) {
            let patch = if value.is_null() {
                CellPatch::Clear
            } else {
                CellPatch::Set(value.clone())
            };
            cells.insert(column.col, patch);
        }
    }
    if let Some(column) = layout.column(VERSION_COLUMN) {
        cells.insert(
            column.col,
            CellPatch::Set(CellValue::Number(next_version(current.version) as f64)),
        );
    }
    if current.key_is_fallback {
        if let Some(column) = layout.column(key_column) {
            let key = new_key();
            log::info!("assigning key {key} to row {}", current.excel_row());
            cells.insert(column.col, CellPatch::Set(CellValue::from(key)));
        }
    }
    let stamp = timestamp();
    for (column, value) in [(UPDATED_AT_COLUMN, stamp.as_str()), (UPDATED_BY_COLUMN, options.user())] {
        if let Some(c) = layout.column(column) {
            cells.insert(c.col, CellPatch::Set(CellValue::from(value)));
        }
    }

    edit.apply(&RowEdit::Update {
        row: current.row,
        cells,
    })?;
    let row = edit.project(current.row, &layout, key_column)?;
    let written_to = edit.commit()?;
    log::info!("updated row {key} in {sheet:?} to version {}", row.version);
    Ok(Mutation { row, written_to })
}

/// Remove the row keyed `key`, shifting the rows below it up. Returns the removed row.
pub fn delete_row(
    path: &Path,
    sheet: &str,
    key: &str,
    expected_version: Option<u64>,
    config: &StoreConfig,
    options: &MutationOptions,
) -> Result<Mutation> {
    let key_column = config.pk_name.as_str();
    let mut edit = SheetEdit::open(path, sheet, config, options)?;
    let worksheet = edit.worksheet()?;
    let layout =
        SheetLayout::infer(&worksheet).ok_or_else(|| StoreError::RowNotFound(key.to_string()))?;
    let rows = project_rows(&worksheet, &layout, key_column);
    let current = find_row(&rows, key)
        .cloned()
        .ok_or_else(|| StoreError::RowNotFound(key.to_string()))?;
    check_expected(&current, expected_version)?;

    let outcome = edit.apply(&RowEdit::Delete { row: current.row })?;
    if !outcome.applied {
        return Err(StoreError::RowNotFound(key.to_string()));
    }
    let written_to = edit.commit()?;
    log::info!("deleted row {key} from {sheet:?}");
    Ok(Mutation {
        row: current,
        written_to,
    })
}
