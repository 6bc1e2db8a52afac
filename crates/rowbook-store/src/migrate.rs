//! Data-sheet migration: copy a sheet's records into a hidden storage sheet.

use std::path::{Path, PathBuf};

use rowbook_xlsx::{
    add_worksheet, render_worksheet, CellValue, SheetVisibility, WorkbookSheet, Worksheet,
};
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::crud::new_key;
use crate::error::{Result, StoreError};
use crate::projection::{project_rows, SheetLayout};
use crate::safe_write::{open_for_write, persist};
use crate::version::VERSION_COLUMN;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrateOptions {
    /// Overrides `dataSheetName` from the config.
    pub data_sheet: Option<String>,
    pub source_sheet: Option<String>,
    pub dry_run: bool,
    pub force_overwrite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationStatus {
    Created,
    DryRun,
    /// The data sheet already exists.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub file: PathBuf,
    pub status: MigrationStatus,
    pub data_sheet: String,
    pub source_sheet: Option<String>,
    pub rows: usize,
    pub backup: Option<PathBuf>,
    pub written_to: Option<PathBuf>,
}

/// First worksheet not starting with `_` and not named `config`, else the first worksheet.
pub fn pick_source_sheet(sheets: &[WorkbookSheet]) -> Option<&WorkbookSheet> {
    let mut worksheets = sheets.iter().filter(|s| s.worksheet_part.is_some());
    let first = worksheets.clone().next();
    worksheets
        .find(|s| !s.name.starts_with('_') && !s.name.eq_ignore_ascii_case("config"))
        .or(first)
}

/// Header plus one row per record, each with a key and a `_version`.
pub fn data_grid(sheet: &Worksheet, key_column: &str) -> Vec<Vec<CellValue>> {
    let Some(mut layout) = SheetLayout::infer(sheet) else {
        return vec![vec![CellValue::from(key_column), CellValue::from(VERSION_COLUMN)]];
    };
    let rows = project_rows(sheet, &layout, key_column);
    for name in [key_column, VERSION_COLUMN] {
        if layout.column(name).is_none() {
            layout.push_column(name);
        }
    }

    let mut grid = Vec::with_capacity(rows.len() + 1);
    grid.push(layout.columns.iter().map(|c| CellValue::from(c.name.as_str())).collect());
    for row in rows {
        let values = layout
            .columns
            .iter()
            .map(|column| {
                if column.name == key_column {
                    if row.key_is_fallback {
                        CellValue::from(new_key())
                    } else {
                        row.get(key_column).cloned().unwrap_or_else(|| row.key.clone().into())
                    }
                } else if column.name == VERSION_COLUMN {
                    CellValue::Number(row.version as f64)
                } else {
                    row.get(&column.name).cloned().unwrap_or_default()
                }
            })
            .collect();
        grid.push(values);
    }
    grid
}

/// Copy the records of a source sheet into a new hidden data sheet.
///
/// Skipped when the data sheet already exists. Unless `dry_run`, a `<file>.bak.<millis>` backup of
/// the original is taken first and the result is persisted through the safe-write policy.
pub fn migrate_to_data_sheet(
    path: &Path,
    config: &StoreConfig,
    options: &MigrateOptions,
) -> Result<MigrationReport> {
    let data_sheet = options
        .data_sheet
        .clone()
        .unwrap_or_else(|| config.data_sheet_name.clone());
    let (plan, mut handle) = open_for_write(path, options.force_overwrite)?;
    let mut report = MigrationReport {
        file: path.to_path_buf(),
        status: MigrationStatus::Skipped,
        data_sheet: data_sheet.clone(),
        source_sheet: None,
        rows: 0,
        backup: None,
        written_to: None,
    };

    if handle
        .sheets
        .iter()
        .any(|s| s.name.eq_ignore_ascii_case(&data_sheet))
    {
        log::info!("{} already has data sheet {data_sheet:?}", path.display());
        return Ok(report);
    }

    let source = match options.source_sheet.as_deref() {
        Some(name) => handle.sheet(name)?.name.clone(),
        None => pick_source_sheet(&handle.sheets)
            .map(|s| s.name.clone())
            .ok_or_else(|| StoreError::SheetNotFound("no worksheet to migrate".to_string()))?,
    };
    let grid = data_grid(&handle.worksheet(&source)?, &config.pk_name);
    report.source_sheet = Some(source.clone());
    report.rows = grid.len() - 1;

    if options.dry_run {
        log::info!(
            "dry run: would copy {} rows from {source:?} into {data_sheet:?}",
            report.rows
        );
        report.status = MigrationStatus::DryRun;
        return Ok(report);
    }

    let backup = rowbook_fs::backup_copy(path).map_err(StoreError::write_failure)?;
    let xml = render_worksheet(&grid).map_err(StoreError::write_failure)?;
    add_worksheet(&mut handle.package, &data_sheet, SheetVisibility::Hidden, xml)
        .map_err(StoreError::write_failure)?;
    let written_to = persist(handle.package, &plan)?;
    log::info!(
        "migrated {} rows from {source:?} into {data_sheet:?} ({})",
        report.rows,
        written_to.display()
    );

    report.status = MigrationStatus::Created;
    report.backup = Some(backup);
    report.written_to = Some(written_to);
    Ok(report)
}
