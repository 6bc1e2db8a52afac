use std::path::Path;

use serde::Serialize;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::handle::WorkbookHandle;
use crate::projection::{project_rows, SheetLayout};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetMeta {
    pub name: String,
    pub columns: Vec<String>,
    /// Logical (non-blank) rows below the header.
    pub rows: usize,
    pub hidden: bool,
    /// 0-based sheet row of the inferred header; `None` for a sheet without values.
    pub header_row: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkbookMeta {
    pub sheets: Vec<SheetMeta>,
}

/// Enumerate the worksheets of a workbook in tab order with their columns and row counts.
///
/// Chartsheets and sheets listed in `ignoreSheets` are left out. Hidden sheets are reported with
/// `hidden: true`.
pub fn workbook_meta(path: &Path, config: &StoreConfig) -> Result<WorkbookMeta> {
    let handle = WorkbookHandle::open_for_read(path)?;
    let mut sheets = Vec::with_capacity(handle.sheets.len());
    for sheet in &handle.sheets {
        if config.is_ignored(&sheet.name) {
            continue;
        }
        if handle.worksheet_part(&sheet.name).is_err() {
            log::debug!("skipping non-worksheet {:?}", sheet.name);
            continue;
        }
        let worksheet = handle.worksheet(&sheet.name)?;
        let meta = match SheetLayout::infer(&worksheet) {
            Some(layout) => SheetMeta {
                name: sheet.name.clone(),
                columns: layout.names(),
                rows: project_rows(&worksheet, &layout, &config.pk_name).len(),
                hidden: sheet.is_hidden(),
                header_row: Some(layout.header_row),
            },
            None => SheetMeta {
                name: sheet.name.clone(),
                columns: Vec::new(),
                rows: 0,
                hidden: sheet.is_hidden(),
                header_row: None,
            },
        };
        sheets.push(meta);
    }
    Ok(WorkbookMeta { sheets })
}
