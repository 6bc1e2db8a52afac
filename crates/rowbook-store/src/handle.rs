use std::path::{Path, PathBuf};

use rowbook_xlsx::{read_worksheet, workbook_sheets, SharedStrings, WorkbookSheet, Worksheet, XlsxPackage};

use crate::error::{Result, StoreError};
use crate::safe_write::fresh_sidecar;

/// A workbook opened from disk for the duration of one operation. Never cached across calls.
#[derive(Debug, Clone)]
pub struct WorkbookHandle {
    /// File the package was read from (the original or its sidecar).
    pub path: PathBuf,
    pub package: XlsxPackage,
    pub sheets: Vec<WorkbookSheet>,
    pub shared_strings: SharedStrings,
    /// VBA project, Excel 4.0 macrosheets or dialog sheets present.
    pub has_macros: bool,
}

impl WorkbookHandle {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(path.to_path_buf()));
            }
            Err(err) => return Err(StoreError::InvalidDocument(format!("{}: {err}", path.display()))),
        };
        let package = XlsxPackage::from_bytes(&bytes)?;
        let sheets = workbook_sheets(&package)?;
        let shared_strings = SharedStrings::load(&package)?;
        let has_macros = package.macro_presence().any();
        log::debug!(
            "opened {} ({} sheets, macros: {has_macros})",
            path.display(),
            sheets.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            package,
            sheets,
            shared_strings,
            has_macros,
        })
    }

    /// Open the document reads should see: for a macro-enabled `path`, the `.data.xlsx` sidecar
    /// when it exists and is at least as new; otherwise `path` itself.
    pub fn open_for_read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        let original = Self::open(path)?;
        if !original.has_macros {
            return Ok(original);
        }
        match fresh_sidecar(path) {
            Some(sidecar) => {
                log::debug!("reading {} through sidecar {}", path.display(), sidecar.display());
                Self::open(&sidecar)
            }
            None => Ok(original),
        }
    }

    pub fn sheet(&self, name: &str) -> Result<&WorkbookSheet> {
        self.sheets
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| StoreError::SheetNotFound(name.to_string()))
    }

    /// Worksheet part name of sheet `name`. Chartsheets and dangling entries are not found.
    pub fn worksheet_part(&self, name: &str) -> Result<String> {
        self.sheet(name)?
            .worksheet_part
            .clone()
            .filter(|part| self.package.has_part(part))
            .ok_or_else(|| StoreError::SheetNotFound(name.to_string()))
    }

    pub fn worksheet(&self, name: &str) -> Result<Worksheet> {
        let part = self.worksheet_part(name)?;
        let xml = self.package.require_part(&part)?;
        Ok(read_worksheet(xml, &self.shared_strings)?)
    }
}
