//! SpreadsheetML package layer for rowbook.
//!
//! - [`XlsxPackage`]: the OPC ZIP inflated into a part map (part name -> bytes). Parts the row
//!   engine never edits are written back byte-for-byte.
//! - [`workbook`]: the ordered sheet list and adding hidden worksheets.
//! - [`worksheet`]: a typed read model of `<sheetData>`.
//! - [`patch`]: streaming row edits (update, insert, delete) with row renumbering.
//! - [`formula`]: relative-reference translation used to expand and rebase shared formulas.
//! - [`macro_strip`]: derive a macro-free package from an `.xlsm`.

pub mod cell;
pub mod formula;
pub mod macro_strip;
pub mod openxml;
mod package;
pub mod patch;
pub mod shared_strings;
pub mod workbook;
pub mod worksheet;
mod xml;
mod zip_util;

pub use cell::{col_to_name, name_to_col, A1ParseError, CellRange, CellRef, CellValue};
pub use macro_strip::{strip_macros, StripReport};
pub use package::{
    MacroPresence, PackageLimits, WorkbookKind, XlsxError, XlsxPackage, CONTENT_TYPES_PART,
    MAX_PACKAGE_PART_BYTES, MAX_PACKAGE_TOTAL_BYTES, WORKBOOK_PART,
};
pub use patch::{apply_row_edit, drop_calc_chain, CellPatch, PatchOutcome, RowEdit};
pub use shared_strings::SharedStrings;
pub use workbook::{add_worksheet, workbook_sheets, SheetVisibility, WorkbookSheet};
pub use worksheet::{read_worksheet, render_worksheet, Cell, Row, Worksheet};
