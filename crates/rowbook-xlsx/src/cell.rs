use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed cell value carried through the whole read/write pipeline.
///
/// Serializes to the natural JSON scalar (`null`, number, string, boolean).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// `true` for nulls and for text that is empty after trimming.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Display form used for keys, header names and substring filters.
    ///
    /// Integral numbers render without a fractional part (`1.0` -> `"1"`).
    pub fn display(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Boolean(b) => b.to_string(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}

/// Render a number the way SpreadsheetML stores it in `<v>`.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// A 0-indexed cell coordinate within a worksheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum A1ParseError {
    #[error("empty cell reference")]
    Empty,
    #[error("cell reference is missing a column")]
    MissingColumn,
    #[error("cell reference is missing a row")]
    MissingRow,
    #[error("invalid cell reference: {0}")]
    Invalid(String),
}

impl CellRef {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Convert to Excel A1 notation (e.g. `A1`, `BC32`).
    pub fn to_a1(self) -> String {
        format!("{}{}", col_to_name(self.col), self.row + 1)
    }

    /// Parse `A1`, `$B$2` and friends. Row numbers start at 1.
    pub fn from_a1(a1: &str) -> Result<Self, A1ParseError> {
        let text = a1.trim();
        if text.is_empty() {
            return Err(A1ParseError::Empty);
        }
        let invalid = || A1ParseError::Invalid(a1.to_string());

        let body = text.strip_prefix('$').unwrap_or(text);
        let letters_end = body.bytes().take_while(u8::is_ascii_alphabetic).count();
        let (letters, digits) = body.split_at(letters_end);
        let digits = digits.strip_prefix('$').unwrap_or(digits);
        if letters.is_empty() {
            return Err(A1ParseError::MissingColumn);
        }
        if digits.is_empty() {
            return Err(A1ParseError::MissingRow);
        }

        let row = digits
            .parse::<u32>()
            .ok()
            .and_then(|row| row.checked_sub(1))
            .ok_or_else(invalid)?;
        let col = name_to_col(letters).ok_or_else(invalid)?;
        Ok(Self::new(row, col))
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// Inclusive rectangular range of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    pub fn new(a: CellRef, b: CellRef) -> Self {
        Self {
            start: CellRef::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellRef::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    pub fn from_a1(a1: &str) -> Result<Self, A1ParseError> {
        match a1.trim().split_once(':') {
            None => {
                let cell = CellRef::from_a1(a1)?;
                Ok(Self::new(cell, cell))
            }
            Some((a, b)) => Ok(Self::new(CellRef::from_a1(a)?, CellRef::from_a1(b)?)),
        }
    }

    pub fn to_a1(self) -> String {
        if self.start == self.end {
            self.start.to_a1()
        } else {
            format!("{}:{}", self.start.to_a1(), self.end.to_a1())
        }
    }
}

/// Widest sheet Excel allows (`XFD`).
pub(crate) const MAX_COLUMNS: u32 = 16_384;

/// Tallest sheet Excel allows.
pub(crate) const MAX_ROWS: u32 = 1_048_576;

/// `0 -> A`, `25 -> Z`, `26 -> AA`.
pub fn col_to_name(col: u32) -> String {
    let mut letters = Vec::with_capacity(3);
    let mut rest = u64::from(col) + 1;
    while rest > 0 {
        rest -= 1;
        letters.push(char::from(b'A' + (rest % 26) as u8));
        rest /= 26;
    }
    letters.iter().rev().collect()
}

/// Inverse of [`col_to_name`]; case-insensitive. Returns `None` past column `XFD`.
pub fn name_to_col(name: &str) -> Option<u32> {
    if !(1..=3).contains(&name.len()) {
        return None;
    }
    let ordinal = name.bytes().try_fold(0u32, |acc, b| {
        b.is_ascii_alphabetic()
            .then(|| acc * 26 + u32::from(b.to_ascii_uppercase() - b'A') + 1)
    })?;
    (ordinal <= MAX_COLUMNS).then(|| ordinal - 1)
}
