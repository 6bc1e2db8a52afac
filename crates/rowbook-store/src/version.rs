//! Per-row version counters for optimistic concurrency.

use rowbook_xlsx::CellValue;

use crate::error::{Result, StoreError};
use crate::projection::LogicalRow;

/// Column holding each row's version.
pub const VERSION_COLUMN: &str = "_version";

/// Version stored in a `_version` cell. Missing, blank, non-numeric and non-positive values
/// read as `1`.
pub fn read_version(value: &CellValue) -> u64 {
    let n = match value {
        CellValue::Number(n) => *n,
        CellValue::Text(text) => match text.trim().parse::<f64>() {
            Ok(n) => n,
            Err(_) => return 1,
        },
        _ => return 1,
    };
    if n.is_finite() && n >= 1.0 {
        n.trunc() as u64
    } else {
        1
    }
}

pub fn next_version(current: u64) -> u64 {
    current.saturating_add(1)
}

/// Fails with a version conflict carrying `current` when `expected` is given and differs.
pub fn check_expected(current: &LogicalRow, expected: Option<u64>) -> Result<()> {
    match expected {
        Some(expected) if expected != current.version => {
            log::warn!(
                "version conflict on row {}: expected {expected}, current {}",
                current.key,
                current.version
            );
            Err(StoreError::VersionConflict {
                expected,
                current: Box::new(current.clone()),
            })
        }
        _ => Ok(()),
    }
}
