//! Header-row inference.
//!
//! Workbooks carry no schema metadata, so the header row is found by scoring the first rows of
//! the used range. Header rows tend to be full of short, distinct strings and to sit on top of
//! rows that are denser in numbers.

use std::collections::HashSet;

use rowbook_xlsx::CellValue;

/// Rows of the used range considered as header candidates.
pub const HEADER_SCAN_ROWS: usize = 50;

const NON_EMPTY_WEIGHT: i64 = 3;
const UNIQUE_STRING_WEIGHT: i64 = 2;
const DUPLICATE_STRING_PENALTY: i64 = 2;
const NUMERIC_CELL_PENALTY: i64 = 1;
const NUMERIC_NEXT_ROW_BONUS: i64 = 6;
const FULLER_NEXT_ROW_BONUS: i64 = 2;
const LONG_TEXT_PENALTY: i64 = 2;
const LONG_TEXT_AVG_CHARS: f64 = 40.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RowProfile {
    non_empty: i64,
    numeric: i64,
    unique_strings: i64,
    duplicate_strings: i64,
    avg_string_len: f64,
}

impl RowProfile {
    fn of(row: &[CellValue]) -> Self {
        let mut profile = RowProfile::default();
        let mut strings: Vec<String> = Vec::new();
        for value in row {
            if value.is_blank() {
                continue;
            }
            profile.non_empty += 1;
            match value {
                CellValue::Number(_) => profile.numeric += 1,
                other => strings.push(other.display().trim().to_string()),
            }
        }

        let unique: HashSet<String> = strings.iter().map(|s| s.to_lowercase()).collect();
        profile.unique_strings = unique.len() as i64;
        profile.duplicate_strings = strings.len() as i64 - profile.unique_strings;
        if !strings.is_empty() {
            // Length of the strings joined by single spaces, averaged per string.
            let chars: usize = strings.iter().map(|s| s.chars().count()).sum::<usize>()
                + strings.len()
                - 1;
            profile.avg_string_len = chars as f64 / strings.len() as f64;
        }
        profile
    }
}

/// Header score of `row` given the row right below it.
pub fn score_row(row: &[CellValue], next: Option<&[CellValue]>) -> i64 {
    let this = RowProfile::of(row);
    let next = next.map(RowProfile::of).unwrap_or_default();

    let mut score = NON_EMPTY_WEIGHT * this.non_empty + UNIQUE_STRING_WEIGHT * this.unique_strings
        - DUPLICATE_STRING_PENALTY * this.duplicate_strings
        - NUMERIC_CELL_PENALTY * this.numeric;
    if next.numeric > (this.non_empty / 4).max(1) {
        score += NUMERIC_NEXT_ROW_BONUS;
    }
    if next.non_empty > this.non_empty {
        score += FULLER_NEXT_ROW_BONUS;
    }
    if this.avg_string_len > LONG_TEXT_AVG_CHARS {
        score -= LONG_TEXT_PENALTY;
    }
    score
}

/// Index (into `rows`) of the best-scoring header candidate among the first
/// [`HEADER_SCAN_ROWS`] rows. Ties go to the earliest row; an empty input yields `0`.
pub fn infer_header_row(rows: &[Vec<CellValue>]) -> usize {
    let mut best: Option<(usize, i64)> = None;
    for (idx, row) in rows.iter().enumerate().take(HEADER_SCAN_ROWS) {
        let next = rows.get(idx + 1).map(Vec::as_slice);
        let score = score_row(row, next);
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((idx, score));
        }
    }
    best.map(|(idx, _)| idx).unwrap_or(0)
}

/// Name for an unnamed header cell at 0-based `position` within the header row.
pub fn synthetic_column_name(position: usize) -> String {
    format!("Column {}", position + 1)
}

/// Column names from a header row: trimmed, synthetic names for empty cells, and repeats
/// disambiguated as `name (1)`, `name (2)`, ...
pub fn column_names(header: &[CellValue]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(header.len());
    let mut names = Vec::with_capacity(header.len());
    for (position, value) in header.iter().enumerate() {
        let base = match value.display().trim() {
            "" => synthetic_column_name(position),
            name => name.to_string(),
        };
        let mut name = base.clone();
        let mut counter = 1;
        while seen.contains(&name) {
            name = format!("{base} ({counter})");
            counter += 1;
        }
        seen.insert(name.clone());
        names.push(name);
    }
    names
}
