//! Filtering, sorting and pagination of logical rows, and the `readSheet` operation.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

use rowbook_xlsx::CellValue;
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::error::Result;
use crate::handle::WorkbookHandle;
use crate::projection::{project_rows, LogicalRow, SheetLayout};

pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// `readSheet` options. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadOptions {
    /// 1-based page number.
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    /// Case-insensitive substring matched against every column value.
    pub filter: Option<String>,
    /// Case-insensitive substring per column; all must match.
    pub column_filters: BTreeMap<String, String>,
    pub sort: Option<SortSpec>,
}

impl ReadOptions {
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetPage {
    pub headers: Vec<String>,
    pub rows: Vec<LogicalRow>,
    /// Row count after filtering, before paging.
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

fn contains_ci(value: &CellValue, needle_lower: &str) -> bool {
    !value.is_null() && value.display().to_lowercase().contains(needle_lower)
}

fn matches(row: &LogicalRow, options: &ReadOptions) -> bool {
    if let Some(filter) = options.filter.as_deref().filter(|f| !f.is_empty()) {
        let needle = filter.to_lowercase();
        let hit = row.values.iter().any(|(_, value)| contains_ci(value, &needle))
            || (row.key_is_fallback && row.key.to_lowercase().contains(&needle));
        if !hit {
            return false;
        }
    }
    options.column_filters.iter().all(|(column, filter)| {
        if filter.is_empty() {
            return true;
        }
        row.get(column)
            .is_some_and(|value| contains_ci(value, &filter.to_lowercase()))
    })
}

/// Numbers sort before booleans, booleans before text; text compares case-insensitively.
fn compare_values(a: &CellValue, b: &CellValue) -> Ordering {
    fn rank(v: &CellValue) -> u8 {
        match v {
            CellValue::Number(_) => 0,
            CellValue::Boolean(_) => 1,
            CellValue::Text(_) => 2,
            CellValue::Null => 3,
        }
    }
    match (a, b) {
        (CellValue::Number(x), CellValue::Number(y)) => x.total_cmp(y),
        (CellValue::Boolean(x), CellValue::Boolean(y)) => x.cmp(y),
        (CellValue::Text(x), CellValue::Text(y)) => x
            .to_lowercase()
            .cmp(&y.to_lowercase())
            .then_with(|| x.cmp(y)),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Stable sort on one column. Nulls go last in both directions.
pub fn sort_rows(rows: &mut [LogicalRow], sort: &SortSpec) {
    rows.sort_by(|a, b| {
        let null = CellValue::Null;
        let va = a.get(&sort.column).unwrap_or(&null);
        let vb = b.get(&sort.column).unwrap_or(&null);
        match (va.is_null(), vb.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => match sort.direction {
                SortDirection::Asc => compare_values(va, vb),
                SortDirection::Desc => compare_values(vb, va),
            },
        }
    });
}

/// Filter, sort and page `rows`. `total` counts the filtered rows.
pub fn run_query(rows: Vec<LogicalRow>, options: &ReadOptions) -> (Vec<LogicalRow>, usize) {
    let mut rows: Vec<LogicalRow> = rows.into_iter().filter(|r| matches(r, options)).collect();
    if let Some(sort) = &options.sort {
        sort_rows(&mut rows, sort);
    }
    let total = rows.len();
    let start = (options.page() - 1).saturating_mul(options.page_size());
    let page = rows
        .into_iter()
        .skip(start)
        .take(options.page_size())
        .collect();
    (page, total)
}

/// Read one page of a sheet's logical rows.
///
/// Reads go to the `.data.xlsx` sidecar when one exists and is at least as new as `path`.
pub fn read_sheet(
    path: &Path,
    sheet: &str,
    options: &ReadOptions,
    config: &StoreConfig,
) -> Result<SheetPage> {
    let handle = WorkbookHandle::open_for_read(path)?;
    let worksheet = handle.worksheet(sheet)?;
    let empty = SheetPage {
        headers: Vec::new(),
        rows: Vec::new(),
        total: 0,
        page: options.page(),
        page_size: options.page_size(),
    };
    let Some(layout) = SheetLayout::infer(&worksheet) else {
        log::debug!("sheet {sheet:?} has no used range");
        return Ok(empty);
    };

    let rows = project_rows(&worksheet, &layout, &config.pk_name);
    let (rows, total) = run_query(rows, options);
    Ok(SheetPage {
        headers: layout.names(),
        rows,
        total,
        ..empty
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn row(key: &str, status: CellValue, score: CellValue) -> LogicalRow {
        LogicalRow {
            row: 0,
            key: key.to_string(),
            key_is_fallback: false,
            version: 1,
            key_column: "id".to_string(),
            values: vec![
                ("id".to_string(), key.into()),
                ("status".to_string(), status),
                ("score".to_string(), score),
            ],
        }
    }

    fn sample() -> Vec<LogicalRow> {
        vec![
            row("a", "Active".into(), CellValue::Number(3.0)),
            row("b", "done".into(), CellValue::Null),
            row("c", "ACTIVE".into(), CellValue::Number(1.0)),
            row("d", CellValue::Null, CellValue::Number(3.0)),
            row("e", "Archived".into(), CellValue::Number(2.0)),
        ]
    }

    fn keys(rows: &[LogicalRow]) -> Vec<&str> {
        rows.iter().map(|r| r.key.as_str()).collect()
    }

    #[test]
    fn filter_is_case_insensitive_across_columns() {
        let options = ReadOptions {
            filter: Some("acti".to_string()),
            ..Default::default()
        };
        let (rows, total) = run_query(sample(), &options);
        assert_eq!(keys(&rows), vec!["a", "c"]);
        assert_eq!(total, 2);
    }

    #[test]
    fn column_filters_all_apply() {
        let options = ReadOptions {
            column_filters: BTreeMap::from([
                ("status".to_string(), "a".to_string()),
                ("score".to_string(), "3".to_string()),
            ]),
            ..Default::default()
        };
        let (rows, _) = run_query(sample(), &options);
        assert_eq!(keys(&rows), vec!["a"]);

        let unknown = ReadOptions {
            column_filters: BTreeMap::from([("nope".to_string(), "x".to_string())]),
            ..Default::default()
        };
        assert_eq!(run_query(sample(), &unknown).1, 0);
    }

    #[test]
    fn sort_is_stable_and_keeps_nulls_last() {
        let asc = ReadOptions {
            sort: Some(SortSpec {
                column: "score".to_string(),
                direction: SortDirection::Asc,
            }),
            ..Default::default()
        };
        assert_eq!(keys(&run_query(sample(), &asc).0), vec!["c", "e", "a", "d", "b"]);

        let desc = ReadOptions {
            sort: Some(SortSpec {
                column: "score".to_string(),
                direction: SortDirection::Desc,
            }),
            ..Default::default()
        };
        assert_eq!(keys(&run_query(sample(), &desc).0), vec!["a", "d", "e", "c", "b"]);

        let by_status = ReadOptions {
            sort: Some(SortSpec {
                column: "status".to_string(),
                direction: SortDirection::Desc,
            }),
            ..Default::default()
        };
        assert_eq!(keys(&run_query(sample(), &by_status).0), vec!["b", "e", "a", "c", "d"]);
    }

    #[test]
    fn pages_slice_after_filtering() {
        let options = ReadOptions {
            page: Some(2),
            page_size: Some(2),
            ..Default::default()
        };
        let (rows, total) = run_query(sample(), &options);
        assert_eq!(keys(&rows), vec!["c", "d"]);
        assert_eq!(total, 5);

        let past_end = ReadOptions {
            page: Some(9),
            page_size: Some(2),
            ..Default::default()
        };
        let (rows, total) = run_query(sample(), &past_end);
        assert!(rows.is_empty());
        assert_eq!(total, 5);
    }

    #[test]
    fn page_options_are_clamped() {
        let options = ReadOptions {
            page: Some(0),
            page_size: Some(10_000),
            ..Default::default()
        };
        assert_eq!(options.page(), 1);
        assert_eq!(options.page_size(), MAX_PAGE_SIZE);
        assert_eq!(ReadOptions::default().page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn options_deserialize_from_camel_case_json() {
        let options: ReadOptions = serde_json::from_str(
            r#"{"page":2,"pageSize":10,"sort":{"column":"score","direction":"desc"},"columnFilters":{"status":"act"}}"#,
        )
        .unwrap();
        assert_eq!(options.page(), 2);
        assert_eq!(options.page_size(), 10);
        assert_eq!(options.sort.unwrap().direction, SortDirection::Desc);
        assert_eq!(options.column_filters["status"], "act");
    }
}
