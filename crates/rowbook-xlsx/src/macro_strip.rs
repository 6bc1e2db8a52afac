//! Produce a macro-free package from a macro-enabled one.

use std::collections::{BTreeSet, HashSet};

use crate::openxml::{parse_relationships, part_relationships, remove_relationships, resolve_target};
use crate::package::{WorkbookKind, XlsxError, XlsxPackage, WORKBOOK_PART};
use crate::workbook::remove_sheets_by_rel_id;
use crate::zip_util::part_key;

const VBA_PARTS: [&str; 4] = [
    "xl/vbaproject.bin",
    "xl/vbaprojectsignature.bin",
    "xl/vbadata.xml",
    "xl/_rels/vbaproject.bin.rels",
];

/// What [`strip_macros`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StripReport {
    pub removed_parts: Vec<String>,
    /// Names of macrosheets / dialog sheets dropped from the tab list.
    pub removed_sheets: Vec<String>,
}

fn is_macro_part(name: &str) -> bool {
    let key = part_key(name);
    VBA_PARTS.contains(&key.as_str())
        || key.starts_with("xl/macrosheets/")
        || key.starts_with("xl/dialogsheets/")
}

/// `xl/_rels/workbook.xml.rels` -> `xl/workbook.xml`; `_rels/.rels` -> `""` (package root).
fn rels_source_part(rels_name: &str) -> Option<String> {
    let rels_name = rels_name.trim_start_matches('/');
    let (dir, file) = rels_name.rsplit_once('/').unwrap_or(("", rels_name));
    let source_file = file.strip_suffix(".rels")?;
    let parent = if dir == "_rels" {
        ""
    } else {
        dir.strip_suffix("/_rels")?
    };
    Some(if parent.is_empty() {
        source_file.to_string()
    } else {
        format!("{parent}/{source_file}")
    })
}

/// Remove VBA projects, Excel 4.0 macrosheets and dialog sheets, with every relationship,
/// `<sheet>` entry and content-type override pointing at them, then flip the workbook content
/// type to its macro-free kind.
///
/// Everything else (values, formulas, styles, drawings) is left byte-for-byte intact.
pub fn strip_macros(package: &mut XlsxPackage) -> Result<StripReport, XlsxError> {
    let doomed: BTreeSet<String> = package
        .part_names()
        .filter(|name| is_macro_part(name))
        .map(str::to_string)
        .collect();
    let doomed_keys: HashSet<String> = doomed.iter().map(|n| part_key(n)).collect();
    let targets_doomed = |source: &str, target: &str| {
        doomed_keys.contains(&part_key(&resolve_target(source, target)))
    };

    // Workbook relationships first: sheets pointing at macrosheets leave the tab list with them.
    let sheet_rel_ids: HashSet<String> = part_relationships(package, WORKBOOK_PART)?
        .into_iter()
        .filter(|rel| !rel.is_external() && targets_doomed(WORKBOOK_PART, &rel.target))
        .map(|rel| rel.id)
        .collect();
    let removed_sheets = if sheet_rel_ids.is_empty() {
        Vec::new()
    } else {
        remove_sheets_by_rel_id(package, &sheet_rel_ids)?
    };

    // Any other surviving part that still points at a removed part.
    let rels_parts: Vec<String> = package
        .part_names()
        .filter(|name| name.ends_with(".rels") && !doomed.contains(*name))
        .map(str::to_string)
        .collect();
    for rels_name in rels_parts {
        let Some(source) = rels_source_part(&rels_name) else {
            continue;
        };
        let Some(xml) = package.part(&rels_name) else {
            continue;
        };
        let dangling = parse_relationships(xml)?
            .iter()
            .any(|rel| !rel.is_external() && targets_doomed(&source, &rel.target));
        if dangling {
            remove_relationships(package, &source, |rel| {
                !rel.is_external() && targets_doomed(&source, &rel.target)
            })?;
        }
    }

    for name in &doomed {
        package.remove_part(name);
    }
    package.remove_content_type_overrides(|name| doomed_keys.contains(&part_key(name)))?;

    let kind = package
        .workbook_kind()?
        .unwrap_or(WorkbookKind::Xlsm)
        .macro_free();
    package.set_workbook_kind(kind)?;

    log::info!(
        "stripped {} macro parts and {} macro sheets",
        doomed.len(),
        removed_sheets.len()
    );
    Ok(StripReport {
        removed_parts: doomed.into_iter().collect(),
        removed_sheets,
    })
}
