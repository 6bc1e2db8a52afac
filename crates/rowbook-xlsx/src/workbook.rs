//! Workbook-level structure: the ordered `<sheet>` list of `xl/workbook.xml` and the worksheet
//! parts it resolves to.

use std::collections::HashSet;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::openxml::{
    add_relationship, part_relationships, remove_relationships, resolve_target,
    REL_TYPE_WORKSHEET,
};
use crate::package::{XlsxError, XlsxPackage, WORKBOOK_PART};
use crate::xml::{
    attr_value, escape_attr, insert_before_end, local_name, prefixed_tag, rewrite_elements,
    with_attr, ElementAction,
};

const WORKSHEET_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Longest sheet name Excel accepts.
pub const MAX_SHEET_NAME_LEN: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SheetVisibility {
    #[default]
    Visible,
    Hidden,
    VeryHidden,
}

impl SheetVisibility {
    fn from_state(state: &str) -> Self {
        match state {
            "hidden" => SheetVisibility::Hidden,
            "veryHidden" => SheetVisibility::VeryHidden,
            _ => SheetVisibility::Visible,
        }
    }

    fn state_attr(self) -> Option<&'static str> {
        match self {
            SheetVisibility::Visible => None,
            SheetVisibility::Hidden => Some("hidden"),
            SheetVisibility::VeryHidden => Some("veryHidden"),
        }
    }
}

/// One `<sheet>` entry of the workbook, in tab order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookSheet {
    pub name: String,
    pub sheet_id: u32,
    pub rel_id: String,
    pub visibility: SheetVisibility,
    /// Resolved worksheet part; `None` for chartsheets, macrosheets and dangling relationships.
    pub worksheet_part: Option<String>,
}

impl WorkbookSheet {
    pub fn is_hidden(&self) -> bool {
        self.visibility != SheetVisibility::Visible
    }
}

/// The `<sheet>` entries of a `workbook.xml` in tab order, parts left unresolved.
pub fn parse_workbook_sheets(workbook_xml: &[u8]) -> Result<Vec<WorkbookSheet>, XlsxError> {
    let mut sheets = Vec::new();
    rewrite_elements(workbook_xml, b"sheet", |e| {
        sheets.push(sheet_entry(e)?);
        Ok(ElementAction::Keep)
    })?;
    Ok(sheets)
}

fn sheet_entry(e: &BytesStart<'_>) -> Result<WorkbookSheet, XlsxError> {
    let required = |key: &'static str| -> Result<String, XlsxError> {
        let local = key.rsplit(':').next().unwrap_or(key);
        attr_value(e, local.as_bytes())?.ok_or(XlsxError::MissingAttr(key))
    };
    let sheet_id = required("sheetId")?
        .trim()
        .parse::<u32>()
        .map_err(|_| XlsxError::InvalidSheetId)?;
    let visibility = attr_value(e, b"state")?
        .map(|state| SheetVisibility::from_state(&state))
        .unwrap_or_default();

    Ok(WorkbookSheet {
        name: required("name")?,
        sheet_id,
        rel_id: required("r:id")?,
        visibility,
        worksheet_part: None,
    })
}

/// Ordered workbook sheets with their worksheet parts resolved through `workbook.xml.rels`.
pub fn workbook_sheets(package: &XlsxPackage) -> Result<Vec<WorkbookSheet>, XlsxError> {
    let mut sheets = parse_workbook_sheets(package.require_part(WORKBOOK_PART)?)?;
    let rels = part_relationships(package, WORKBOOK_PART)?;
    for sheet in &mut sheets {
        sheet.worksheet_part = rels
            .iter()
            .find(|rel| rel.id == sheet.rel_id)
            .filter(|rel| !rel.is_external() && rel.has_type(REL_TYPE_WORKSHEET))
            .map(|rel| resolve_target(WORKBOOK_PART, &rel.target))
            .filter(|part| package.has_part(part));
    }
    Ok(sheets)
}

/// Reject names Excel refuses: empty, too long, or containing `[]:*?/\`.
pub fn validate_sheet_name(name: &str) -> Result<(), XlsxError> {
    if name.trim().is_empty() {
        return Err(XlsxError::Invalid("sheet name is empty".to_string()));
    }
    if name.chars().count() > MAX_SHEET_NAME_LEN {
        return Err(XlsxError::Invalid(format!(
            "sheet name {name:?} is longer than {MAX_SHEET_NAME_LEN} characters"
        )));
    }
    if let Some(c) = name.chars().find(|c| "[]:*?/\\".contains(*c)) {
        return Err(XlsxError::Invalid(format!(
            "sheet name {name:?} contains forbidden character {c:?}"
        )));
    }
    if name.starts_with('\'') || name.ends_with('\'') {
        return Err(XlsxError::Invalid(format!(
            "sheet name {name:?} cannot start or end with an apostrophe"
        )));
    }
    Ok(())
}

/// Append a new worksheet to the end of the tab order.
///
/// Writes the worksheet part, its workbook relationship, its content-type override and the
/// `<sheet>` entry. Sheet names are unique case-insensitively.
pub fn add_worksheet(
    package: &mut XlsxPackage,
    name: &str,
    visibility: SheetVisibility,
    worksheet_xml: Vec<u8>,
) -> Result<WorkbookSheet, XlsxError> {
    validate_sheet_name(name)?;
    let existing = parse_workbook_sheets(package.require_part(WORKBOOK_PART)?)?;
    if existing.iter().any(|s| s.name.eq_ignore_ascii_case(name)) {
        return Err(XlsxError::Invalid(format!("sheet {name:?} already exists")));
    }

    let mut n = existing.len() + 1;
    let part = loop {
        let candidate = format!("xl/worksheets/sheet{n}.xml");
        if !package.has_part(&candidate) {
            break candidate;
        }
        n += 1;
    };
    package.set_part(part.clone(), worksheet_xml);
    package.ensure_content_type_override(&part, WORKSHEET_CONTENT_TYPE)?;
    let rel_id = add_relationship(package, WORKBOOK_PART, REL_TYPE_WORKSHEET, &part)?;

    let sheet_id = existing.iter().map(|s| s.sheet_id).max().unwrap_or(0) + 1;
    let workbook_xml = package.require_part(WORKBOOK_PART)?.to_vec();
    let id_attr = relationship_id_attr(&workbook_xml)?;
    let state = visibility
        .state_attr()
        .map(|s| format!(r#" state="{s}""#))
        .unwrap_or_default();
    let escaped_name = escape_attr(name);
    let updated = insert_before_end(&workbook_xml, b"sheets", |container| {
        let id = match &id_attr {
            Some(qname) => format!(r#"{qname}="{rel_id}""#),
            None => format!(r#"xmlns:r="{REL_NS}" r:id="{rel_id}""#),
        };
        format!(
            r#"<{} name="{escaped_name}" sheetId="{sheet_id}"{state} {id}/>"#,
            prefixed_tag(container, "sheet")
        )
    })?;
    package.set_part(WORKBOOK_PART, updated);
    log::info!("added worksheet {name:?} as {part}");

    Ok(WorkbookSheet {
        name: name.to_string(),
        sheet_id,
        rel_id,
        visibility,
        worksheet_part: Some(part),
    })
}

/// Qualified name of the relationship-id attribute an existing `<sheet>` uses (e.g. `r:id`), or
/// of a prefix bound to the relationships namespace on the root element.
fn relationship_id_attr(workbook_xml: &[u8]) -> Result<Option<String>, XlsxError> {
    let mut reader = Reader::from_reader(workbook_xml);
    let mut buf = Vec::new();
    let mut root_prefix = None;
    let mut seen_root = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => {
                if !seen_root {
                    seen_root = true;
                    for attr in e.attributes().with_checks(false) {
                        let attr = attr?;
                        let key = attr.key.as_ref();
                        if let Some(prefix) = key.strip_prefix(b"xmlns:") {
                            if attr.unescape_value()? == REL_NS {
                                root_prefix = Some(String::from_utf8_lossy(prefix).into_owned());
                            }
                        }
                    }
                }
                if e.local_name().as_ref() == b"sheet" {
                    for attr in e.attributes().with_checks(false) {
                        let attr = attr?;
                        let key = attr.key.as_ref();
                        if key.contains(&b':') && local_name(key) == b"id" {
                            return Ok(Some(String::from_utf8_lossy(key).into_owned()));
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(root_prefix.map(|prefix| format!("{prefix}:id")))
}

/// Remove the `<sheet>` entries whose relationship ids are in `rel_ids`.
///
/// Sheet-scoped defined names of removed sheets are dropped and the `localSheetId` of the
/// remaining ones is renumbered; an `activeTab` that falls off the end resets to the first tab.
/// Returns the names of the removed sheets.
pub fn remove_sheets_by_rel_id(
    package: &mut XlsxPackage,
    rel_ids: &HashSet<String>,
) -> Result<Vec<String>, XlsxError> {
    let workbook_xml = package.require_part(WORKBOOK_PART)?.to_vec();
    let sheets = parse_workbook_sheets(&workbook_xml)?;
    let removed_idx: Vec<usize> = sheets
        .iter()
        .enumerate()
        .filter(|(_, s)| rel_ids.contains(&s.rel_id))
        .map(|(i, _)| i)
        .collect();
    if removed_idx.is_empty() {
        return Ok(Vec::new());
    }
    let remaining = sheets.len() - removed_idx.len();

    let mut xml = rewrite_elements(&workbook_xml, b"sheet", |e| {
        let rel_id = e
            .attributes()
            .with_checks(false)
            .flatten()
            .find(|attr| local_name(attr.key.as_ref()) == b"id")
            .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()));
        Ok(match rel_id {
            Some(id) if rel_ids.contains(&id) => ElementAction::Drop,
            _ => ElementAction::Keep,
        })
    })?
    .unwrap_or(workbook_xml);

    if let Some(updated) = rewrite_elements(&xml, b"definedName", |e| {
        let Some(local) = attr_value(e, b"localSheetId")? else {
            return Ok(ElementAction::Keep);
        };
        let Ok(local) = local.trim().parse::<usize>() else {
            return Ok(ElementAction::Keep);
        };
        if removed_idx.contains(&local) {
            return Ok(ElementAction::Drop);
        }
        let shift = removed_idx.iter().filter(|idx| **idx < local).count();
        if shift == 0 {
            return Ok(ElementAction::Keep);
        }
        Ok(ElementAction::Replace(with_attr(
            e,
            "localSheetId",
            &(local - shift).to_string(),
        )?))
    })? {
        xml = updated;
    }

    if let Some(updated) = rewrite_elements(&xml, b"workbookView", |e| {
        let active = attr_value(e, b"activeTab")?
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if active < remaining {
            return Ok(ElementAction::Keep);
        }
        Ok(ElementAction::Replace(with_attr(e, "activeTab", "0")?))
    })? {
        xml = updated;
    }

    package.set_part(WORKBOOK_PART, xml);
    remove_relationships(package, WORKBOOK_PART, |rel| rel_ids.contains(&rel.id))?;
    Ok(removed_idx
        .into_iter()
        .map(|idx| sheets[idx].name.clone())
        .collect())
}
