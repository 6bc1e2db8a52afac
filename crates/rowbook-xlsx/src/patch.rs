//! Streaming row-level edits of a worksheet part.
//!
//! The part is rewritten event by event; everything outside the touched rows (and outside
//! `<sheetData>`) is re-emitted unchanged. Inserting or deleting a row renumbers the `r`
//! attributes of every row below it, and moves the merged cells, conditional formats, data
//! validations and hyperlinks anchored there. Formula cells are never overwritten and ordinary
//! formula text is never rewritten.
//!
//! Shared formulas keep every cell's effective formula. A group whose rows no longer move
//! together is split: the first cell that moves away from its master becomes the master of a
//! new group, with the old master's text translated to its position.

use std::collections::BTreeMap;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::cell::{CellRange, CellRef, CellValue};
use crate::formula::shift_references;
use crate::openxml::{related_parts, remove_relationships, REL_TYPE_CALC_CHAIN};
use crate::package::{XlsxError, XlsxPackage, WORKBOOK_PART};
use crate::shared_strings::SharedStrings;
use crate::worksheet::{cell_attrs, read_plain_text, render_cell, row_index};
use crate::xml::{attr_value, local_name, rewrite_elements, with_attr, ElementAction};

#[derive(Debug, Clone, PartialEq)]
pub enum CellPatch {
    /// Remove the value, keeping the cell's style.
    Clear,
    Set(CellValue),
}

impl CellPatch {
    fn value(&self) -> &CellValue {
        static NULL: CellValue = CellValue::Null;
        match self {
            CellPatch::Clear => &NULL,
            CellPatch::Set(value) => value,
        }
    }
}

/// One row-level edit. Row and column indices are 0-based.
#[derive(Debug, Clone, PartialEq)]
pub enum RowEdit {
    /// Patch cells of an existing (or not yet materialized) row in place.
    Update {
        row: u32,
        cells: BTreeMap<u32, CellPatch>,
    },
    /// Insert a row at `row`, moving that row and everything below it down by one.
    ///
    /// `styles` gives the style index per column; styled columns without a value are written as
    /// empty styled cells.
    Insert {
        row: u32,
        cells: BTreeMap<u32, CellValue>,
        styles: BTreeMap<u32, u32>,
    },
    /// Remove `row`, moving everything below it up by one.
    Delete { row: u32 },
}

impl RowEdit {
    pub fn is_structural(&self) -> bool {
        !matches!(self, RowEdit::Update { .. })
    }

    fn target_row(&self) -> u32 {
        match self {
            RowEdit::Update { row, .. } | RowEdit::Insert { row, .. } | RowEdit::Delete { row } => {
                *row
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PatchOutcome {
    pub xml: Vec<u8>,
    /// Columns of formula cells an update targeted and left untouched.
    pub skipped_formula_cols: Vec<u32>,
    /// `false` when the edit did not match anything (e.g. deleting a row that is not stored).
    pub applied: bool,
}

/// Apply `edit` to a worksheet part. New text goes through `shared_strings` when the workbook
/// has a table, inline otherwise. `<dimension>` is refreshed afterwards.
pub fn apply_row_edit(
    xml: &[u8],
    edit: &RowEdit,
    shared_strings: &mut SharedStrings,
) -> Result<PatchOutcome, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 512));
    let mut buf = Vec::new();
    let (shared_groups, next_si) = if edit.is_structural() {
        shared_formula_groups(xml)?
    } else {
        (BTreeMap::new(), 0)
    };
    let mut state = PatchState {
        edit,
        shared_strings,
        prefix: String::new(),
        done: false,
        skipped_formula_cols: Vec::new(),
        shared_groups,
        split_groups: BTreeMap::new(),
        next_si,
    };
    let mut saw_sheet_data = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_name(e.name().as_ref()) == b"sheetData" => {
                saw_sheet_data = true;
                state.prefix = namespace_prefix(e.name().as_ref());
                writer.write_event(Event::Start(e.into_owned()))?;
                patch_sheet_data(&mut reader, &mut writer, &mut state)?;
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"sheetData" => {
                saw_sheet_data = true;
                let start = e.into_owned();
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                state.prefix = namespace_prefix(start.name().as_ref());
                let mut rows = String::new();
                state.write_pending_row(&mut rows)?;
                if rows.is_empty() {
                    writer.write_event(Event::Empty(start))?;
                } else {
                    writer.write_event(Event::Start(start))?;
                    writer.get_mut().extend_from_slice(rows.as_bytes());
                    writer.write_event(Event::End(BytesEnd::new(name)))?;
                }
            }
            Event::Eof => break,
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    if !saw_sheet_data {
        return Err(XlsxError::Invalid("worksheet has no <sheetData>".to_string()));
    }

    let applied = state.done;
    let skipped_formula_cols = state.skipped_formula_cols;
    let mut xml = writer.into_inner();
    if edit.is_structural() {
        xml = shift_anchored_ranges(xml, edit, &state.prefix)?;
    }
    let xml = refresh_dimension(&xml)?;
    Ok(PatchOutcome {
        xml,
        skipped_formula_cols,
        applied,
    })
}

struct PatchState<'a> {
    edit: &'a RowEdit,
    shared_strings: &'a mut SharedStrings,
    /// Namespace prefix of `<sheetData>` (`""` or e.g. `"x:"`), reused for every new element.
    prefix: String,
    done: bool,
    skipped_formula_cols: Vec<u32>,
    /// Shared-formula groups by `si`, as found before the edit.
    shared_groups: BTreeMap<String, SharedGroup>,
    /// `si` of the group that cells moving away from their master were moved into.
    split_groups: BTreeMap<String, String>,
    next_si: u32,
}

/// A shared-formula group as written: master cell, `ref` extent and the master's text.
#[derive(Debug, Clone)]
struct SharedGroup {
    master: CellRef,
    range: CellRange,
    text: String,
}

/// What a copied shared-formula `<f>` becomes.
enum FormulaTag {
    /// Write this start tag in place of the original.
    Retag(BytesStart<'static>),
    /// Replace the element with a master carrying `text`.
    Promote { start: BytesStart<'static>, text: String },
}

impl PatchState<'_> {
    /// How far a stored row at `index` moves.
    fn shift_for(&self, index: u32) -> i64 {
        match self.edit {
            RowEdit::Insert { row, .. } if index >= *row => 1,
            RowEdit::Delete { row } if index > *row => -1,
            _ => 0,
        }
    }

    /// `ref` of a master that survives the edit. When the edit splits the group the master
    /// keeps the rows above the edited one.
    fn master_range(&self, group: &SharedGroup) -> CellRange {
        if self.shift_for(group.master.row) != 0 {
            return shift_range(group.range, self.edit).unwrap_or(group.range);
        }
        let row = self.edit.target_row();
        if self.edit.is_structural() && row > group.master.row && group.range.end.row >= row {
            return CellRange::new(group.range.start, CellRef::new(row - 1, group.range.end.col));
        }
        group.range
    }

    /// Cells that move while their master stays put (or is deleted) leave the group.
    fn leaves_group(&self, group: &SharedGroup, at: CellRef) -> bool {
        self.shift_for(at.row) != 0 && self.shift_for(group.master.row) == 0
    }

    fn master_deleted(&self, group: &SharedGroup) -> bool {
        matches!(self.edit, RowEdit::Delete { row } if *row == group.master.row)
    }

    /// Rewrite the shared-formula `<f>` start tag of the copied cell originally at `at`.
    fn formula_tag(&mut self, e: &BytesStart<'_>, at: Option<CellRef>) -> Result<FormulaTag, XlsxError> {
        let keep = FormulaTag::Retag(e.to_owned().into_owned());
        if !self.edit.is_structural() || attr_value(e, b"t")?.as_deref() != Some("shared") {
            return Ok(keep);
        }
        let (Some(si), Some(at)) = (attr_value(e, b"si")?, at) else {
            return Ok(keep);
        };
        let Some(group) = self.shared_groups.get(&si).cloned() else {
            return Ok(keep);
        };

        if at == group.master {
            let range = self.master_range(&group);
            return Ok(FormulaTag::Retag(with_attr(e, "ref", &range.to_a1())?));
        }
        if !self.leaves_group(&group, at) {
            return Ok(keep);
        }
        if let Some(split) = self.split_groups.get(&si) {
            return Ok(FormulaTag::Retag(with_attr(e, "si", split)?));
        }

        let split = if self.master_deleted(&group) {
            si.clone()
        } else {
            self.next_si += 1;
            (self.next_si - 1).to_string()
        };
        let moved = CellRange::new(CellRef::new(at.row, group.range.start.col), group.range.end);
        let range = shift_range(moved, self.edit).unwrap_or(moved);
        let text = shift_references(
            &group.text,
            i64::from(at.row) - i64::from(group.master.row),
            i64::from(at.col) - i64::from(group.master.col),
        );
        log::debug!("shared formula {si} split at {at}: new group {split} covers {}", range.to_a1());
        let start = with_attr(&with_attr(e, "si", &split)?, "ref", &range.to_a1())?;
        self.split_groups.insert(si, split);
        Ok(FormulaTag::Promote { start, text })
    }

    /// Render the row an `Insert` (or an `Update` of an unmaterialized row) adds, once.
    fn write_pending_row(&mut self, out: &mut String) -> Result<(), XlsxError> {
        if self.done {
            return Ok(());
        }
        let edit = self.edit;
        let row_tag = format!("{}row", self.prefix);
        let (row, cells): (u32, Vec<(u32, &CellValue, Option<u32>)>) = match edit {
            RowEdit::Insert { row, cells, styles } => {
                let mut cols: Vec<u32> = cells.keys().chain(styles.keys()).copied().collect();
                cols.sort_unstable();
                cols.dedup();
                static NULL: CellValue = CellValue::Null;
                (
                    *row,
                    cols.into_iter()
                        .map(|col| (col, cells.get(&col).unwrap_or(&NULL), styles.get(&col).copied()))
                        .collect(),
                )
            }
            RowEdit::Update { row, cells } => (
                *row,
                cells.iter().map(|(col, patch)| (*col, patch.value(), None)).collect(),
            ),
            RowEdit::Delete { .. } => return Ok(()),
        };

        self.done = true;
        let mut rendered = String::new();
        for (col, value, style) in cells {
            rendered.push_str(&self.render(CellRef::new(row, col), style, value, None)?);
        }
        if rendered.is_empty() && !matches!(edit, RowEdit::Insert { .. }) {
            return Ok(());
        }
        out.push_str(&format!(r#"<{row_tag} r="{}">"#, row + 1));
        out.push_str(&rendered);
        out.push_str(&format!("</{row_tag}>"));
        Ok(())
    }

    fn render(
        &mut self,
        at: CellRef,
        style: Option<u32>,
        value: &CellValue,
        existing_t: Option<&str>,
    ) -> Result<String, XlsxError> {
        let shared_index = match value {
            CellValue::Text(text) if self.shared_strings.has_part() && existing_t != Some("inlineStr") => {
                Some(self.shared_strings.intern(text))
            }
            _ => None,
        };
        render_cell(&self.prefix, &at.to_a1(), style, value, shared_index)
    }
}

fn patch_sheet_data(
    reader: &mut Reader<&[u8]>,
    writer: &mut Writer<Vec<u8>>,
    state: &mut PatchState<'_>,
) -> Result<(), XlsxError> {
    let mut buf = Vec::new();
    let mut next_row = 0u32;
    let edit = state.edit;
    let target = edit.target_row();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_name(e.name().as_ref()) == b"row" => {
                let start = e.into_owned();
                let index = row_index(&start)?.unwrap_or(next_row);
                next_row = index + 1;
                emit_pending_before(writer, state, index)?;

                match edit {
                    RowEdit::Delete { row } if index == *row => {
                        let mut skip = Vec::new();
                        reader.read_to_end_into(start.name(), &mut skip)?;
                        state.done = true;
                    }
                    RowEdit::Update { row, cells } if index == *row => {
                        writer.write_event(Event::Start(start))?;
                        patch_row(reader, writer, state, index, cells)?;
                        state.done = true;
                    }
                    _ => {
                        let shift = state.shift_for(index);
                        writer.write_event(Event::Start(shifted_row(&start, index, shift)?))?;
                        copy_row(reader, writer, state, shift)?;
                    }
                }
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"row" => {
                let start = e.into_owned();
                let index = row_index(&start)?.unwrap_or(next_row);
                next_row = index + 1;
                emit_pending_before(writer, state, index)?;

                match edit {
                    RowEdit::Delete { row } if index == *row => state.done = true,
                    RowEdit::Update { row, cells } if index == *row => {
                        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                        writer.write_event(Event::Start(start))?;
                        for (col, patch) in cells {
                            let cell =
                                state.render(CellRef::new(index, *col), None, patch.value(), None)?;
                            writer.get_mut().extend_from_slice(cell.as_bytes());
                        }
                        writer.write_event(Event::End(BytesEnd::new(name)))?;
                        state.done = true;
                    }
                    _ => {
                        let shift = state.shift_for(index);
                        writer.write_event(Event::Empty(shifted_row(&start, index, shift)?))?;
                    }
                }
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"sheetData" => {
                if !state.done && target >= next_row {
                    let mut rows = String::new();
                    state.write_pending_row(&mut rows)?;
                    writer.get_mut().extend_from_slice(rows.as_bytes());
                }
                writer.write_event(Event::End(e.into_owned()))?;
                break;
            }
            Event::Eof => {
                return Err(XlsxError::Invalid(
                    "unexpected EOF while patching sheetData".to_string(),
                ))
            }
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    Ok(())
}

/// Write the inserted (or materialized) row once the stream reaches the first stored row at or
/// past its position.
fn emit_pending_before(
    writer: &mut Writer<Vec<u8>>,
    state: &mut PatchState<'_>,
    index: u32,
) -> Result<(), XlsxError> {
    let due = match state.edit {
        RowEdit::Insert { row, .. } => index >= *row,
        RowEdit::Update { row, .. } => index > *row,
        RowEdit::Delete { .. } => false,
    };
    if !due || state.done {
        return Ok(());
    }
    let mut rows = String::new();
    state.write_pending_row(&mut rows)?;
    writer.get_mut().extend_from_slice(rows.as_bytes());
    Ok(())
}

/// `b"x:sheetData"` -> `"x:"`, `b"sheetData"` -> `""`.
fn namespace_prefix(qname: &[u8]) -> String {
    match qname.iter().position(|b| *b == b':') {
        Some(idx) => format!("{}:", String::from_utf8_lossy(&qname[..idx])),
        None => String::new(),
    }
}

fn shifted_row(start: &BytesStart<'_>, index: u32, shift: i64) -> Result<BytesStart<'static>, XlsxError> {
    if shift == 0 {
        return Ok(start.to_owned().into_owned());
    }
    let moved = (i64::from(index) + shift + 1).to_string();
    with_attr(start, "r", &moved)
}

/// Re-emit the rest of a row, renumbering cell references by `shift` rows and retagging
/// shared formulas whose group the edit splits.
fn copy_row(
    reader: &mut Reader<&[u8]>,
    writer: &mut Writer<Vec<u8>>,
    state: &mut PatchState<'_>,
    shift: i64,
) -> Result<(), XlsxError> {
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut cell_at = None;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let is_cell = depth == 0 && local_name(e.name().as_ref()) == b"c";
                let is_formula = depth == 1 && local_name(e.name().as_ref()) == b"f";
                let start = if is_cell {
                    cell_at = cell_attrs(&e)?.at;
                    Some(shifted_cell(&e, shift)?)
                } else if is_formula {
                    match state.formula_tag(&e, cell_at)? {
                        FormulaTag::Retag(start) => Some(start),
                        FormulaTag::Promote { start, text } => {
                            reader.read_to_end_into(e.name(), &mut Vec::new())?;
                            write_formula(writer, start, &text)?;
                            None
                        }
                    }
                } else {
                    Some(e.into_owned())
                };
                if let Some(start) = start {
                    depth += 1;
                    writer.write_event(Event::Start(start))?;
                }
            }
            Event::Empty(e) => {
                let is_cell = depth == 0 && local_name(e.name().as_ref()) == b"c";
                let is_formula = depth == 1 && local_name(e.name().as_ref()) == b"f";
                if is_cell {
                    writer.write_event(Event::Empty(shifted_cell(&e, shift)?))?;
                } else if is_formula {
                    match state.formula_tag(&e, cell_at)? {
                        FormulaTag::Retag(start) => writer.write_event(Event::Empty(start))?,
                        FormulaTag::Promote { start, text } => write_formula(writer, start, &text)?,
                    }
                } else {
                    writer.write_event(Event::Empty(e.into_owned()))?;
                }
            }
            Event::End(e) => {
                let at_row_end = depth == 0;
                depth = depth.saturating_sub(1);
                writer.write_event(Event::End(e.into_owned()))?;
                if at_row_end {
                    break;
                }
            }
            Event::Eof => {
                return Err(XlsxError::Invalid("unexpected EOF inside row".to_string()))
            }
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }
    Ok(())
}

fn write_formula(writer: &mut Writer<Vec<u8>>, start: BytesStart<'static>, text: &str) -> Result<(), XlsxError> {
    let end = BytesEnd::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(end))?;
    Ok(())
}

fn shifted_cell(e: &BytesStart<'_>, shift: i64) -> Result<BytesStart<'static>, XlsxError> {
    if shift == 0 {
        return Ok(e.to_owned().into_owned());
    }
    match cell_attrs(e)?.at {
        Some(at) => {
            let row = u32::try_from(i64::from(at.row) + shift)
                .map_err(|_| XlsxError::Invalid(format!("cannot move {at} by {shift} rows")))?;
            with_attr(e, "r", &CellRef::new(row, at.col).to_a1())
        }
        None => Ok(e.to_owned().into_owned()),
    }
}

/// Buffered `<c>` subtree, kept verbatim when the cell turns out to hold a formula.
struct BufferedCell {
    events: Vec<Event<'static>>,
    has_formula: bool,
}

fn buffer_cell(reader: &mut Reader<&[u8]>, start: BytesStart<'static>) -> Result<BufferedCell, XlsxError> {
    let mut buf = Vec::new();
    let mut events = vec![Event::Start(start)];
    let mut has_formula = false;
    let mut depth = 1usize;
    loop {
        let ev = reader.read_event_into(&mut buf)?.into_owned();
        match &ev {
            Event::Start(inner) => {
                if depth == 1 && local_name(inner.name().as_ref()) == b"f" {
                    has_formula = true;
                }
                depth += 1;
            }
            Event::Empty(inner) => {
                if depth == 1 && local_name(inner.name().as_ref()) == b"f" {
                    has_formula = true;
                }
            }
            Event::End(_) => depth -= 1,
            Event::Eof => {
                return Err(XlsxError::Invalid("unexpected EOF inside cell".to_string()))
            }
            _ => {}
        }
        events.push(ev);
        buf.clear();
        if depth == 0 {
            break;
        }
    }
    Ok(BufferedCell { events, has_formula })
}

fn patch_row(
    reader: &mut Reader<&[u8]>,
    writer: &mut Writer<Vec<u8>>,
    state: &mut PatchState<'_>,
    row: u32,
    patches: &BTreeMap<u32, CellPatch>,
) -> Result<(), XlsxError> {
    let mut pending = patches.iter().peekable();
    let mut buf = Vec::new();
    let mut next_col = 0u32;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_name(e.name().as_ref()) == b"c" => {
                let start = e.into_owned();
                let attrs = cell_attrs(&start)?;
                let col = attrs.at.map(|at| at.col).unwrap_or(next_col);
                next_col = col + 1;
                while let Some((c, patch)) = pending.next_if(|(c, _)| **c < col) {
                    let cell = state.render(CellRef::new(row, *c), None, patch.value(), None)?;
                    writer.get_mut().extend_from_slice(cell.as_bytes());
                }
                let cell = buffer_cell(reader, start)?;
                match pending.next_if(|(c, _)| **c == col) {
                    Some(_) if cell.has_formula => {
                        state.skipped_formula_cols.push(col);
                        for ev in cell.events {
                            writer.write_event(ev)?;
                        }
                    }
                    Some((_, patch)) => {
                        let rendered = state.render(
                            CellRef::new(row, col),
                            attrs.s,
                            patch.value(),
                            attrs.t.as_deref(),
                        )?;
                        writer.get_mut().extend_from_slice(rendered.as_bytes());
                    }
                    None => {
                        for ev in cell.events {
                            writer.write_event(ev)?;
                        }
                    }
                }
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"c" => {
                let start = e.into_owned();
                let attrs = cell_attrs(&start)?;
                let col = attrs.at.map(|at| at.col).unwrap_or(next_col);
                next_col = col + 1;
                while let Some((c, patch)) = pending.next_if(|(c, _)| **c < col) {
                    let cell = state.render(CellRef::new(row, *c), None, patch.value(), None)?;
                    writer.get_mut().extend_from_slice(cell.as_bytes());
                }
                match pending.next_if(|(c, _)| **c == col) {
                    Some((_, patch)) => {
                        let rendered = state.render(
                            CellRef::new(row, col),
                            attrs.s,
                            patch.value(),
                            attrs.t.as_deref(),
                        )?;
                        writer.get_mut().extend_from_slice(rendered.as_bytes());
                    }
                    None => writer.write_event(Event::Empty(start))?,
                }
            }
            Event::End(e) if local_name(e.name().as_ref()) == b"row" => {
                for (c, patch) in pending.by_ref() {
                    let cell = state.render(CellRef::new(row, *c), None, patch.value(), None)?;
                    writer.get_mut().extend_from_slice(cell.as_bytes());
                }
                writer.write_event(Event::End(e.into_owned()))?;
                break;
            }
            Event::Eof => {
                return Err(XlsxError::Invalid("unexpected EOF while patching row".to_string()))
            }
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }
    Ok(())
}

/// Shared-formula masters by `si`, and the first `si` no formula in the part uses.
fn shared_formula_groups(xml: &[u8]) -> Result<(BTreeMap<String, SharedGroup>, u32), XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut groups = BTreeMap::new();
    let mut next_si = 0u32;
    let mut cell_at = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if local_name(e.name().as_ref()) == b"c" => {
                cell_at = cell_attrs(&e)?.at;
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == b"f" => {
                if let Some(si) = attr_value(&e, b"si")?.and_then(|si| si.trim().parse::<u32>().ok()) {
                    next_si = next_si.max(si + 1);
                }
            }
            Event::Start(e) if local_name(e.name().as_ref()) == b"f" => {
                let si = attr_value(&e, b"si")?;
                if let Some(n) = si.as_deref().and_then(|si| si.trim().parse::<u32>().ok()) {
                    next_si = next_si.max(n + 1);
                }
                let shared = attr_value(&e, b"t")?.as_deref() == Some("shared");
                let range = attr_value(&e, b"ref")?.and_then(|r| CellRange::from_a1(&r).ok());
                let text = read_plain_text(&mut reader, b"f")?;
                if let (true, Some(si), Some(range), Some(master)) = (shared, si, range, cell_at) {
                    if !text.is_empty() {
                        groups.insert(si, SharedGroup { master, range, text });
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok((groups, next_si))
}

/// Where `range` ends up after a structural edit: rows at or below an insert move down, rows
/// below a delete move up, and a range spanning the edited row grows or shrinks by one.
/// `None` when the range covered only the deleted row.
fn shift_range(range: CellRange, edit: &RowEdit) -> Option<CellRange> {
    let (top, bottom) = (range.start.row, range.end.row);
    let (top, bottom) = match *edit {
        RowEdit::Insert { row, .. } => (top + u32::from(top >= row), bottom + u32::from(bottom >= row)),
        RowEdit::Delete { row } => {
            if top == row && bottom == row {
                return None;
            }
            (top - u32::from(top > row), bottom - u32::from(bottom >= row))
        }
        RowEdit::Update { .. } => (top, bottom),
    };
    Some(CellRange::new(
        CellRef::new(top, range.start.col),
        CellRef::new(bottom, range.end.col),
    ))
}

/// Shift every range of a space-separated `sqref` list, dropping the ones the edit deleted.
/// `None` when nothing is left. Tokens that are not A1 ranges are kept as written.
fn shift_sqref(sqref: &str, edit: &RowEdit) -> Option<String> {
    let mut kept = Vec::new();
    for token in sqref.split_whitespace() {
        match CellRange::from_a1(token) {
            Ok(range) => kept.extend(shift_range(range, edit).map(CellRange::to_a1)),
            Err(_) => kept.push(token.to_string()),
        }
    }
    (!kept.is_empty()).then(|| kept.join(" "))
}

/// Worksheet elements anchored to rows: (element, range attribute, container).
const ROW_ANCHORED: [(&str, &str, Option<&str>); 4] = [
    ("mergeCell", "ref", Some("mergeCells")),
    ("conditionalFormatting", "sqref", None),
    ("dataValidation", "sqref", Some("dataValidations")),
    ("hyperlink", "ref", Some("hyperlinks")),
];

/// Move the ranges of [`ROW_ANCHORED`] elements with the rows. An element left without a range
/// is removed; its container is recounted, or removed once empty. Only elements in the
/// worksheet's own namespace (`prefix`) are touched.
fn shift_anchored_ranges(mut xml: Vec<u8>, edit: &RowEdit, prefix: &str) -> Result<Vec<u8>, XlsxError> {
    for (element, attr, container) in ROW_ANCHORED {
        let mut kept = 0usize;
        let mut dropped = 0usize;
        let rewritten = rewrite_elements(&xml, element.as_bytes(), |e| {
            if namespace_prefix(e.name().as_ref()) != prefix {
                return Ok(ElementAction::Keep);
            }
            let Some(sqref) = attr_value(e, attr.as_bytes())? else {
                kept += 1;
                return Ok(ElementAction::Keep);
            };
            match shift_sqref(&sqref, edit) {
                None => {
                    dropped += 1;
                    Ok(ElementAction::Drop)
                }
                Some(moved) => {
                    kept += 1;
                    if moved == sqref {
                        Ok(ElementAction::Keep)
                    } else {
                        Ok(ElementAction::Replace(with_attr(e, attr, &moved)?))
                    }
                }
            }
        })?;
        let Some(rewritten) = rewritten else {
            continue;
        };
        xml = rewritten;

        let Some(container) = container.filter(|_| dropped > 0) else {
            continue;
        };
        log::debug!("removed {dropped} <{element}> left without rows");
        let recounted = rewrite_elements(&xml, container.as_bytes(), |e| {
            if namespace_prefix(e.name().as_ref()) != prefix {
                return Ok(ElementAction::Keep);
            }
            if kept == 0 {
                return Ok(ElementAction::Drop);
            }
            match attr_value(e, b"count")? {
                Some(_) => Ok(ElementAction::Replace(with_attr(e, "count", &kept.to_string())?)),
                None => Ok(ElementAction::Keep),
            }
        })?;
        if let Some(recounted) = recounted {
            xml = recounted;
        }
    }
    Ok(xml)
}

/// Rewrite `<dimension ref>` to the bounding box of the cells in `<sheetData>`.
pub fn refresh_dimension(xml: &[u8]) -> Result<Vec<u8>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut bounds: Option<CellRange> = None;
    let mut has_dimension = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => match local_name(e.name().as_ref()) {
                b"dimension" => has_dimension = true,
                b"c" => {
                    if let Some(at) = cell_attrs(&e)?.at {
                        bounds = Some(match bounds {
                            None => CellRange::new(at, at),
                            Some(range) => CellRange::new(
                                CellRef::new(range.start.row.min(at.row), range.start.col.min(at.col)),
                                CellRef::new(range.end.row.max(at.row), range.end.col.max(at.col)),
                            ),
                        });
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !has_dimension {
        return Ok(xml.to_vec());
    }
    let wanted = bounds.map(CellRange::to_a1).unwrap_or_else(|| "A1".to_string());
    let rewritten = rewrite_elements(xml, b"dimension", |e| {
        if attr_value(e, b"ref")?.as_deref() == Some(wanted.as_str()) {
            return Ok(ElementAction::Keep);
        }
        Ok(ElementAction::Replace(with_attr(e, "ref", &wanted)?))
    })?;
    Ok(rewritten.unwrap_or_else(|| xml.to_vec()))
}

/// Remove `xl/calcChain.xml` with its workbook relationship and content-type override, and ask
/// Excel to recalculate on load. Returns `true` if a calc chain was present.
///
/// Required after any row insert/delete: the chain lists cells by address.
pub fn drop_calc_chain(package: &mut XlsxPackage) -> Result<bool, XlsxError> {
    let mut parts = related_parts(package, WORKBOOK_PART, REL_TYPE_CALC_CHAIN)?;
    if package.has_part("xl/calcChain.xml") && !parts.iter().any(|p| p.eq_ignore_ascii_case("xl/calcChain.xml")) {
        parts.push("xl/calcChain.xml".to_string());
    }
    if parts.is_empty() {
        return Ok(false);
    }

    for part in &parts {
        package.remove_part(part);
    }
    remove_relationships(package, WORKBOOK_PART, |rel| rel.has_type(REL_TYPE_CALC_CHAIN))?;
    package.remove_content_type_overrides(|name| {
        parts.iter().any(|p| crate::zip_util::same_part(p, name))
    })?;
    request_full_calc_on_load(package)?;
    log::debug!("dropped calc chain {parts:?}");
    Ok(true)
}

/// Set `fullCalcOnLoad="1"` on an existing `<calcPr>`.
fn request_full_calc_on_load(package: &mut XlsxPackage) -> Result<(), XlsxError> {
    let Some(xml) = package.part(WORKBOOK_PART) else {
        return Ok(());
    };
    let rewritten = rewrite_elements(xml, b"calcPr", |e| {
        let current = attr_value(e, b"fullCalcOnLoad")?;
        if matches!(current.as_deref(), Some("1") | Some("true")) {
            return Ok(ElementAction::Keep);
        }
        Ok(ElementAction::Replace(with_attr(e, "fullCalcOnLoad", "1")?))
    })?;
    if let Some(updated) = rewritten {
        package.set_part(WORKBOOK_PART, updated);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::worksheet::read_worksheet;

    const SHEET: &str = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><dimension ref="A1:C3"/><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>id</t></is></c><c r="B1" t="inlineStr"><is><t>qty</t></is></c><c r="C1" t="inlineStr"><is><t>total</t></is></c></row><row r="2" spans="1:3"><c r="A2" s="4" t="inlineStr"><is><t>a</t></is></c><c r="B2" s="5"><v>1</v></c><c r="C2"><f>B2*2</f><v>2</v></c></row><row r="3"><c r="A3" t="inlineStr"><is><t>b</t></is></c><c r="B3"><v>2</v></c><c r="C3"><f>B3*2</f><v>4</v></c></row></sheetData><mergeCells count="0"/></worksheet>"#;

    fn text(bytes: &[u8]) -> &str {
        std::str::from_utf8(bytes).unwrap()
    }

    fn values(xml: &[u8]) -> Vec<Vec<String>> {
        read_worksheet(xml, &SharedStrings::default())
            .unwrap()
            .rows
            .iter()
            .map(|r| r.cells.iter().map(|c| c.value.display()).collect())
            .collect()
    }

    #[test]
    fn update_replaces_values_and_keeps_styles() {
        let edit = RowEdit::Update {
            row: 1,
            cells: BTreeMap::from([
                (0, CellPatch::Set("alpha".into())),
                (1, CellPatch::Set(CellValue::Number(7.0))),
                (4, CellPatch::Set(true.into())),
            ]),
        };
        let out = apply_row_edit(SHEET.as_bytes(), &edit, &mut SharedStrings::default()).unwrap();
        assert!(out.applied);
        let xml = text(&out.xml);
        assert!(xml.contains(r#"<c r="A2" s="4" t="inlineStr"><is><t>alpha</t></is></c>"#), "{xml}");
        assert!(xml.contains(r#"<c r="B2" s="5"><v>7</v></c>"#), "{xml}");
        assert!(xml.contains(r#"<c r="C2"><f>B2*2</f><v>2</v></c><c r="E2" t="b"><v>1</v></c>"#), "{xml}");
        assert!(xml.contains(r#"<dimension ref="A1:E3"/>"#), "{xml}");
        assert!(xml.contains(r#"<mergeCells count="0"/>"#));
    }

    #[test]
    fn update_never_overwrites_formula_cells() {
        let edit = RowEdit::Update {
            row: 1,
            cells: BTreeMap::from([(2, CellPatch::Set(CellValue::Number(99.0)))]),
        };
        let out = apply_row_edit(SHEET.as_bytes(), &edit, &mut SharedStrings::default()).unwrap();
        assert_eq!(out.skipped_formula_cols, vec![2]);
        assert!(text(&out.xml).contains("<f>B2*2</f><v>2</v>"));
    }

    #[test]
    fn clear_keeps_an_empty_styled_cell() {
        let edit = RowEdit::Update {
            row: 1,
            cells: BTreeMap::from([(1, CellPatch::Clear), (0, CellPatch::Clear)]),
        };
        let out = apply_row_edit(SHEET.as_bytes(), &edit, &mut SharedStrings::default()).unwrap();
        let xml = text(&out.xml);
        assert!(xml.contains(r#"<row r="2" spans="1:3"><c r="A2" s="4"/><c r="B2" s="5"/>"#), "{xml}");
    }

    #[test]
    fn update_of_a_missing_row_materializes_it_in_order() {
        let edit = RowEdit::Update {
            row: 5,
            cells: BTreeMap::from([(0, CellPatch::Set("late".into()))]),
        };
        let out = apply_row_edit(SHEET.as_bytes(), &edit, &mut SharedStrings::default()).unwrap();
        let xml = text(&out.xml);
        assert!(xml.contains(r#"</row><row r="6"><c r="A6" t="inlineStr"><is><t>late</t></is></c></row></sheetData>"#), "{xml}");
    }

    #[test]
    fn insert_shifts_rows_below_and_writes_inherited_styles() {
        let edit = RowEdit::Insert {
            row: 1,
            cells: BTreeMap::from([(0, "new".into()), (1, CellValue::Number(3.0))]),
            styles: BTreeMap::from([(0, 4), (1, 5), (3, 9)]),
        };
        let out = apply_row_edit(SHEET.as_bytes(), &edit, &mut SharedStrings::default()).unwrap();
        let xml = text(&out.xml);
        assert!(
            xml.contains(r#"<row r="2"><c r="A2" s="4" t="inlineStr"><is><t>new</t></is></c><c r="B2" s="5"><v>3</v></c><c r="D2" s="9"/></row><row r="3" spans="1:3"><c r="A3" s="4""#),
            "{xml}"
        );
        // Formula text stays as written.
        assert!(xml.contains(r#"<c r="C3"><f>B2*2</f>"#), "{xml}");
        assert!(xml.contains(r#"<row r="4"><c r="A4""#), "{xml}");
        assert!(xml.contains(r#"<dimension ref="A1:D4"/>"#), "{xml}");
        assert_eq!(
            values(&out.xml),
            vec![
                vec!["id", "qty", "total"],
                vec!["new", "3", ""],
                vec!["a", "1", "2"],
                vec!["b", "2", "4"],
            ]
        );
    }

    #[test]
    fn insert_past_the_end_appends() {
        let edit = RowEdit::Insert {
            row: 3,
            cells: BTreeMap::from([(0, "c".into())]),
            styles: BTreeMap::new(),
        };
        let out = apply_row_edit(SHEET.as_bytes(), &edit, &mut SharedStrings::default()).unwrap();
        assert_eq!(values(&out.xml).last().unwrap(), &vec!["c".to_string()]);
    }

    #[test]
    fn delete_removes_the_row_and_shifts_up() {
        let out = apply_row_edit(
            SHEET.as_bytes(),
            &RowEdit::Delete { row: 1 },
            &mut SharedStrings::default(),
        )
        .unwrap();
        assert!(out.applied);
        let xml = text(&out.xml);
        assert!(xml.contains(r#"<row r="2"><c r="A2" t="inlineStr"><is><t>b</t></is></c>"#), "{xml}");
        assert!(xml.contains(r#"<dimension ref="A1:C2"/>"#), "{xml}");
        assert_eq!(values(&out.xml).len(), 2);
    }

    #[test]
    fn delete_of_a_missing_row_is_not_applied() {
        let out = apply_row_edit(
            SHEET.as_bytes(),
            &RowEdit::Delete { row: 40 },
            &mut SharedStrings::default(),
        )
        .unwrap();
        assert!(!out.applied);
        assert_eq!(values(&out.xml).len(), 3);
    }

    #[test]
    fn empty_sheet_data_is_expanded() {
        let xml = br#"<worksheet><dimension ref="A1"/><sheetData/></worksheet>"#;
        let edit = RowEdit::Insert {
            row: 0,
            cells: BTreeMap::from([(1, "x".into())]),
            styles: BTreeMap::new(),
        };
        let out = apply_row_edit(xml, &edit, &mut SharedStrings::default()).unwrap();
        assert_eq!(
            text(&out.xml),
            r#"<worksheet><dimension ref="B1"/><sheetData><row r="1"><c r="B1" t="inlineStr"><is><t>x</t></is></c></row></sheetData></worksheet>"#
        );
    }

    #[test]
    fn prefixed_worksheets_get_prefixed_rows_and_cells() {
        let xml = br#"<x:worksheet xmlns:x="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><x:sheetData><x:row r="1"><x:c r="A1"><x:v>1</x:v></x:c></x:row></x:sheetData></x:worksheet>"#;
        let edit = RowEdit::Insert {
            row: 1,
            cells: BTreeMap::from([(0, CellValue::Number(2.0))]),
            styles: BTreeMap::new(),
        };
        let out = apply_row_edit(xml, &edit, &mut SharedStrings::default()).unwrap();
        assert!(
            text(&out.xml).contains(r#"<x:row r="2"><x:c r="A2"><x:v>2</x:v></x:c></x:row></x:sheetData>"#),
            "{}",
            text(&out.xml)
        );
    }

    #[test]
    fn text_goes_to_the_shared_strings_table_when_present() {
        let mut parts = std::collections::BTreeMap::new();
        parts.insert("xl/workbook.xml".to_string(), b"<workbook/>".to_vec());
        parts.insert(
            "xl/sharedStrings.xml".to_string(),
            br#"<sst count="1" uniqueCount="1"><si><t>a</t></si></sst>"#.to_vec(),
        );
        let pkg = XlsxPackage::from_parts(parts);
        let mut sst = SharedStrings::load(&pkg).unwrap();
        let edit = RowEdit::Update {
            row: 2,
            cells: BTreeMap::from([(0, CellPatch::Set("a".into())), (1, CellPatch::Set("zz".into()))]),
        };
        let out = apply_row_edit(SHEET.as_bytes(), &edit, &mut sst).unwrap();
        let xml = text(&out.xml);
        // A3 was stored inline and stays inline.
        assert!(xml.contains(r#"<c r="A3" t="inlineStr"><is><t>a</t></is></c>"#), "{xml}");
        assert!(xml.contains(r#"<c r="B3" t="s"><v>1</v></c>"#), "{xml}");
        assert_eq!(sst.get(1), Some("zz"));
    }

    const SHARED: &str = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><dimension ref="A1:C4"/><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>qty</t></is></c></row><row r="2"><c r="B2"><v>1</v></c><c r="C2"><f t="shared" ref="C2:C4" si="0">B2*2</f><v>2</v></c></row><row r="3"><c r="B3"><v>2</v></c><c r="C3"><f t="shared" si="0"/><v>4</v></c></row><row r="4"><c r="B4"><v>3</v></c><c r="C4"><f t="shared" si="0"/><v>6</v></c></row></sheetData></worksheet>"#;

    fn formulas(xml: &[u8]) -> Vec<(String, String)> {
        let sheet = read_worksheet(xml, &SharedStrings::default()).unwrap();
        let mut out = Vec::new();
        for row in &sheet.rows {
            for cell in &row.cells {
                if let Some(formula) = &cell.formula {
                    out.push((CellRef::new(row.index, cell.col).to_a1(), formula.clone()));
                }
            }
        }
        out
    }

    fn pairs(expected: &[(&str, &str)]) -> Vec<(String, String)> {
        expected
            .iter()
            .map(|(at, f)| (at.to_string(), f.to_string()))
            .collect()
    }

    #[test]
    fn deleting_a_shared_formula_master_hands_the_group_to_the_next_cell() {
        let out = apply_row_edit(
            SHARED.as_bytes(),
            &RowEdit::Delete { row: 1 },
            &mut SharedStrings::default(),
        )
        .unwrap();
        let xml = text(&out.xml);
        assert!(
            xml.contains(r#"<c r="C2"><f t="shared" si="0" ref="C2:C3">B3*2</f><v>4</v></c></row><row r="3"><c r="B3"><v>3</v></c><c r="C3"><f t="shared" si="0"/><v>6</v></c>"#),
            "{xml}"
        );
        assert_eq!(formulas(&out.xml), pairs(&[("C2", "B3*2"), ("C3", "B4*2")]));
    }

    #[test]
    fn inserting_inside_a_shared_range_keeps_every_formula() {
        let edit = RowEdit::Insert {
            row: 2,
            cells: BTreeMap::from([(1, CellValue::Number(9.0))]),
            styles: BTreeMap::new(),
        };
        let out = apply_row_edit(SHARED.as_bytes(), &edit, &mut SharedStrings::default()).unwrap();
        let xml = text(&out.xml);
        assert!(xml.contains(r#"<c r="C2"><f t="shared" ref="C2" si="0">B2*2</f>"#), "{xml}");
        assert!(xml.contains(r#"<c r="C4"><f t="shared" si="1" ref="C4:C5">B3*2</f>"#), "{xml}");
        assert!(xml.contains(r#"<c r="C5"><f t="shared" si="1"/>"#), "{xml}");
        assert_eq!(
            formulas(&out.xml),
            pairs(&[("C2", "B2*2"), ("C4", "B3*2"), ("C5", "B4*2")])
        );
    }

    #[test]
    fn deleting_inside_a_shared_range_keeps_the_remaining_formulas() {
        let out = apply_row_edit(
            SHARED.as_bytes(),
            &RowEdit::Delete { row: 2 },
            &mut SharedStrings::default(),
        )
        .unwrap();
        assert_eq!(formulas(&out.xml), pairs(&[("C2", "B2*2"), ("C3", "B4*2")]));

        let out = apply_row_edit(
            SHARED.as_bytes(),
            &RowEdit::Delete { row: 3 },
            &mut SharedStrings::default(),
        )
        .unwrap();
        assert!(text(&out.xml).contains(r#"<f t="shared" ref="C2:C3" si="0">B2*2</f>"#));
        assert_eq!(formulas(&out.xml), pairs(&[("C2", "B2*2"), ("C3", "B3*2")]));
    }

    const ANCHORED: &str = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheetData><row r="1"><c r="A1"><v>1</v></c></row><row r="2"><c r="A2"><v>2</v></c></row><row r="3"><c r="A3"><v>3</v></c></row></sheetData><mergeCells count="3"><mergeCell ref="A2:B2"/><mergeCell ref="A3:B3"/><mergeCell ref="C1:C3"/></mergeCells><conditionalFormatting sqref="A3 C2"><cfRule type="cellIs" priority="1" operator="greaterThan"><formula>0</formula></cfRule></conditionalFormatting><conditionalFormatting sqref="D2"><cfRule type="expression" priority="2"><formula>TRUE</formula></cfRule></conditionalFormatting><dataValidations count="1"><dataValidation type="whole" sqref="B2:B3"><formula1>0</formula1></dataValidation></dataValidations><hyperlinks><hyperlink ref="A2" r:id="rId1"/></hyperlinks></worksheet>"#;

    #[test]
    fn delete_moves_row_anchored_ranges_up() {
        let out = apply_row_edit(
            ANCHORED.as_bytes(),
            &RowEdit::Delete { row: 1 },
            &mut SharedStrings::default(),
        )
        .unwrap();
        let xml = text(&out.xml);
        assert!(
            xml.contains(r#"<mergeCells count="2"><mergeCell ref="A2:B2"/><mergeCell ref="C1:C2"/></mergeCells>"#),
            "{xml}"
        );
        assert!(
            xml.contains(r#"<conditionalFormatting sqref="A2"><cfRule type="cellIs" priority="1" operator="greaterThan"><formula>0</formula></cfRule></conditionalFormatting><dataValidations count="1">"#),
            "{xml}"
        );
        assert!(xml.contains(r#"<dataValidation type="whole" sqref="B2">"#), "{xml}");
        assert!(!xml.contains("hyperlink"), "{xml}");
    }

    #[test]
    fn insert_moves_row_anchored_ranges_down() {
        let edit = RowEdit::Insert {
            row: 1,
            cells: BTreeMap::from([(0, CellValue::Number(0.0))]),
            styles: BTreeMap::new(),
        };
        let out = apply_row_edit(ANCHORED.as_bytes(), &edit, &mut SharedStrings::default()).unwrap();
        let xml = text(&out.xml);
        assert!(
            xml.contains(r#"<mergeCells count="3"><mergeCell ref="A3:B3"/><mergeCell ref="A4:B4"/><mergeCell ref="C1:C4"/></mergeCells>"#),
            "{xml}"
        );
        assert!(xml.contains(r#"<conditionalFormatting sqref="A4 C3">"#), "{xml}");
        assert!(xml.contains(r#"<conditionalFormatting sqref="D3">"#), "{xml}");
        assert!(xml.contains(r#"<dataValidation type="whole" sqref="B3:B4">"#), "{xml}");
        assert!(xml.contains(r#"<hyperlink ref="A3" r:id="rId1"/>"#), "{xml}");
    }

    #[test]
    fn calc_chain_is_removed_with_its_wiring() {
        let mut parts = std::collections::BTreeMap::new();
        parts.insert(
            "[Content_Types].xml".to_string(),
            br#"<Types><Override PartName="/xl/workbook.xml" ContentType="x"/><Override PartName="/xl/calcChain.xml" ContentType="y"/></Types>"#.to_vec(),
        );
        parts.insert(
            "xl/workbook.xml".to_string(),
            br#"<workbook><sheets/><calcPr calcId="191029"/></workbook>"#.to_vec(),
        );
        parts.insert(
            "xl/_rels/workbook.xml.rels".to_string(),
            br#"<Relationships><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/></Relationships>"#.to_vec(),
        );
        parts.insert("xl/calcChain.xml".to_string(), b"<calcChain/>".to_vec());
        let mut pkg = XlsxPackage::from_parts(parts);

        assert!(drop_calc_chain(&mut pkg).unwrap());
        assert!(!pkg.has_part("xl/calcChain.xml"));
        assert!(!text(pkg.part("xl/_rels/workbook.xml.rels").unwrap()).contains("calcChain"));
        assert!(!text(pkg.part("[Content_Types].xml").unwrap()).contains("calcChain"));
        assert!(text(pkg.part("xl/workbook.xml").unwrap())
            .contains(r#"<calcPr calcId="191029" fullCalcOnLoad="1"/>"#));

        assert!(!drop_calc_chain(&mut pkg).unwrap());
    }
}
