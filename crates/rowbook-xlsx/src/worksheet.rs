//! Read model of a worksheet part: the populated cells of `<sheetData>`, typed.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::cell::{format_number, CellRange, CellRef, CellValue};
use crate::formula::shift_references;
use crate::package::XlsxError;
use crate::shared_strings::{read_rich_text, SharedStrings};
use crate::xml::{escape_text, local_name, needs_space_preserve};

/// One populated `<c>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// 0-based column.
    pub col: u32,
    pub value: CellValue,
    /// Formula text without the leading `=`. Shared-formula children carry their master's text
    /// translated to this cell.
    pub formula: Option<String>,
    /// Style index (`s`).
    pub style: Option<u32>,
}

impl Cell {
    pub fn has_formula(&self) -> bool {
        self.formula.is_some()
    }
}

/// One `<row>` element, cells in column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    /// 0-based row index.
    pub index: u32,
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn cell(&self, col: u32) -> Option<&Cell> {
        self.cells
            .binary_search_by_key(&col, |c| c.col)
            .ok()
            .map(|idx| &self.cells[idx])
    }

    pub fn value(&self, col: u32) -> &CellValue {
        static NULL: CellValue = CellValue::Null;
        self.cell(col).map(|c| &c.value).unwrap_or(&NULL)
    }

    /// `true` when every cell is blank (`null` or whitespace-only text).
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.value.is_blank())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Worksheet {
    /// Rows in ascending index order; rows without `<c>` children are omitted.
    pub rows: Vec<Row>,
    /// `<dimension ref>` as written in the part, if present and parseable.
    pub dimension: Option<CellRange>,
}

impl Worksheet {
    pub fn row(&self, index: u32) -> Option<&Row> {
        self.rows
            .binary_search_by_key(&index, |r| r.index)
            .ok()
            .map(|idx| &self.rows[idx])
    }

    pub fn cell(&self, at: CellRef) -> Option<&Cell> {
        self.row(at.row)?.cell(at.col)
    }

    /// Bounding box of the populated cells (ignores `<dimension>`).
    pub fn used_range(&self) -> Option<CellRange> {
        let first = self.rows.first()?;
        let last = self.rows.last()?;
        let min_col = self.rows.iter().filter_map(|r| r.cells.first()).map(|c| c.col).min()?;
        let max_col = self.rows.iter().filter_map(|r| r.cells.last()).map(|c| c.col).max()?;
        Some(CellRange::new(
            CellRef::new(first.index, min_col),
            CellRef::new(last.index, max_col),
        ))
    }

    /// Bounding box of the cells holding a non-blank value or a formula. Empty styled cells do
    /// not count.
    pub fn value_range(&self) -> Option<CellRange> {
        let mut bounds: Option<CellRange> = None;
        for row in &self.rows {
            for cell in row.cells.iter().filter(|c| !c.value.is_blank() || c.has_formula()) {
                let at = CellRef::new(row.index, cell.col);
                bounds = Some(match bounds {
                    None => CellRange::new(at, at),
                    Some(range) => CellRange::new(
                        CellRef::new(range.start.row.min(at.row), range.start.col.min(at.col)),
                        CellRef::new(range.end.row.max(at.row), range.end.col.max(at.col)),
                    ),
                });
            }
        }
        bounds
    }
}

/// Parse the cells of a worksheet part. String cells resolve through `shared_strings`.
pub fn read_worksheet(xml: &[u8], shared_strings: &SharedStrings) -> Result<Worksheet, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut sheet = Worksheet::default();
    let mut next_row = 0u32;
    let mut shared_masters = HashMap::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"dimension" => {
                sheet.dimension = crate::xml::attr_value(&e, b"ref")?
                    .and_then(|r| CellRange::from_a1(&r).ok());
            }
            Event::Start(e) if e.local_name().as_ref() == b"row" => {
                let index = row_index(&e)?.unwrap_or(next_row);
                next_row = index + 1;
                let cells =
                    read_row_cells(&mut reader, index, shared_strings, &mut shared_masters)?;
                if !cells.is_empty() {
                    sheet.rows.push(Row { index, cells });
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                next_row = row_index(&e)?.unwrap_or(next_row) + 1;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    sheet.rows.sort_by_key(|r| r.index);
    Ok(sheet)
}

/// 0-based index from a `<row r="N">` attribute.
pub(crate) fn row_index(e: &BytesStart<'_>) -> Result<Option<u32>, XlsxError> {
    Ok(crate::xml::attr_value(e, b"r")?
        .and_then(|r| r.trim().parse::<u32>().ok())
        .and_then(|r| r.checked_sub(1)))
}

/// Parsed `r`, `t` and `s` attributes of a `<c>` element.
pub(crate) struct CellAttrs {
    pub(crate) at: Option<CellRef>,
    pub(crate) t: Option<String>,
    pub(crate) s: Option<u32>,
}

pub(crate) fn cell_attrs(e: &BytesStart<'_>) -> Result<CellAttrs, XlsxError> {
    let mut attrs = CellAttrs {
        at: None,
        t: None,
        s: None,
    };
    for attr in e.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?;
        match local_name(attr.key.as_ref()) {
            b"r" => attrs.at = CellRef::from_a1(&value).ok(),
            b"t" => attrs.t = Some(value.into_owned()),
            b"s" => attrs.s = value.trim().parse().ok(),
            _ => {}
        }
    }
    Ok(attrs)
}

/// `<f>` of one cell; `shared` is the group index (`si`) of a `t="shared"` formula.
struct RawFormula {
    text: String,
    shared: Option<String>,
}

/// Shared-formula masters seen so far: `si` -> (master cell, master text).
type SharedMasters = HashMap<String, (CellRef, String)>;

fn shared_index(e: &BytesStart<'_>) -> Result<Option<String>, XlsxError> {
    if crate::xml::attr_value(e, b"t")?.as_deref() != Some("shared") {
        return Ok(None);
    }
    crate::xml::attr_value(e, b"si")
}

/// Text of the formula at `at`. A shared-formula child has none of its own and gets its
/// master's text translated by the distance between the two cells.
fn resolve_formula(formula: RawFormula, at: CellRef, masters: &mut SharedMasters) -> String {
    let text = formula.text.trim_start_matches('=').to_string();
    let Some(si) = formula.shared else {
        return text;
    };
    if !text.is_empty() {
        masters.insert(si, (at, text.clone()));
        return text;
    }
    match masters.get(&si) {
        Some((master, master_text)) => shift_references(
            master_text,
            i64::from(at.row) - i64::from(master.row),
            i64::from(at.col) - i64::from(master.col),
        ),
        None => {
            log::warn!("shared formula {si} at {at} precedes its master");
            text
        }
    }
}

fn read_row_cells(
    reader: &mut Reader<&[u8]>,
    row: u32,
    shared_strings: &SharedStrings,
    shared_masters: &mut SharedMasters,
) -> Result<Vec<Cell>, XlsxError> {
    let mut buf = Vec::new();
    let mut cells: Vec<Cell> = Vec::new();
    let mut next_col = 0u32;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                let attrs = cell_attrs(&e)?;
                let col = attrs.at.map(|at| at.col).unwrap_or(next_col);
                next_col = col + 1;
                let (raw, inline, formula) = read_cell_body(reader)?;
                let value = decode_value(attrs.t.as_deref(), raw, inline, shared_strings);
                let formula = formula
                    .map(|f| resolve_formula(f, CellRef::new(row, col), shared_masters));
                cells.push(Cell {
                    col,
                    value,
                    formula,
                    style: attrs.s,
                });
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                let attrs = cell_attrs(&e)?;
                let col = attrs.at.map(|at| at.col).unwrap_or(next_col);
                next_col = col + 1;
                cells.push(Cell {
                    col,
                    value: CellValue::Null,
                    formula: None,
                    style: attrs.s,
                });
            }
            Event::End(e) if e.local_name().as_ref() == b"row" => break,
            Event::Eof => {
                return Err(XlsxError::Invalid(format!(
                    "unexpected EOF inside row {}",
                    row + 1
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    cells.sort_by_key(|c| c.col);
    cells.dedup_by_key(|c| c.col);
    Ok(cells)
}

/// `(<v> text, <is> text, <f>)` of one cell.
fn read_cell_body(
    reader: &mut Reader<&[u8]>,
) -> Result<(Option<String>, Option<String>, Option<RawFormula>), XlsxError> {
    let mut buf = Vec::new();
    let mut raw = None;
    let mut inline = None;
    let mut formula = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"v" => {
                raw = Some(read_plain_text(reader, b"v")?);
            }
            Event::Start(e) if e.local_name().as_ref() == b"f" => {
                let shared = shared_index(&e)?;
                let text = read_plain_text(reader, b"f")?;
                formula = Some(RawFormula { text, shared });
            }
            Event::Empty(e) if e.local_name().as_ref() == b"f" => {
                formula = Some(RawFormula {
                    text: String::new(),
                    shared: shared_index(&e)?,
                });
            }
            Event::Start(e) if e.local_name().as_ref() == b"is" => {
                inline = Some(read_rich_text(reader, b"is")?);
            }
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                reader.read_to_end_into(quick_xml::name::QName(&name), &mut Vec::new())?;
            }
            Event::End(e) if e.local_name().as_ref() == b"c" => break,
            Event::Eof => return Err(XlsxError::Invalid("unexpected EOF inside cell".into())),
            _ => {}
        }
        buf.clear();
    }

    Ok((raw, inline, formula))
}

pub(crate) fn read_plain_text(reader: &mut Reader<&[u8]>, end: &[u8]) -> Result<String, XlsxError> {
    let mut buf = Vec::new();
    let mut out = String::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(t) => out.push_str(&t.unescape()?),
            Event::CData(t) => out.push_str(&String::from_utf8_lossy(&t)),
            Event::End(e) if e.local_name().as_ref() == end => break,
            Event::Eof => return Err(XlsxError::Invalid("unexpected EOF inside cell value".into())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn decode_value(
    t: Option<&str>,
    raw: Option<String>,
    inline: Option<String>,
    shared_strings: &SharedStrings,
) -> CellValue {
    match t {
        Some("inlineStr") => inline.or(raw).map(CellValue::Text).unwrap_or_default(),
        Some("s") => {
            let Some(raw) = raw else {
                return CellValue::Null;
            };
            match raw.trim().parse::<u32>().ok().and_then(|idx| shared_strings.get(idx)) {
                Some(text) => CellValue::Text(text.to_string()),
                None => {
                    log::warn!("dangling shared string index {raw:?}");
                    CellValue::Null
                }
            }
        }
        Some("b") => match raw.as_deref().map(str::trim) {
            Some("1") | Some("true") => CellValue::Boolean(true),
            Some("0") | Some("false") => CellValue::Boolean(false),
            _ => CellValue::Null,
        },
        // Formula string results, error codes (`#N/A`) and ISO 8601 dates all read as text.
        Some("str") | Some("e") | Some("d") => raw.map(CellValue::Text).unwrap_or_default(),
        _ => match raw {
            None => CellValue::Null,
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(n) => CellValue::Number(n),
                Err(_) => CellValue::Text(raw),
            },
        },
    }
}

/// Render a complete, minimal worksheet part holding `rows` from `A1`, strings inline.
///
/// Null values produce no `<c>` element.
pub fn render_worksheet(rows: &[Vec<CellValue>]) -> Result<Vec<u8>, XlsxError> {
    let max_col = rows.iter().map(Vec::len).max().unwrap_or(0);
    let dimension = if rows.is_empty() || max_col == 0 {
        "A1".to_string()
    } else {
        CellRange::new(
            CellRef::new(0, 0),
            CellRef::new(rows.len() as u32 - 1, max_col as u32 - 1),
        )
        .to_a1()
    };

    let mut out = String::with_capacity(256 + rows.len() * 64);
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push('\n');
    out.push_str(
        r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#,
    );
    out.push_str(&format!(r#"<dimension ref="{dimension}"/>"#));
    out.push_str("<sheetData>");
    for (r, values) in rows.iter().enumerate() {
        out.push_str(&format!(r#"<row r="{}">"#, r + 1));
        for (c, value) in values.iter().enumerate() {
            let at = CellRef::new(r as u32, c as u32).to_a1();
            out.push_str(&render_cell("", &at, None, value, None)?);
        }
        out.push_str("</row>");
    }
    out.push_str("</sheetData></worksheet>");
    Ok(out.into_bytes())
}

/// Render one `<c>` element. Text is written as a shared string when `shared_index` is given,
/// otherwise inline. A null value renders an empty (possibly styled) cell, or nothing when
/// unstyled. `p` is the SpreadsheetML namespace prefix in use (`""` or e.g. `"x:"`).
pub(crate) fn render_cell(
    p: &str,
    a1: &str,
    style: Option<u32>,
    value: &CellValue,
    shared_index: Option<u32>,
) -> Result<String, XlsxError> {
    let style = style
        .filter(|s| *s != 0)
        .map(|s| format!(r#" s="{s}""#))
        .unwrap_or_default();
    Ok(match value {
        CellValue::Null if style.is_empty() => String::new(),
        CellValue::Null => format!(r#"<{p}c r="{a1}"{style}/>"#),
        CellValue::Number(n) => {
            if !n.is_finite() {
                return Err(XlsxError::Invalid(format!(
                    "cannot store non-finite number {n} in {a1}"
                )));
            }
            format!(r#"<{p}c r="{a1}"{style}><{p}v>{}</{p}v></{p}c>"#, format_number(*n))
        }
        CellValue::Boolean(b) => {
            format!(r#"<{p}c r="{a1}"{style} t="b"><{p}v>{}</{p}v></{p}c>"#, u8::from(*b))
        }
        CellValue::Text(s) => match shared_index {
            Some(idx) => format!(r#"<{p}c r="{a1}"{style} t="s"><{p}v>{idx}</{p}v></{p}c>"#),
            None => {
                let space = if needs_space_preserve(s) {
                    r#" xml:space="preserve""#
                } else {
                    ""
                };
                format!(
                    r#"<{p}c r="{a1}"{style} t="inlineStr"><{p}is><{p}t{space}>{}</{p}t></{p}is></{p}c>"#,
                    escape_text(s)
                )
            }
        },
    })
}
