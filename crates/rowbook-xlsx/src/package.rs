use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use quick_xml::events::BytesStart;
use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::xml::{attr_value, escape_attr, insert_before_end, rewrite_elements, with_attr, ElementAction};
use crate::zip_util::{part_key, same_part, InflateBudget};

pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const WORKBOOK_PART: &str = "xl/workbook.xml";

/// Default cap on the inflated size of one part.
pub const MAX_PACKAGE_PART_BYTES: u64 = 256 << 20;

/// Default cap on the inflated size of a whole package.
pub const MAX_PACKAGE_TOTAL_BYTES: u64 = 512 << 20;

#[derive(Debug, Error)]
pub enum XlsxError {
    #[error("workbook is not a readable zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("part is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("malformed xml attribute: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("<sheet> element lacks the {0} attribute")]
    MissingAttr(&'static str),
    #[error("workbook has no {0} part")]
    MissingPart(String),
    #[error("invalid workbook: {0}")]
    Invalid(String),
    #[error("{part} inflates to {size} bytes, over the {max} byte limit")]
    PartTooLarge { part: String, size: u64, max: u64 },
    #[error("workbook inflates to at least {total} bytes, over the {max} byte limit")]
    PackageTooLarge { total: u64, max: u64 },
    #[error("sheetId is not a positive integer")]
    InvalidSheetId,
    #[error(transparent)]
    A1(#[from] crate::cell::A1ParseError),
}

/// Inflation caps applied by [`XlsxPackage::from_bytes_with_limits`].
#[derive(Debug, Clone, Copy)]
pub struct PackageLimits {
    pub per_part: u64,
    pub total: u64,
}

impl Default for PackageLimits {
    fn default() -> Self {
        Self {
            per_part: MAX_PACKAGE_PART_BYTES,
            total: MAX_PACKAGE_TOTAL_BYTES,
        }
    }
}

/// Which flavour of workbook `[Content_Types].xml` declares, named after the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkbookKind {
    Xlsx,
    Xlsm,
    Xltx,
    Xltm,
    Xlam,
}

const KINDS: [(WorkbookKind, &str); 5] = [
    (
        WorkbookKind::Xlsx,
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml",
    ),
    (
        WorkbookKind::Xlsm,
        "application/vnd.ms-excel.sheet.macroEnabled.main+xml",
    ),
    (
        WorkbookKind::Xltx,
        "application/vnd.openxmlformats-officedocument.spreadsheetml.template.main+xml",
    ),
    (
        WorkbookKind::Xltm,
        "application/vnd.ms-excel.template.macroEnabled.main+xml",
    ),
    (
        WorkbookKind::Xlam,
        "application/vnd.ms-excel.addin.macroEnabled.main+xml",
    ),
];

impl WorkbookKind {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let content_type = content_type.trim();
        KINDS
            .iter()
            .find(|(_, known)| content_type.eq_ignore_ascii_case(known))
            .map(|(kind, _)| *kind)
    }

    pub fn content_type(self) -> &'static str {
        KINDS
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, content_type)| *content_type)
            .unwrap_or(KINDS[0].1)
    }

    /// Kind a macro-stripped copy is declared as. Add-ins fall back to a plain workbook.
    pub fn macro_free(self) -> Self {
        match self {
            Self::Xlsm | Self::Xlam => Self::Xlsx,
            Self::Xltm => Self::Xltx,
            other => other,
        }
    }
}

/// Which kinds of macro content a package carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacroPresence {
    /// `xl/vbaProject.bin`
    pub vba_project: bool,
    /// Excel 4.0 sheets under `xl/macrosheets/`
    pub macrosheets: bool,
    pub dialog_sheets: bool,
}

impl MacroPresence {
    pub fn any(self) -> bool {
        self.vba_project || self.macrosheets || self.dialog_sheets
    }
}

/// A workbook held in memory as part name -> bytes.
///
/// Lookups ignore case and separator style. Parts nobody edits are written back byte-for-byte.
#[derive(Debug, Clone, Default)]
pub struct XlsxPackage {
    parts: BTreeMap<String, Vec<u8>>,
}

impl XlsxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, XlsxError> {
        Self::from_bytes_with_limits(bytes, PackageLimits::default())
    }

    pub fn from_bytes_with_limits(bytes: &[u8], limits: PackageLimits) -> Result<Self, XlsxError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut budget = InflateBudget::new(limits.per_part, limits.total);

        let mut package = Self::default();
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let size = entry.size();
            let body = budget.read_part(&name, size, &mut entry)?;
            package.parts.insert(name, body);
        }

        if !package.has_part(WORKBOOK_PART) {
            return Err(XlsxError::MissingPart(WORKBOOK_PART.to_string()));
        }
        Ok(package)
    }

    /// Wrap parts that are already inflated. No workbook part is required.
    pub fn from_parts(parts: BTreeMap<String, Vec<u8>>) -> Self {
        Self { parts }
    }

    fn stored_name(&self, name: &str) -> Option<&str> {
        if let Some((stored, _)) = self.parts.get_key_value(name) {
            return Some(stored.as_str());
        }
        self.parts
            .keys()
            .map(String::as_str)
            .find(|stored| same_part(stored, name))
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.stored_name(name)
            .and_then(|stored| self.parts.get(stored))
            .map(Vec::as_slice)
    }

    pub fn require_part(&self, name: &str) -> Result<&[u8], XlsxError> {
        self.part(name)
            .ok_or_else(|| XlsxError::MissingPart(name.to_string()))
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.stored_name(name).is_some()
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }

    /// Store `bytes` under `name`. An existing part keeps its original spelling.
    pub fn set_part(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        let name = name.into();
        let stored = match self.stored_name(&name) {
            Some(existing) => existing.to_string(),
            None => name,
        };
        self.parts.insert(stored, bytes);
    }

    pub fn remove_part(&mut self, name: &str) -> Option<Vec<u8>> {
        let stored = self.stored_name(name)?.to_string();
        self.parts.remove(&stored)
    }

    pub fn macro_presence(&self) -> MacroPresence {
        self.part_names()
            .map(part_key)
            .fold(MacroPresence::default(), |mut found, key| {
                found.vba_project |= key == "xl/vbaproject.bin";
                found.macrosheets |= key.starts_with("xl/macrosheets/");
                found.dialog_sheets |= key.starts_with("xl/dialogsheets/");
                found
            })
    }

    /// Kind declared by the workbook override in `[Content_Types].xml`.
    ///
    /// `None` when there is no content types part or the content type is not one we know.
    pub fn workbook_kind(&self) -> Result<Option<WorkbookKind>, XlsxError> {
        let Some(xml) = self.part(CONTENT_TYPES_PART) else {
            return Ok(None);
        };
        let mut declared = None;
        rewrite_elements(xml, b"Override", |e| {
            if declared.is_none() && overrides_workbook(e)? {
                declared = attr_value(e, b"ContentType")?;
            }
            Ok(ElementAction::Keep)
        })?;
        Ok(declared.as_deref().and_then(WorkbookKind::from_content_type))
    }

    /// Declare the workbook part as `kind`, adding its override if there is none.
    pub fn set_workbook_kind(&mut self, kind: WorkbookKind) -> Result<(), XlsxError> {
        let xml = self.require_part(CONTENT_TYPES_PART)?.to_vec();
        let wanted = kind.content_type();
        let mut has_override = false;
        let rewritten = rewrite_elements(&xml, b"Override", |e| {
            if !overrides_workbook(e)? {
                return Ok(ElementAction::Keep);
            }
            has_override = true;
            match attr_value(e, b"ContentType")? {
                Some(current) if current == wanted => Ok(ElementAction::Keep),
                _ => Ok(ElementAction::Replace(with_attr(e, "ContentType", wanted)?)),
            }
        })?;

        let updated = match rewritten {
            Some(updated) => updated,
            None if has_override => return Ok(()),
            None => append_override(&xml, WORKBOOK_PART, wanted)?,
        };
        self.set_part(CONTENT_TYPES_PART, updated);
        Ok(())
    }

    /// Declare `content_type` for `part` unless the part already has an override.
    pub fn ensure_content_type_override(
        &mut self,
        part: &str,
        content_type: &str,
    ) -> Result<(), XlsxError> {
        let xml = self.require_part(CONTENT_TYPES_PART)?.to_vec();
        let mut declared = false;
        rewrite_elements(&xml, b"Override", |e| {
            declared |= attr_value(e, b"PartName")?.is_some_and(|name| same_part(&name, part));
            Ok(ElementAction::Keep)
        })?;
        if !declared {
            let updated = append_override(&xml, part, content_type)?;
            self.set_part(CONTENT_TYPES_PART, updated);
        }
        Ok(())
    }

    /// Remove the overrides whose part name (without the leading `/`) matches `doomed`.
    ///
    /// Returns the number removed.
    pub fn remove_content_type_overrides(
        &mut self,
        mut doomed: impl FnMut(&str) -> bool,
    ) -> Result<usize, XlsxError> {
        let Some(xml) = self.part(CONTENT_TYPES_PART) else {
            return Ok(0);
        };
        let mut removed = 0;
        let rewritten = rewrite_elements(xml, b"Override", |e| {
            let name = attr_value(e, b"PartName")?.unwrap_or_default();
            if !doomed(name.trim_start_matches('/')) {
                return Ok(ElementAction::Keep);
            }
            removed += 1;
            Ok(ElementAction::Drop)
        })?;
        if let Some(updated) = rewritten {
            self.set_part(CONTENT_TYPES_PART, updated);
        }
        Ok(removed)
    }

    /// Zip the parts with `[Content_Types].xml` as the first entry.
    pub fn to_bytes(&self) -> Result<Vec<u8>, XlsxError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);

        let (content_types, rest): (Vec<_>, Vec<_>) = self
            .parts
            .iter()
            .partition(|(name, _)| name.as_str() == CONTENT_TYPES_PART);
        for (name, body) in content_types.into_iter().chain(rest) {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(body)?;
        }
        Ok(zip.finish()?.into_inner())
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> Result<(), XlsxError> {
        out.write_all(&self.to_bytes()?)?;
        Ok(())
    }
}

fn overrides_workbook(e: &BytesStart<'_>) -> Result<bool, XlsxError> {
    Ok(attr_value(e, b"PartName")?.is_some_and(|name| same_part(&name, WORKBOOK_PART)))
}

fn append_override(xml: &[u8], part: &str, content_type: &str) -> Result<Vec<u8>, XlsxError> {
    let part = escape_attr(part.trim_start_matches('/'));
    let content_type = escape_attr(content_type);
    insert_before_end(xml, b"Types", |_| {
        format!(r#"<Override PartName="/{part}" ContentType="{content_type}"/>"#)
    })
}
