//! Shared strings table (`xl/sharedStrings.xml`).
//!
//! Only the plain display text of each `<si>` is modelled. Rich-text runs are flattened and
//! phonetic (`<rPh>`) runs are skipped. New strings are appended; existing items are never
//! rewritten, so every index already referenced by a worksheet stays valid.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::openxml::{related_parts, REL_TYPE_SHARED_STRINGS};
use crate::package::{XlsxError, XlsxPackage, WORKBOOK_PART};
use crate::xml::{
    attr_value, escape_text, insert_before_end, needs_space_preserve, prefixed_tag,
    rewrite_elements, with_attr, ElementAction,
};

const DEFAULT_PART: &str = "xl/sharedStrings.xml";

#[derive(Debug, Clone, Default)]
pub struct SharedStrings {
    part: Option<String>,
    items: Vec<String>,
    appended: usize,
    index: HashMap<String, u32>,
}

impl SharedStrings {
    /// Load the table referenced from the workbook. A workbook without one yields an empty,
    /// part-less table and callers fall back to inline strings.
    pub fn load(package: &XlsxPackage) -> Result<Self, XlsxError> {
        let part = related_parts(package, WORKBOOK_PART, REL_TYPE_SHARED_STRINGS)?
            .into_iter()
            .find(|name| package.has_part(name))
            .or_else(|| package.has_part(DEFAULT_PART).then(|| DEFAULT_PART.to_string()));
        let Some(part) = part else {
            return Ok(Self::default());
        };

        let items = parse_shared_strings(package.require_part(&part)?)?;
        let mut index = HashMap::with_capacity(items.len());
        for (i, text) in items.iter().enumerate() {
            index.entry(text.clone()).or_insert(i as u32);
        }
        Ok(Self {
            part: Some(part),
            items,
            appended: 0,
            index,
        })
    }

    pub fn has_part(&self) -> bool {
        self.part.is_some()
    }

    pub fn get(&self, idx: u32) -> Option<&str> {
        self.items.get(idx as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Index of `text`, appending it when it is not in the table yet.
    pub fn intern(&mut self, text: &str) -> u32 {
        if let Some(idx) = self.index.get(text) {
            return *idx;
        }
        let idx = self.items.len() as u32;
        self.items.push(text.to_string());
        self.index.insert(text.to_string(), idx);
        self.appended += 1;
        idx
    }

    /// Persist appended items (and refreshed counts) into the package. No-op when nothing was
    /// appended.
    pub fn write_back(&self, package: &mut XlsxPackage) -> Result<(), XlsxError> {
        let Some(part) = self.part.as_deref() else {
            return Ok(());
        };
        if self.appended == 0 {
            return Ok(());
        }

        let xml = package.require_part(part)?.to_vec();
        let new_items = &self.items[self.items.len() - self.appended..];
        let with_items = insert_before_end(&xml, b"sst", |container| {
            let si = prefixed_tag(container, "si");
            let t = prefixed_tag(container, "t");
            let mut out = String::new();
            for text in new_items {
                let space = if needs_space_preserve(text) {
                    r#" xml:space="preserve""#
                } else {
                    ""
                };
                out.push_str(&format!("<{si}><{t}{space}>{}</{t}></{si}>", escape_text(text)));
            }
            out
        })?;

        let unique = self.items.len().to_string();
        let updated = rewrite_elements(&with_items, b"sst", |e| {
            let mut start = with_attr(e, "uniqueCount", &unique)?;
            if let Some(count) = attr_value(e, b"count")? {
                let count = count.trim().parse::<usize>().unwrap_or(0) + self.appended;
                start = with_attr(&start, "count", &count.to_string())?;
            }
            Ok(ElementAction::Replace(start))
        })?
        .unwrap_or(with_items);

        log::debug!("appended {} shared strings to {part}", self.appended);
        package.set_part(part.to_string(), updated);
        Ok(())
    }
}

pub fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut items = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"si" => {
                items.push(read_rich_text(&mut reader, b"si")?);
            }
            Event::Empty(e) if e.local_name().as_ref() == b"si" => items.push(String::new()),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(items)
}

/// Visible text of a string item (`<si>` or an inline `<is>`), read up to the matching end tag.
///
/// Concatenates direct `<t>` children and `<r><t>` runs; any other subtree (phonetic runs,
/// extensions) is skipped.
pub(crate) fn read_rich_text(reader: &mut Reader<&[u8]>, end: &[u8]) -> Result<String, XlsxError> {
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_run = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => {
                read_text_into(reader, &mut out)?;
            }
            Event::Start(e) if !in_run && e.local_name().as_ref() == b"r" => in_run = true,
            Event::End(e) if in_run && e.local_name().as_ref() == b"r" => in_run = false,
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                reader.read_to_end_into(quick_xml::name::QName(&name), &mut Vec::new())?;
            }
            Event::End(e) if e.local_name().as_ref() == end => break,
            Event::Eof => {
                return Err(XlsxError::Invalid(format!(
                    "unexpected eof in <{}>",
                    String::from_utf8_lossy(end)
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

fn read_text_into(reader: &mut Reader<&[u8]>, out: &mut String) -> Result<(), XlsxError> {
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(t) => out.push_str(&t.unescape()?),
            Event::CData(t) => out.push_str(&String::from_utf8_lossy(&t)),
            Event::End(e) if e.local_name().as_ref() == b"t" => break,
            Event::Eof => return Err(XlsxError::Invalid("unexpected eof in <t>".to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}
