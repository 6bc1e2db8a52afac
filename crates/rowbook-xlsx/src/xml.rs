//! Small streaming helpers shared by the part rewriters.
//!
//! All rewrites run through `quick_xml` with `trim_text(false)` so that every event we do not
//! touch is re-emitted unchanged.

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::XlsxError;

pub(crate) fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

pub(crate) fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub(crate) fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

pub(crate) fn needs_space_preserve(text: &str) -> bool {
    text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace)
}

/// Unescaped value of the first attribute whose local name is `key`.
pub(crate) fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, XlsxError> {
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        if local_name(attr.key.as_ref()) == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Copy `e`, replacing (or appending) the attribute named `key`. Other attributes keep their
/// original (escaped) bytes and order.
pub(crate) fn with_attr(
    e: &BytesStart<'_>,
    key: &str,
    value: &str,
) -> Result<BytesStart<'static>, XlsxError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    let mut replaced = false;
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        if attr.key.as_ref() == key.as_bytes() {
            out.push_attribute((key, value));
            replaced = true;
        } else {
            out.push_attribute(attr);
        }
    }
    if !replaced {
        out.push_attribute((key, value));
    }
    Ok(out)
}

/// Prefix-aware tag name: `<x:sheets>` yields `x:sheet` for `local = "sheet"`.
pub(crate) fn prefixed_tag(container_name: &[u8], local: &str) -> String {
    match container_name.iter().position(|b| *b == b':') {
        Some(idx) => format!("{}:{local}", String::from_utf8_lossy(&container_name[..idx])),
        None => local.to_string(),
    }
}

pub(crate) enum ElementAction {
    Keep,
    Drop,
    Replace(BytesStart<'static>),
}

/// Visit every element whose local name is `target`, keeping, dropping (with its subtree) or
/// replacing its start tag. Returns `None` when nothing changed.
pub(crate) fn rewrite_elements(
    xml: &[u8],
    target: &[u8],
    mut visit: impl FnMut(&BytesStart<'_>) -> Result<ElementAction, XlsxError>,
) -> Result<Option<Vec<u8>>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut buf = Vec::new();
    let mut changed = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_name(e.name().as_ref()) == target => match visit(&e)? {
                ElementAction::Keep => writer.write_event(Event::Start(e.into_owned()))?,
                ElementAction::Drop => {
                    changed = true;
                    let name = e.name().as_ref().to_vec();
                    let mut skip = Vec::new();
                    reader.read_to_end_into(quick_xml::name::QName(&name), &mut skip)?;
                }
                ElementAction::Replace(start) => {
                    changed = true;
                    writer.write_event(Event::Start(start))?;
                }
            },
            Event::Empty(e) if local_name(e.name().as_ref()) == target => match visit(&e)? {
                ElementAction::Keep => writer.write_event(Event::Empty(e.into_owned()))?,
                ElementAction::Drop => changed = true,
                ElementAction::Replace(start) => {
                    changed = true;
                    writer.write_event(Event::Empty(start))?;
                }
            },
            Event::Eof => break,
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    Ok(changed.then(|| writer.into_inner()))
}

/// Insert `render(container_tag_name)` right before the closing tag of the first element whose
/// local name is `container`. A self-closing container is expanded.
pub(crate) fn insert_before_end(
    xml: &[u8],
    container: &[u8],
    render: impl Fn(&[u8]) -> String,
) -> Result<Vec<u8>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 256));
    let mut buf = Vec::new();
    let mut inserted = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::End(e) if !inserted && local_name(e.name().as_ref()) == container => {
                writer
                    .get_mut()
                    .extend_from_slice(render(e.name().as_ref()).as_bytes());
                inserted = true;
                writer.write_event(Event::End(e.into_owned()))?;
            }
            Event::Empty(e) if !inserted && local_name(e.name().as_ref()) == container => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                writer.write_event(Event::Start(e.into_owned()))?;
                writer
                    .get_mut()
                    .extend_from_slice(render(name.as_bytes()).as_bytes());
                inserted = true;
                writer.write_event(Event::End(BytesEnd::new(name)))?;
            }
            Event::Eof => break,
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    if !inserted {
        return Err(XlsxError::Invalid(format!(
            "missing <{}> element",
            String::from_utf8_lossy(container)
        )));
    }
    Ok(writer.into_inner())
}
