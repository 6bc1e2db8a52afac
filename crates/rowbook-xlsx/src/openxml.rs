//! OPC relationship parts (`*.rels`): parsing, target resolution and in-place edits.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::package::{XlsxError, XlsxPackage};
use crate::xml::{attr_value, escape_attr, insert_before_end, local_name, rewrite_elements};
use crate::xml::ElementAction;

pub const REL_TYPE_WORKSHEET: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
pub const REL_TYPE_SHARED_STRINGS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings";
pub const REL_TYPE_CALC_CHAIN: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain";

const EMPTY_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"></Relationships>"#;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub type_uri: String,
    pub target: String,
    pub target_mode: Option<String>,
}

impl Relationship {
    pub fn is_external(&self) -> bool {
        self.target_mode
            .as_deref()
            .is_some_and(|mode| mode.trim().eq_ignore_ascii_case("External"))
    }

    /// Type URIs come in transitional and strict flavours; compare on the trailing segment.
    pub fn has_type(&self, type_uri: &str) -> bool {
        let tail = |uri: &str| uri.rsplit('/').next().unwrap_or(uri).to_ascii_lowercase();
        tail(&self.type_uri) == tail(type_uri)
    }
}

fn part_dir(part: &str) -> &str {
    part.trim_start_matches('/')
        .rsplit_once('/')
        .map_or("", |(dir, _)| dir)
}

/// `xl/workbook.xml` -> `xl/_rels/workbook.xml.rels`.
pub fn rels_part_name(part_name: &str) -> String {
    let part_name = part_name.trim_start_matches('/');
    match part_name.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part_name}.rels"),
    }
}

/// Part name a relationship `target` points at, given the part that owns the relationship.
///
/// Fragments are dropped. A leading `/` roots the target at the package instead of the owner's
/// directory.
pub fn resolve_target(base_part: &str, target: &str) -> String {
    let target = target.split('#').next().unwrap_or_default();
    if target.is_empty() {
        return base_part.trim_start_matches('/').to_string();
    }

    let mut segments: Vec<&str> = if target.starts_with('/') {
        Vec::new()
    } else {
        part_dir(base_part).split('/').filter(|s| !s.is_empty()).collect()
    };
    for segment in target.split('/') {
        if segment == ".." {
            segments.pop();
        } else if !segment.is_empty() && segment != "." {
            segments.push(segment);
        }
    }
    segments.join("/")
}

/// Target of `part` expressed relative to the directory of `base_part`, as Excel writes it.
pub fn relative_target(base_part: &str, part: &str) -> String {
    let base_dir = part_dir(base_part);
    let part = part.trim_start_matches('/');
    if base_dir.is_empty() {
        return part.to_string();
    }
    match part.strip_prefix(base_dir).and_then(|rest| rest.strip_prefix('/')) {
        Some(rest) => rest.to_string(),
        None => format!("/{part}"),
    }
}

fn relationship_from(e: &BytesStart<'_>) -> Result<Option<Relationship>, XlsxError> {
    let (Some(id), Some(type_uri), Some(target)) = (
        attr_value(e, b"Id")?,
        attr_value(e, b"Type")?,
        attr_value(e, b"Target")?,
    ) else {
        return Ok(None);
    };
    Ok(Some(Relationship {
        id,
        type_uri,
        target,
        target_mode: attr_value(e, b"TargetMode")?,
    }))
}

/// Every complete `<Relationship>` in a `.rels` part. Entries missing `Id`, `Type` or `Target`
/// are skipped.
pub fn parse_relationships(xml: &[u8]) -> Result<Vec<Relationship>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    let mut found = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e)
                if local_name(e.name().as_ref()) == b"Relationship" =>
            {
                found.extend(relationship_from(&e)?);
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(found)
}

/// Relationships owned by `part_name`; empty when the `.rels` part is absent.
pub fn part_relationships(
    package: &XlsxPackage,
    part_name: &str,
) -> Result<Vec<Relationship>, XlsxError> {
    match package.part(&rels_part_name(part_name)) {
        Some(bytes) => parse_relationships(bytes),
        None => Ok(Vec::new()),
    }
}

/// Resolved part names of the internal relationships of `part_name` having `type_uri`.
pub fn related_parts(
    package: &XlsxPackage,
    part_name: &str,
    type_uri: &str,
) -> Result<Vec<String>, XlsxError> {
    Ok(part_relationships(package, part_name)?
        .into_iter()
        .filter(|rel| !rel.is_external() && rel.has_type(type_uri))
        .map(|rel| resolve_target(part_name, &rel.target))
        .collect())
}

/// `rId{n}` one past the highest numeric id in use.
pub fn next_relationship_id(relationships: &[Relationship]) -> String {
    let max = relationships
        .iter()
        .filter_map(|rel| rel.id.strip_prefix("rId")?.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("rId{}", max + 1)
}

/// Append a relationship from `part_name` to `target_part` and return its new id.
pub fn add_relationship(
    package: &mut XlsxPackage,
    part_name: &str,
    type_uri: &str,
    target_part: &str,
) -> Result<String, XlsxError> {
    let rels_name = rels_part_name(part_name);
    let xml = package
        .part(&rels_name)
        .map(<[u8]>::to_vec)
        .unwrap_or_else(|| EMPTY_RELS.as_bytes().to_vec());
    let id = next_relationship_id(&parse_relationships(&xml)?);
    let target = escape_attr(&relative_target(part_name, target_part));
    let type_uri = escape_attr(type_uri);
    let updated = insert_before_end(&xml, b"Relationships", |container| {
        format!(
            r#"<{} Id="{id}" Type="{type_uri}" Target="{target}"/>"#,
            crate::xml::prefixed_tag(container, "Relationship")
        )
    })?;
    package.set_part(rels_name, updated);
    Ok(id)
}

/// Remove the relationships of `part_name` matching `remove`; returns the removed entries.
pub fn remove_relationships(
    package: &mut XlsxPackage,
    part_name: &str,
    mut remove: impl FnMut(&Relationship) -> bool,
) -> Result<Vec<Relationship>, XlsxError> {
    let rels_name = rels_part_name(part_name);
    let Some(xml) = package.part(&rels_name) else {
        return Ok(Vec::new());
    };
    let doomed: Vec<Relationship> = parse_relationships(xml)?
        .into_iter()
        .filter(|rel| remove(rel))
        .collect();
    if doomed.is_empty() {
        return Ok(doomed);
    }

    let rewritten = rewrite_elements(xml, b"Relationship", |e| {
        let id = attr_value(e, b"Id")?;
        Ok(if doomed.iter().any(|rel| Some(&rel.id) == id.as_ref()) {
            ElementAction::Drop
        } else {
            ElementAction::Keep
        })
    })?;
    if let Some(updated) = rewritten {
        package.set_part(rels_name, updated);
    }
    Ok(doomed)
}
