//! Synthetic workbook packages for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use zip::write::FileOptions;
use zip::ZipWriter;

pub enum V {
    S(String),
    N(f64),
    B(bool),
    /// Formula with its cached numeric result.
    F(String, f64),
    Empty,
}

pub fn s(text: &str) -> V {
    V::S(text.to_string())
}

pub fn n(value: f64) -> V {
    V::N(value)
}

pub fn f(formula: &str, cached: f64) -> V {
    V::F(formula.to_string(), cached)
}

pub struct SheetSpec {
    pub name: String,
    pub rows: Vec<Vec<V>>,
    pub hidden: bool,
}

impl SheetSpec {
    pub fn new(name: &str, rows: Vec<Vec<V>>) -> Self {
        Self {
            name: name.to_string(),
            rows,
            hidden: false,
        }
    }
}

#[derive(Default)]
pub struct BookSpec {
    pub sheets: Vec<SheetSpec>,
    pub vba: bool,
    pub macrosheet: bool,
    pub calc_chain: bool,
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn col_name(mut col: usize) -> String {
    let mut out = Vec::new();
    col += 1;
    while col > 0 {
        out.push(b'A' + ((col - 1) % 26) as u8);
        col = (col - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap()
}

/// Excel-like package: shared strings for text, style `1` on every data row cell.
pub fn build(spec: &BookSpec) -> Vec<u8> {
    let mut parts: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut sst: Vec<String> = Vec::new();
    let macro_enabled = spec.vba || spec.macrosheet;

    let mut overrides = String::new();
    let mut workbook_rels = String::new();
    let mut sheets_xml = String::new();
    let mut rid = 0;

    for (idx, sheet) in spec.sheets.iter().enumerate() {
        let mut data = String::new();
        for (r, row) in sheet.rows.iter().enumerate() {
            data.push_str(&format!(r#"<row r="{}">"#, r + 1));
            for (c, value) in row.iter().enumerate() {
                let a1 = format!("{}{}", col_name(c), r + 1);
                let style = if r > 0 { r#" s="1""# } else { "" };
                match value {
                    V::S(text) => {
                        let i = match sst.iter().position(|t| t == text) {
                            Some(i) => i,
                            None => {
                                sst.push(text.clone());
                                sst.len() - 1
                            }
                        };
                        data.push_str(&format!(r#"<c r="{a1}"{style} t="s"><v>{i}</v></c>"#));
                    }
                    V::N(n) => data.push_str(&format!(r#"<c r="{a1}"{style}><v>{n}</v></c>"#)),
                    V::B(b) => data.push_str(&format!(
                        r#"<c r="{a1}"{style} t="b"><v>{}</v></c>"#,
                        u8::from(*b)
                    )),
                    V::F(formula, cached) => data.push_str(&format!(
                        r#"<c r="{a1}"{style}><f>{}</f><v>{cached}</v></c>"#,
                        escape(formula)
                    )),
                    V::Empty => {}
                }
            }
            data.push_str("</row>");
        }
        let part = format!("xl/worksheets/sheet{}.xml", idx + 1);
        parts.insert(
            part.clone(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><dimension ref="A1"/><sheetViews><sheetView workbookViewId="0"/></sheetViews><sheetData>{data}</sheetData><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/></worksheet>"#
            )
            .into_bytes(),
        );
        rid += 1;
        overrides.push_str(&format!(
            r#"<Override PartName="/{part}" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
        ));
        workbook_rels.push_str(&format!(
            r#"<Relationship Id="rId{rid}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
            idx + 1
        ));
        let state = if sheet.hidden { r#" state="hidden""# } else { "" };
        sheets_xml.push_str(&format!(
            r#"<sheet name="{}" sheetId="{}"{state} r:id="rId{rid}"/>"#,
            escape(&sheet.name),
            idx + 1
        ));
    }

    if spec.macrosheet {
        rid += 1;
        parts.insert(
            "xl/macrosheets/sheet1.xml".to_string(),
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<xm:macrosheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:xm="http://schemas.microsoft.com/office/excel/2006/main"><sheetData/></xm:macrosheet>"#
                .to_vec(),
        );
        overrides.push_str(r#"<Override PartName="/xl/macrosheets/sheet1.xml" ContentType="application/vnd.ms-excel.macrosheet+xml"/>"#);
        workbook_rels.push_str(&format!(
            r#"<Relationship Id="rId{rid}" Type="http://schemas.microsoft.com/office/2006/relationships/xlMacrosheet" Target="macrosheets/sheet1.xml"/>"#
        ));
        sheets_xml.push_str(&format!(
            r#"<sheet name="Macro1" sheetId="{}" r:id="rId{rid}"/>"#,
            spec.sheets.len() + 1
        ));
    }

    if spec.vba {
        rid += 1;
        parts.insert("xl/vbaProject.bin".to_string(), b"\xD0\xCF\x11\xE0fake-vba".to_vec());
        parts.insert("xl/vbaProjectSignature.bin".to_string(), b"sig".to_vec());
        parts.insert(
            "xl/_rels/vbaProject.bin.rels".to_string(),
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.microsoft.com/office/2006/relationships/vbaProjectSignature" Target="vbaProjectSignature.bin"/></Relationships>"#
                .to_vec(),
        );
        overrides.push_str(r#"<Override PartName="/xl/vbaProject.bin" ContentType="application/vnd.ms-office.vbaProject"/><Override PartName="/xl/vbaProjectSignature.bin" ContentType="application/vnd.ms-office.vbaProjectSignature"/>"#);
        workbook_rels.push_str(&format!(
            r#"<Relationship Id="rId{rid}" Type="http://schemas.microsoft.com/office/2006/relationships/vbaProject" Target="vbaProject.bin"/>"#
        ));
    }

    if spec.calc_chain {
        rid += 1;
        parts.insert(
            "xl/calcChain.xml".to_string(),
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<calcChain xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><c r="C2" i="1"/></calcChain>"#
                .to_vec(),
        );
        overrides.push_str(r#"<Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/>"#);
        workbook_rels.push_str(&format!(
            r#"<Relationship Id="rId{rid}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/>"#
        ));
    }

    rid += 1;
    workbook_rels.push_str(&format!(
        r#"<Relationship Id="rId{rid}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#
    ));
    rid += 1;
    workbook_rels.push_str(&format!(
        r#"<Relationship Id="rId{rid}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/>"#
    ));

    let items: String = sst
        .iter()
        .map(|t| format!("<si><t>{}</t></si>", escape(t)))
        .collect();
    parts.insert(
        "xl/sharedStrings.xml".to_string(),
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{0}" uniqueCount="{0}">{items}</sst>"#,
            sst.len()
        )
        .into_bytes(),
    );
    parts.insert("xl/styles.xml".to_string(), STYLES.as_bytes().to_vec());

    let workbook_ct = if macro_enabled {
        "application/vnd.ms-excel.sheet.macroEnabled.main+xml"
    } else {
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"
    };
    parts.insert(
        "[Content_Types].xml".to_string(),
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="{workbook_ct}"/>{overrides}<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/><Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/></Types>"#
        )
        .into_bytes(),
    );
    parts.insert(
        "_rels/.rels".to_string(),
        br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
            .to_vec(),
    );
    parts.insert(
        "xl/_rels/workbook.xml.rels".to_string(),
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{workbook_rels}</Relationships>"#
        )
        .into_bytes(),
    );
    parts.insert(
        "xl/workbook.xml".to_string(),
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><bookViews><workbookView activeTab="0"/></bookViews><sheets>{sheets_xml}</sheets><calcPr calcId="191029"/></workbook>"#
        )
        .into_bytes(),
    );

    zip_parts(&parts)
}

pub fn zip_parts(parts: &BTreeMap<String, Vec<u8>>) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::<()>::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, bytes) in parts {
        zip.start_file(name.as_str(), options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="2"><border><left/><right/><top/><bottom/><diagonal/></border><border><left style="thin"/><right style="thin"/><top style="thin"/><bottom style="thin"/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="0" fillId="0" borderId="1" xfId="0" applyBorder="1"/></cellXfs></styleSheet>"#;

/// Orders sheet used across tests: header row plus three data rows, `Total` is a formula.
pub fn orders_sheet() -> SheetSpec {
    SheetSpec::new(
        "Orders",
        vec![
            vec![s("id"), s("Customer"), s("Qty"), s("Total"), s("_version")],
            vec![s("o-1"), s("Acme"), n(2.0), f("C2*10", 20.0), n(1.0)],
            vec![s("o-2"), s("Globex"), n(5.0), f("C3*10", 50.0), n(3.0)],
            vec![s("o-3"), s("Initech"), n(1.0), f("C4*10", 10.0), n(1.0)],
        ],
    )
}
