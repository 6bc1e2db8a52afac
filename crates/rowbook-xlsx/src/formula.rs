//! Relative-reference arithmetic on formula text, as Excel applies it when a formula is filled
//! from one cell to another. Shared formulas store their text once, on the master cell, so
//! every other cell of the group is this translation of the master's text.
//!
//! Only A1 cell references move. `$`-anchored parts stay put, and string literals, quoted sheet
//! names, structured references and function names pass through untouched. Whole-row and
//! whole-column references (`2:2`, `B:B`) are left as written.

use crate::cell::{col_to_name, name_to_col, MAX_COLUMNS, MAX_ROWS};

/// Translate the relative parts of every A1 reference in `formula` by `rows` and `cols`.
/// A reference pushed off the sheet becomes `#REF!`.
pub fn shift_references(formula: &str, rows: i64, cols: i64) -> String {
    if rows == 0 && cols == 0 {
        return formula.to_string();
    }

    let bytes = formula.as_bytes();
    let mut out = String::with_capacity(formula.len() + 8);
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                let end = quoted_end(bytes, i);
                out.push_str(&formula[i..end]);
                i = end;
            }
            b'[' => {
                let end = bracket_end(bytes, i);
                out.push_str(&formula[i..end]);
                i = end;
            }
            b'$' | b'A'..=b'Z' | b'a'..=b'z' if i == 0 || !is_name_byte(bytes[i - 1]) => {
                let end = i + bytes[i..].iter().take_while(|b| is_name_byte(**b)).count();
                let token = &formula[i..end];
                match A1Token::parse(token) {
                    Some(reference) if !names_something_else(bytes, end) => {
                        out.push_str(&reference.shifted(rows, cols));
                    }
                    _ => out.push_str(token),
                }
                i = end;
            }
            _ => {
                let ch = formula[i..].chars().next().unwrap_or_default();
                out.push(ch);
                i += ch.len_utf8().max(1);
            }
        }
    }
    out
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'$' | b'_' | b'.' | b'\\')
}

/// `LOG10(` is a function and `AB1!` a sheet name, not references.
fn names_something_else(bytes: &[u8], end: usize) -> bool {
    matches!(bytes.get(end), Some(b'(') | Some(b'!') | Some(b'['))
}

/// End (exclusive) of a `"..."` or `'...'` run starting at `start`; doubled quotes escape.
fn quoted_end(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// End (exclusive) of a possibly nested `[...]` run starting at `start`.
fn bracket_end(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    for (offset, b) in bytes[start..].iter().enumerate() {
        match b {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return start + offset + 1;
                }
            }
            _ => {}
        }
    }
    bytes.len()
}

/// An A1 cell reference as written, anchors included.
struct A1Token {
    col: u32,
    row: u32,
    col_absolute: bool,
    row_absolute: bool,
}

impl A1Token {
    fn parse(token: &str) -> Option<Self> {
        let (col_absolute, rest) = match token.strip_prefix('$') {
            Some(rest) => (true, rest),
            None => (false, token),
        };
        let letters = rest.bytes().take_while(u8::is_ascii_alphabetic).count();
        let (letters, rest) = rest.split_at(letters);
        let (row_absolute, digits) = match rest.strip_prefix('$') {
            Some(digits) => (true, digits),
            None => (false, rest),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let col = name_to_col(letters)?;
        let row = digits.parse::<u32>().ok()?.checked_sub(1)?;
        (row < MAX_ROWS).then_some(Self {
            col,
            row,
            col_absolute,
            row_absolute,
        })
    }

    fn shifted(&self, rows: i64, cols: i64) -> String {
        let row = if self.row_absolute {
            Some(i64::from(self.row))
        } else {
            Some(i64::from(self.row) + rows).filter(|r| (0..i64::from(MAX_ROWS)).contains(r))
        };
        let col = if self.col_absolute {
            Some(i64::from(self.col))
        } else {
            Some(i64::from(self.col) + cols).filter(|c| (0..i64::from(MAX_COLUMNS)).contains(c))
        };
        let (Some(row), Some(col)) = (row, col) else {
            return "#REF!".to_string();
        };
        format!(
            "{}{}{}{}",
            if self.col_absolute { "$" } else { "" },
            col_to_name(col as u32),
            if self.row_absolute { "$" } else { "" },
            row + 1
        )
    }
}
