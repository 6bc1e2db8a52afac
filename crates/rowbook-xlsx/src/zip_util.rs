use std::io::Read;

use crate::XlsxError;

/// Inflation limits for one package read: a cap per part and a shared cap for the whole archive.
pub(crate) struct InflateBudget {
    per_part: u64,
    total: u64,
    used: u64,
}

impl InflateBudget {
    pub(crate) fn new(per_part: u64, total: u64) -> Self {
        Self {
            per_part,
            total,
            used: 0,
        }
    }

    fn check(&self, name: &str, size: u64) -> Result<(), XlsxError> {
        if size > self.per_part {
            return Err(XlsxError::PartTooLarge {
                part: name.to_string(),
                size,
                max: self.per_part,
            });
        }
        if self.used + size > self.total {
            return Err(XlsxError::PackageTooLarge {
                total: self.used + size,
                max: self.total,
            });
        }
        Ok(())
    }

    /// Inflate `reader` into memory and charge it against the budget.
    ///
    /// `declared` comes from the zip directory and may lie, so the limit is checked before
    /// reading and again against the byte count actually produced.
    pub(crate) fn read_part(
        &mut self,
        name: &str,
        declared: u64,
        reader: &mut impl Read,
    ) -> Result<Vec<u8>, XlsxError> {
        self.check(name, declared)?;

        let cap = self.per_part.min(self.total - self.used);
        let mut bytes = Vec::with_capacity(declared.min(cap) as usize);
        reader.take(cap + 1).read_to_end(&mut bytes)?;

        let actual = bytes.len() as u64;
        self.check(name, actual)?;
        self.used += actual;
        Ok(bytes)
    }
}

/// Normalized form of a part name: no leading separator, forward slashes, ASCII lowercase.
pub(crate) fn part_key(name: &str) -> String {
    name.trim_start_matches(['/', '\\'])
        .replace('\\', "/")
        .to_ascii_lowercase()
}

/// Whether two spellings name the same part (`/XL\Workbook.xml` and `xl/workbook.xml` do).
pub(crate) fn same_part(a: &str, b: &str) -> bool {
    part_key(a) == part_key(b)
}
