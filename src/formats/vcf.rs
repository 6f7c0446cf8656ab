//! Minimal VCF line tokenizer.
//!
//! Splits a raw data line into the eight fixed VCF columns with typed
//! accessors. This is deliberately small: header parsing, genotypes and
//! INFO schema handling belong to a full VCF library, not to a region
//! fetcher. What lives here is exactly what indexed fetching needs: the
//! position, the REF allele, and `INFO/END`, which together determine the
//! genomic span of a record.
//!
//! # Example
//!
//! ```
//! use tabfetch::VcfLine;
//!
//! # fn main() -> tabfetch::Result<()> {
//! let record = VcfLine::parse(b"chr1\t12345\trs123\tAT\tG\t30\tPASS\tDP=100")?;
//! assert_eq!(record.chrom, "chr1");
//! assert_eq!(record.pos, 12345);
//! assert_eq!(record.ref_allele, "AT");
//! assert_eq!(record.end(), 12346); // REF spans two bases
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, TabfetchError};

/// One tokenized VCF data line.
#[derive(Debug, Clone, PartialEq)]
pub struct VcfLine {
    /// Chromosome/contig name
    pub chrom: String,
    /// Position, 1-based
    pub pos: u64,
    /// Variant identifier, `None` when "."
    pub id: Option<String>,
    /// Reference allele
    pub ref_allele: String,
    /// Alternate alleles; empty when "."
    pub alt: Vec<String>,
    /// Phred-scaled quality, `None` when "."
    pub qual: Option<f64>,
    /// Filter status, `None` when "."
    pub filter: Option<String>,
    /// Raw INFO column
    pub info: String,
}

impl VcfLine {
    /// Tokenize a raw line (without the trailing newline).
    ///
    /// # Errors
    ///
    /// [`TabfetchError::InvalidLine`] when the line has fewer than the
    /// eight fixed columns, is not UTF-8, or carries a non-numeric POS.
    pub fn parse(line: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(line).map_err(|_| TabfetchError::InvalidLine {
            msg: "line is not valid UTF-8".into(),
        })?;
        let fields: Vec<&str> = text.split('\t').collect();
        if fields.len() < 8 {
            return Err(TabfetchError::InvalidLine {
                msg: format!("VCF line has {} columns, expected at least 8", fields.len()),
            });
        }

        let pos = fields[1].parse().map_err(|_| TabfetchError::InvalidLine {
            msg: format!("non-numeric POS {:?}", fields[1]),
        })?;
        let qual = match fields[5] {
            "." => None,
            q => Some(q.parse().map_err(|_| TabfetchError::InvalidLine {
                msg: format!("non-numeric QUAL {q:?}"),
            })?),
        };
        let alt = match fields[4] {
            "." => Vec::new(),
            a => a.split(',').map(str::to_owned).collect(),
        };

        Ok(VcfLine {
            chrom: fields[0].to_owned(),
            pos,
            id: dot_opt(fields[2]),
            ref_allele: fields[3].to_owned(),
            alt,
            qual,
            filter: dot_opt(fields[6]),
            info: fields[7].to_owned(),
        })
    }

    /// Value of an INFO key; flags yield `Some("")`.
    pub fn info_value(&self, key: &str) -> Option<&str> {
        self.info.split(';').find_map(|part| match part.split_once('=') {
            Some((k, v)) if k == key => Some(v),
            None if part == key => Some(""),
            _ => None,
        })
    }

    /// Inclusive 1-based end of the record's span: `INFO/END` when present,
    /// otherwise `pos` plus the REF allele length minus one.
    pub fn end(&self) -> u64 {
        if let Some(end) = self.info_value("END").and_then(|v| v.parse().ok()) {
            return end;
        }
        self.pos + (self.ref_allele.len() as u64).max(1) - 1
    }
}

fn dot_opt(field: &str) -> Option<String> {
    match field {
        "." => None,
        f => Some(f.to_owned()),
    }
}

/// Extract `INFO/END` from a raw INFO column.
///
/// Returns `Ok(None)` when the key is absent; a present but non-numeric
/// value is a data error, not an absence.
pub(crate) fn info_end(info: &[u8]) -> Result<Option<u64>> {
    for part in info.split(|&b| b == b';') {
        if let Some(value) = part.strip_prefix(b"END=") {
            let end = std::str::from_utf8(value)
                .ok()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| TabfetchError::InvalidLine {
                    msg: format!("non-numeric INFO/END {:?}", String::from_utf8_lossy(value)),
                })?;
            return Ok(Some(end));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let record = VcfLine::parse(b"chr1\t100\trs1\tA\tT,G\t30\tPASS\tDP=5").unwrap();
        assert_eq!(record.chrom, "chr1");
        assert_eq!(record.pos, 100);
        assert_eq!(record.id.as_deref(), Some("rs1"));
        assert_eq!(record.ref_allele, "A");
        assert_eq!(record.alt, vec!["T", "G"]);
        assert_eq!(record.qual, Some(30.0));
        assert_eq!(record.filter.as_deref(), Some("PASS"));
        assert_eq!(record.info, "DP=5");
    }

    #[test]
    fn test_parse_dots() {
        let record = VcfLine::parse(b"chr1\t100\t.\tA\t.\t.\t.\t.").unwrap();
        assert!(record.id.is_none());
        assert!(record.alt.is_empty());
        assert!(record.qual.is_none());
        assert!(record.filter.is_none());
    }

    #[test]
    fn test_end_from_ref_allele() {
        let record = VcfLine::parse(b"chr1\t100\t.\tACGT\tA\t.\t.\t.").unwrap();
        assert_eq!(record.end(), 103);
    }

    #[test]
    fn test_end_from_info_end() {
        let record = VcfLine::parse(b"chr1\t100\t.\tA\t<DEL>\t.\t.\tSVTYPE=DEL;END=5000").unwrap();
        assert_eq!(record.end(), 5000);
    }

    #[test]
    fn test_info_value_flags() {
        let record = VcfLine::parse(b"chr1\t100\t.\tA\tT\t.\t.\tDB;DP=5").unwrap();
        assert_eq!(record.info_value("DB"), Some(""));
        assert_eq!(record.info_value("DP"), Some("5"));
        assert_eq!(record.info_value("AF"), None);
    }

    #[test]
    fn test_too_few_columns_rejected() {
        let err = VcfLine::parse(b"chr1\t100\t.\tA").unwrap_err();
        assert!(matches!(err, TabfetchError::InvalidLine { .. }));
    }

    #[test]
    fn test_non_numeric_pos_rejected() {
        let err = VcfLine::parse(b"chr1\tabc\t.\tA\tT\t.\t.\t.").unwrap_err();
        assert!(err.to_string().contains("POS"));
    }

    #[test]
    fn test_info_end_helper() {
        assert_eq!(info_end(b"DP=5;END=120").unwrap(), Some(120));
        assert_eq!(info_end(b"DP=5").unwrap(), None);
        assert_eq!(info_end(b"ENDX=9").unwrap(), None);
        assert!(info_end(b"END=abc").is_err());
    }
}
