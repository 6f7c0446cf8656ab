//! TBI (Tabix) index decoding and chunk planning.
//!
//! A `.tbi` file is a BGZF-wrapped binary payload describing, per reference
//! sequence, a hierarchical binning index and a 16 kb linear index over a
//! coordinate-sorted, tab-delimited data file. Decoding produces an
//! immutable [`TbiIndex`] value that lives for the life of the opened file;
//! queries against it plan the minimal set of [`Chunk`]s to read.
//!
//! # Payload Layout
//!
//! Little-endian throughout:
//!
//! - Magic `"TBI\1"`
//! - `n_ref` (i32)
//! - `format`, `col_seq`, `col_beg`, `col_end`, `meta`, `skip` (i32 each)
//! - `l_nm` (i32), then `l_nm` bytes of NUL-terminated reference names
//! - Per reference: `n_bin`, then per bin `bin_id` (u32), `n_chunk` and
//!   `n_chunk` pairs of u64 virtual offsets; then `n_intv` and `n_intv`
//!   u64 linear-index offsets
//!
//! Bin id 37450 is a pseudo-bin carrying mapped/unmapped statistics rather
//! than query targets; it is decoded into [`ReferenceStats`].
//!
//! # Example
//!
//! ```no_run
//! use tabfetch::TbiIndex;
//!
//! # fn main() -> tabfetch::Result<()> {
//! let index = TbiIndex::from_path("variants.vcf.gz.tbi")?;
//! println!("references: {}", index.references().len());
//!
//! // Plan chunks for chr1 [1_000_000, 2_000_000), zero-based half-open
//! let chunks = index.query("chr1", 1_000_000, 2_000_000);
//! println!("{} chunks to read", chunks.len());
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, TabfetchError};
use crate::formats::index::bins;
use crate::io::bgzf::{Chunk, VirtualOffset};
use flate2::read::MultiGzDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// TBI file magic
const TBI_MAGIC: &[u8; 4] = b"TBI\x01";

/// Coordinate presets recognized by tabix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TbiFormat {
    /// Generic tab-delimited file with explicit begin and end columns
    Generic = 0,
    /// SAM preset; treated as a one-base span per line
    Sam = 1,
    /// VCF preset; end derived from the REF allele and INFO/END
    Vcf = 2,
}

impl TbiFormat {
    fn from_low_bits(value: i32) -> Result<Self> {
        match value {
            0 => Ok(TbiFormat::Generic),
            1 => Ok(TbiFormat::Sam),
            2 => Ok(TbiFormat::Vcf),
            _ => Err(TabfetchError::MalformedIndex {
                msg: format!("unknown format preset {value}"),
            }),
        }
    }
}

/// Mapped/unmapped record statistics from the pseudo-bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceStats {
    /// Virtual-offset span of the reference's records
    pub span: Chunk,
    /// Number of mapped records
    pub mapped: u64,
    /// Number of unmapped records
    pub unmapped: u64,
}

/// Index data for one reference sequence.
#[derive(Debug, Clone)]
pub struct TbiReference {
    name: String,
    bins: HashMap<u32, Vec<Chunk>>,
    intervals: Vec<VirtualOffset>,
    stats: Option<ReferenceStats>,
}

impl TbiReference {
    /// Reference sequence name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Chunks stored for one bin, if the bin is present.
    pub fn bin_chunks(&self, bin_id: u32) -> Option<&[Chunk]> {
        self.bins.get(&bin_id).map(Vec::as_slice)
    }

    /// Linear index: per 16 kb window, the smallest virtual offset of any
    /// record overlapping that window. Holes are forward-filled at decode.
    pub fn intervals(&self) -> &[VirtualOffset] {
        &self.intervals
    }

    /// Pseudo-bin statistics, when the writer recorded them.
    pub fn stats(&self) -> Option<&ReferenceStats> {
        self.stats.as_ref()
    }

    /// Lower bound on where records overlapping `begin` can start.
    ///
    /// Zero (no bound) when the window lies beyond the linear index, so the
    /// linear index can never cause a record to be skipped.
    pub fn min_offset(&self, begin: u64) -> VirtualOffset {
        self.intervals
            .get(bins::window_for_pos(begin))
            .copied()
            .unwrap_or(VirtualOffset::from_raw(0))
    }
}

/// In-memory tabix index.
///
/// Immutable once decoded. The query path combines the binning tree with
/// the linear index to produce a coalesced, ordered chunk plan.
#[derive(Debug, Clone)]
pub struct TbiIndex {
    preset: TbiFormat,
    zero_based: bool,
    col_seq: u32,
    col_beg: u32,
    col_end: u32,
    meta: u8,
    skip: u32,
    references: Vec<TbiReference>,
    ref_map: HashMap<String, usize>,
}

impl TbiIndex {
    /// Decode an index from any byte stream.
    ///
    /// The stream is materialized in memory first (indexes are small). Both
    /// BGZF/gzip-compressed and raw payloads are accepted; compression is
    /// sniffed from the gzip magic.
    ///
    /// # Errors
    ///
    /// [`TabfetchError::MalformedIndex`] on bad magic, truncation, counts
    /// that overflow the payload, duplicate bins, or undocumented format
    /// bits. No partial index is returned.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;

        if raw.starts_with(&[0x1f, 0x8b]) {
            let mut payload = Vec::new();
            MultiGzDecoder::new(&raw[..])
                .read_to_end(&mut payload)
                .map_err(|e| TabfetchError::MalformedIndex {
                    msg: format!("index decompression failed: {e}"),
                })?;
            Self::parse(&payload)
        } else {
            Self::parse(&raw)
        }
    }

    /// Load an index from a `.tbi` file on disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    fn parse(payload: &[u8]) -> Result<Self> {
        let mut p = Payload::new(payload);

        let magic = p.take(4)?;
        if magic != TBI_MAGIC {
            return Err(TabfetchError::MalformedIndex {
                msg: format!("bad magic {magic:?}"),
            });
        }

        let n_ref = p.count("n_ref")?;
        let format = p.i32()?;
        let preset = TbiFormat::from_low_bits(format & 0xffff)?;
        let zero_based = format & 0x10000 != 0;
        if format as u32 & !0x1_ffff != 0 {
            return Err(TabfetchError::MalformedIndex {
                msg: format!("undocumented format bits {format:#x}"),
            });
        }

        let col_seq = p.count("col_seq")? as u32;
        let col_beg = p.count("col_beg")? as u32;
        let col_end = p.count("col_end")? as u32;
        if col_seq == 0 || col_beg == 0 {
            return Err(TabfetchError::MalformedIndex {
                msg: "col_seq and col_beg must be set".into(),
            });
        }
        let meta = (p.i32()? & 0xff) as u8;
        let skip = p.count("skip")? as u32;

        let l_nm = p.count("l_nm")?;
        let names = parse_names(p.take(l_nm as usize)?)?;
        if names.len() != n_ref as usize {
            return Err(TabfetchError::MalformedIndex {
                msg: format!("{n_ref} references declared but {} names found", names.len()),
            });
        }

        let mut references = Vec::with_capacity(names.len());
        let mut ref_map = HashMap::with_capacity(names.len());
        for (idx, name) in names.into_iter().enumerate() {
            let reference = parse_reference(&mut p, name)?;
            ref_map.insert(reference.name.clone(), idx);
            references.push(reference);
        }
        if ref_map.len() != references.len() {
            return Err(TabfetchError::MalformedIndex {
                msg: "duplicate reference name".into(),
            });
        }

        log::debug!(
            "decoded tabix index: {} references, preset {:?}",
            references.len(),
            preset
        );

        Ok(TbiIndex {
            preset,
            zero_based,
            col_seq,
            col_beg,
            col_end,
            meta,
            skip,
            references,
            ref_map,
        })
    }

    /// Coordinate preset of the indexed file.
    pub fn preset(&self) -> TbiFormat {
        self.preset
    }

    /// Whether data-line coordinates are zero-based half-open (bit 16 of
    /// `format`).
    pub fn zero_based(&self) -> bool {
        self.zero_based
    }

    /// 1-based column holding the reference name.
    pub fn col_seq(&self) -> u32 {
        self.col_seq
    }

    /// 1-based column holding the begin position.
    pub fn col_beg(&self) -> u32 {
        self.col_beg
    }

    /// 1-based column holding the end position; 0 when the file has none.
    pub fn col_end(&self) -> u32 {
        self.col_end
    }

    /// Lines starting with this byte are metadata and skipped.
    pub fn meta_byte(&self) -> u8 {
        self.meta
    }

    /// Number of initial data-file lines skipped unconditionally.
    pub fn skip_lines(&self) -> u32 {
        self.skip
    }

    /// All references, in the order they were indexed (`ref_id` order).
    pub fn references(&self) -> &[TbiReference] {
        &self.references
    }

    /// Position of a reference name in the index, if present.
    pub fn reference_id(&self, name: &str) -> Option<usize> {
        self.ref_map.get(name).copied()
    }

    /// Look up a reference by name.
    pub fn get_reference(&self, name: &str) -> Option<&TbiReference> {
        self.ref_map.get(name).map(|&idx| &self.references[idx])
    }

    /// Plan the chunks to read for `[begin, end)` on `ref_name`, zero-based
    /// half-open.
    ///
    /// Candidate bins come from the binning tree; chunks whose end precedes
    /// the linear-index lower bound are dropped; the survivors are sorted
    /// and coalesced. The result is non-overlapping and ordered. An unknown
    /// reference or an empty interval yields an empty plan.
    pub fn query(&self, ref_name: &str, begin: u64, end: u64) -> Vec<Chunk> {
        let Some(reference) = self.get_reference(ref_name) else {
            return Vec::new();
        };
        if begin >= end {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        for bin_id in bins::bins_for_interval(begin, end) {
            if let Some(found) = reference.bin_chunks(bin_id) {
                chunks.extend_from_slice(found);
            }
        }

        let min_offset = reference.min_offset(begin);
        chunks.retain(|c| c.end > min_offset);
        chunks.sort_by_key(|c| c.start);
        let merged = merge_chunks(chunks);

        log::debug!(
            "query {ref_name}:{begin}-{end}: {} chunks after coalescing",
            merged.len()
        );
        merged
    }
}

/// Merge overlapping or touching chunks of a sorted list.
fn merge_chunks(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match merged.last_mut() {
            Some(last) if chunk.start <= last.end => {
                if chunk.end > last.end {
                    last.end = chunk.end;
                }
            }
            _ => merged.push(chunk),
        }
    }
    merged
}

/// Replace zero holes with the nearest following non-zero entry.
///
/// The writer records 0 for windows it never saw a record for; a decoder
/// that used those directly would read from the start of the file. The
/// fix-up is idempotent.
fn forward_fill(intervals: &mut [VirtualOffset]) {
    let mut next = VirtualOffset::from_raw(0);
    for entry in intervals.iter_mut().rev() {
        if entry.as_raw() == 0 {
            *entry = next;
        } else {
            next = *entry;
        }
    }
}

fn parse_reference(p: &mut Payload<'_>, name: String) -> Result<TbiReference> {
    let n_bin = p.count("n_bin")?;
    let mut bin_map: HashMap<u32, Vec<Chunk>> = HashMap::with_capacity(n_bin as usize);
    let mut stats = None;

    for _ in 0..n_bin {
        let bin_id = p.u32()?;
        let n_chunk = p.count("n_chunk")?;
        p.ensure(n_chunk as usize * 16, "chunk list")?;

        let mut chunks = Vec::with_capacity(n_chunk as usize);
        for _ in 0..n_chunk {
            let start = VirtualOffset::from_raw(p.u64()?);
            let end = VirtualOffset::from_raw(p.u64()?);
            chunks.push(Chunk::new(start, end));
        }

        if bin_id == bins::PSEUDO_BIN {
            if chunks.len() == 2 {
                stats = Some(ReferenceStats {
                    span: chunks[0],
                    mapped: chunks[1].start.as_raw(),
                    unmapped: chunks[1].end.as_raw(),
                });
            } else {
                log::warn!(
                    "reference {name}: pseudo-bin has {} chunks, expected 2; ignoring",
                    chunks.len()
                );
            }
            continue;
        }

        if bin_map.insert(bin_id, chunks).is_some() {
            return Err(TabfetchError::MalformedIndex {
                msg: format!("duplicate bin {bin_id} in reference {name}"),
            });
        }
    }

    let n_intv = p.count("n_intv")?;
    p.ensure(n_intv as usize * 8, "linear index")?;
    let mut intervals = Vec::with_capacity(n_intv as usize);
    for _ in 0..n_intv {
        intervals.push(VirtualOffset::from_raw(p.u64()?));
    }
    forward_fill(&mut intervals);

    Ok(TbiReference {
        name,
        bins: bin_map,
        intervals,
        stats,
    })
}

/// Split the NUL-separated name block into owned strings.
fn parse_names(buf: &[u8]) -> Result<Vec<String>> {
    if !buf.is_empty() && buf.last() != Some(&0) {
        return Err(TabfetchError::MalformedIndex {
            msg: "reference names not NUL-terminated".into(),
        });
    }
    buf.split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| {
            std::str::from_utf8(s)
                .map(str::to_owned)
                .map_err(|_| TabfetchError::MalformedIndex {
                    msg: "reference name is not valid UTF-8".into(),
                })
        })
        .collect()
}

/// Bounds-checked cursor over the decompressed index payload.
struct Payload<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Payload<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Payload { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n, "payload")?;
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn ensure(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.len() - self.pos < n {
            return Err(TabfetchError::MalformedIndex {
                msg: format!(
                    "truncated {what}: need {n} bytes, {} remain",
                    self.buf.len() - self.pos
                ),
            });
        }
        Ok(())
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// An i32 field that must be non-negative
    fn count(&mut self, what: &str) -> Result<i32> {
        let v = self.i32()?;
        if v < 0 {
            return Err(TabfetchError::MalformedIndex {
                msg: format!("negative {what}: {v}"),
            });
        }
        Ok(v)
    }
}
