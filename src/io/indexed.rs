//! Indexed random-access reading of tabix-indexed files.
//!
//! [`IndexedReader`] pairs a BGZF data file with its decoded [`TbiIndex`]
//! and answers region queries without scanning the whole file. A query
//! plans a coalesced set of virtual-offset chunks, drives the block reader
//! through them, reassembles lines across block and chunk boundaries, and
//! yields the lines whose span intersects the query interval.
//!
//! Lines come back lazily, in file order, as owned byte vectors; dropping
//! the iterator cancels the query. Coordinates passed to [`fetch`] are
//! 1-based inclusive on `begin` and half-open on `end`; the engine
//! normalizes internally to the index's zero-based convention.
//!
//! [`fetch`]: IndexedReader::fetch
//!
//! # Example
//!
//! ```no_run
//! use tabfetch::IndexedReader;
//!
//! # fn main() -> tabfetch::Result<()> {
//! let mut reader = IndexedReader::from_paths("variants.vcf.gz", "variants.vcf.gz.tbi")?;
//!
//! for line in reader.fetch("chr1", 1_000_000, 2_000_000) {
//!     let line = line?;
//!     println!("{}", String::from_utf8_lossy(&line));
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, TabfetchError};
use crate::formats::index::{TbiFormat, TbiIndex};
use crate::formats::vcf::{self, VcfLine};
use crate::io::bgzf::{BgzfReader, Chunk, VirtualOffset};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// Random-access reader over a BGZF data file plus its tabix index.
///
/// One query owns the reader for its duration; start the next `fetch` after
/// the previous iterator is dropped. The index is immutable and shared by
/// every query on the handle.
pub struct IndexedReader<R> {
    bgzf: BgzfReader<R>,
    index: TbiIndex,
}

impl<R: Read + Seek> IndexedReader<R> {
    /// Pair a seekable BGZF data handle with an already-decoded index.
    ///
    /// # Errors
    ///
    /// [`TabfetchError::MalformedBlock`] if the data handle does not start
    /// with a valid BGZF member.
    pub fn new(data: R, index: TbiIndex) -> Result<Self> {
        Ok(IndexedReader {
            bgzf: BgzfReader::new(data)?,
            index,
        })
    }

    /// Open from a data handle and a raw `.tbi` byte stream.
    pub fn from_readers<I: Read>(data: R, index: I) -> Result<Self> {
        let index = TbiIndex::from_reader(index)?;
        Self::new(data, index)
    }

    /// The decoded index.
    pub fn index(&self) -> &TbiIndex {
        &self.index
    }

    /// Reference names, in the order they were indexed.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.index.references().iter().map(|r| r.name())
    }

    /// Fetch the data lines intersecting `[begin, end)` on `ref_name`.
    ///
    /// `begin` is 1-based inclusive and `end` half-open, matching the
    /// common tabix command-line convention. An unknown reference or an
    /// empty interval yields an empty iterator, not an error.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tabfetch::IndexedReader;
    ///
    /// # fn main() -> tabfetch::Result<()> {
    /// let mut reader = IndexedReader::from_paths("variants.vcf.gz", "variants.vcf.gz.tbi")?;
    /// // Only the record starting at position 100
    /// for line in reader.fetch("chr1", 100, 101) {
    ///     println!("{}", String::from_utf8_lossy(&line?));
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn fetch(&mut self, ref_name: &str, begin: u64, end: u64) -> Lines<'_, R> {
        // External convention is 1-based; the index and bin arithmetic are
        // zero-based half-open
        let begin = begin.saturating_sub(1);
        let end = end.saturating_sub(1);
        let plan = if begin < end {
            self.index.query(ref_name, begin, end)
        } else {
            Vec::new()
        };

        let cfg = LineConfig {
            preset: self.index.preset(),
            zero_based: self.index.zero_based(),
            col_seq: self.index.col_seq() as usize,
            col_beg: self.index.col_beg() as usize,
            col_end: self.index.col_end() as usize,
            meta: self.index.meta_byte(),
            skip: self.index.skip_lines() as u64,
        };

        // Skip-count bookkeeping only applies when the plan starts at the
        // head of the file; elsewhere the first `skip` lines are long gone
        let file_lines_seen = match plan.first() {
            Some(chunk) if chunk.start.as_raw() == 0 => Some(0),
            _ => None,
        };
        let cursor = plan.first().map(|c| c.start).unwrap_or(VirtualOffset::from_raw(0));

        Lines {
            bgzf: &mut self.bgzf,
            cfg,
            ref_name: ref_name.to_owned(),
            begin,
            end,
            plan,
            chunk_i: 0,
            cursor,
            pending: Vec::new(),
            file_lines_seen,
            overflowed: false,
            done: false,
        }
    }

    /// Like [`fetch`](IndexedReader::fetch), with each line handed to the
    /// VCF tokenizer.
    pub fn fetch_vcf(&mut self, ref_name: &str, begin: u64, end: u64) -> VcfLines<'_, R> {
        VcfLines {
            lines: self.fetch(ref_name, begin, end),
        }
    }

    /// Read the raw bytes of an arbitrary virtual-offset range.
    ///
    /// For callers that plan their own chunks (for example from
    /// [`TbiIndex::query`]); `fetch` is the line-oriented equivalent.
    pub fn read_virtual(&mut self, chunk: &Chunk) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut cursor = chunk.start;
        while cursor < chunk.end {
            let Some(block) = self.bgzf.read_block_at(cursor.compressed_offset())? else {
                break;
            };
            if block.is_eof() {
                break;
            }
            let uoff = cursor.uncompressed_offset() as usize;
            if cursor.compressed_offset() == chunk.end.compressed_offset() {
                let take = (chunk.end.uncompressed_offset() as usize).min(block.data.len());
                if uoff < take {
                    out.extend_from_slice(&block.data[uoff..take]);
                }
                break;
            }
            if uoff < block.data.len() {
                out.extend_from_slice(&block.data[uoff..]);
            }
            cursor = VirtualOffset::new(block.next_coffset(), 0);
        }
        Ok(out)
    }
}

impl IndexedReader<BufReader<File>> {
    /// Open a data file and its `.tbi` companion from disk.
    pub fn from_paths<P: AsRef<Path>, Q: AsRef<Path>>(data: P, index: Q) -> Result<Self> {
        let index = TbiIndex::from_path(index)?;
        Self::new(BufReader::new(File::open(data)?), index)
    }
}

/// Line-interpretation parameters lifted out of the index header
struct LineConfig {
    preset: TbiFormat,
    zero_based: bool,
    col_seq: usize,
    col_beg: usize,
    col_end: usize,
    meta: u8,
    skip: u64,
}

/// What to do with one reassembled line
enum Step {
    Emit(Vec<u8>),
    Skip,
    Stop,
}

/// Lazy iterator over matching data lines, created by
/// [`IndexedReader::fetch`].
///
/// Yields owned byte vectors (without the trailing newline) in file order.
/// Dropping the iterator abandons the query; no state outlives it beyond
/// the reader's block cache.
pub struct Lines<'a, R> {
    bgzf: &'a mut BgzfReader<R>,
    cfg: LineConfig,
    ref_name: String,
    /// Query interval, zero-based half-open
    begin: u64,
    end: u64,
    plan: Vec<Chunk>,
    chunk_i: usize,
    cursor: VirtualOffset,
    /// Decompressed bytes not yet split into lines
    pending: Vec<u8>,
    /// Raw line counter from the head of the file, for `skip`; `None` when
    /// the plan starts mid-file
    file_lines_seen: Option<u64>,
    /// A line ran past the current chunk's end and is being completed
    overflowed: bool,
    done: bool,
}

impl<'a, R: Read + Seek> Iterator for Lines<'a, R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some(nl) = self.pending.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.pending.drain(..=nl).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if self.overflowed {
                    // Everything after the completed line lies beyond the
                    // planned chunk; the next chunk is read from its own
                    // start
                    self.pending.clear();
                    self.overflowed = false;
                    self.advance_chunk();
                }
                match self.handle_line(line) {
                    Ok(Step::Emit(line)) => return Some(Ok(line)),
                    Ok(Step::Skip) => continue,
                    Ok(Step::Stop) => {
                        self.done = true;
                        return None;
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }

            match self.refill() {
                Ok(true) => continue,
                Ok(false) => {
                    // Stream exhausted; a final line may lack its newline
                    self.done = true;
                    if self.pending.is_empty() {
                        return None;
                    }
                    let line = std::mem::take(&mut self.pending);
                    return match self.handle_line(line) {
                        Ok(Step::Emit(line)) => Some(Ok(line)),
                        Ok(_) => None,
                        Err(e) => Some(Err(e)),
                    };
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<'a, R: Read + Seek> Lines<'a, R> {
    /// Pull more decompressed bytes into `pending`. Returns `Ok(false)`
    /// when neither the plan nor the stream has anything left.
    fn refill(&mut self) -> Result<bool> {
        loop {
            if self.overflowed {
                return self.read_block_unbounded();
            }
            let Some(chunk) = self.plan.get(self.chunk_i).copied() else {
                return Ok(false);
            };
            if self.cursor >= chunk.end {
                if !self.pending.is_empty() {
                    // The index guarantees a matching record begins before
                    // chunk.end; its tail may extend past it, so keep
                    // reading for this record only
                    self.overflowed = true;
                    continue;
                }
                self.advance_chunk();
                continue;
            }

            let coffset = self.cursor.compressed_offset();
            let Some(block) = self.bgzf.read_block_at(coffset)? else {
                return Ok(false);
            };
            if block.is_eof() {
                return Ok(false);
            }

            let uoff = self.cursor.uncompressed_offset() as usize;
            let ends_here = coffset == chunk.end.compressed_offset();
            let take = if ends_here {
                (chunk.end.uncompressed_offset() as usize).min(block.data.len())
            } else {
                block.data.len()
            };
            let appended = uoff < take;
            if appended {
                self.pending.extend_from_slice(&block.data[uoff..take]);
            }
            self.cursor = if ends_here {
                chunk.end
            } else {
                VirtualOffset::new(block.next_coffset(), 0)
            };
            if appended {
                return Ok(true);
            }
        }
    }

    /// One whole block past the chunk boundary, to finish a partial line.
    fn read_block_unbounded(&mut self) -> Result<bool> {
        let coffset = self.cursor.compressed_offset();
        match self.bgzf.read_block_at(coffset)? {
            Some(block) if !block.is_eof() => {
                let uoff = self.cursor.uncompressed_offset() as usize;
                if uoff < block.data.len() {
                    self.pending.extend_from_slice(&block.data[uoff..]);
                }
                self.cursor = VirtualOffset::new(block.next_coffset(), 0);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn advance_chunk(&mut self) {
        self.chunk_i += 1;
        if let Some(chunk) = self.plan.get(self.chunk_i) {
            self.cursor = chunk.start;
        }
    }

    /// Classify one complete line against the query.
    fn handle_line(&mut self, line: Vec<u8>) -> Result<Step> {
        if let Some(seen) = self.file_lines_seen.as_mut() {
            let line_no = *seen;
            *seen += 1;
            if line_no < self.cfg.skip {
                return Ok(Step::Skip);
            }
        }
        if line.is_empty() {
            return Ok(Step::Skip);
        }
        if line[0] == self.cfg.meta {
            return Ok(Step::Skip);
        }

        let fields: Vec<&[u8]> = line.split(|&b| b == b'\t').collect();
        let needed = self.cfg.col_seq.max(self.cfg.col_beg).max(self.cfg.col_end);
        if fields.len() < needed {
            return Err(TabfetchError::InvalidLine {
                msg: format!(
                    "expected at least {needed} tab-separated columns, found {}",
                    fields.len()
                ),
            });
        }

        if fields[self.cfg.col_seq - 1] != self.ref_name.as_bytes() {
            return Ok(Step::Skip);
        }

        let begin_raw = parse_coord(fields[self.cfg.col_beg - 1], "begin")?;
        let line_begin = if self.cfg.zero_based {
            begin_raw
        } else {
            begin_raw.saturating_sub(1)
        };
        if line_begin >= self.end {
            // Records are position-sorted, so nothing further can match
            return Ok(Step::Stop);
        }

        let line_end = self.line_end(&fields, line_begin)?;
        if line_end > self.begin {
            Ok(Step::Emit(line))
        } else {
            Ok(Step::Skip)
        }
    }

    /// Zero-based half-open end of a line's span, per the index preset.
    fn line_end(&self, fields: &[&[u8]], line_begin: u64) -> Result<u64> {
        match self.cfg.preset {
            TbiFormat::Vcf => {
                if let Some(info) = fields.get(7) {
                    // INFO/END is 1-based inclusive, which equals the
                    // zero-based half-open end
                    if let Some(end) = vcf::info_end(info)? {
                        return Ok(end);
                    }
                }
                let ref_len = fields
                    .get(3)
                    .map(|f| f.len() as u64)
                    .filter(|&l| l > 0)
                    .unwrap_or(1);
                Ok(line_begin + ref_len)
            }
            TbiFormat::Sam => Ok(line_begin + 1),
            TbiFormat::Generic => {
                if self.cfg.col_end > 0 {
                    parse_coord(fields[self.cfg.col_end - 1], "end")
                } else {
                    Ok(line_begin + 1)
                }
            }
        }
    }
}

/// Iterator of tokenized VCF records, created by
/// [`IndexedReader::fetch_vcf`].
pub struct VcfLines<'a, R> {
    lines: Lines<'a, R>,
}

impl<'a, R: Read + Seek> Iterator for VcfLines<'a, R> {
    type Item = Result<VcfLine>;

    fn next(&mut self) -> Option<Self::Item> {
        self.lines
            .next()
            .map(|line| line.and_then(|line| VcfLine::parse(&line)))
    }
}

fn parse_coord(field: &[u8], what: &str) -> Result<u64> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TabfetchError::InvalidLine {
            msg: format!(
                "non-numeric {what} coordinate {:?}",
                String::from_utf8_lossy(field)
            ),
        })
}
