//! BGZF (Blocked GZip Format) block reader.
//!
//! BGZF files are a concatenation of independent gzip members, each holding
//! at most 64 KiB of uncompressed data. Every member carries a `BC` extra
//! subfield recording the member's total compressed size, which makes it
//! possible to jump from one block to the next without inflating anything.
//!
//! # Virtual File Offsets
//!
//! Because blocks are independent, a position in the decompressed stream can
//! be addressed with a 64-bit *virtual offset*:
//! - High 48 bits: compressed file offset of the block's first byte
//! - Low 16 bits: byte offset within the block's decompressed payload
//!
//! Virtual offsets order the same way the decompressed bytes do, so index
//! structures can store them directly.
//!
//! # Block Layout
//!
//! Each member is a standard gzip member:
//! - Bytes 0-1: magic `1f 8b`; byte 2: `08` (deflate); byte 3: FLG with
//!   FEXTRA set
//! - Bytes 4-11: MTIME, XFL, OS (ignored)
//! - Bytes 10-11: XLEN, total length of the extra field
//! - Extra subfields, one of which is `SI1='B'`, `SI2='C'`, `SLEN=2`,
//!   `BSIZE` (little-endian u16) = total block size minus 1
//! - Deflate stream, then CRC32 and ISIZE (4 bytes each)
//!
//! Other subfields may precede or follow `BC`, so the reader scans the whole
//! extra area rather than assuming a fixed position.
//!
//! # Example
//!
//! ```no_run
//! use tabfetch::io::bgzf::BgzfReader;
//! use std::fs::File;
//!
//! # fn main() -> tabfetch::Result<()> {
//! let mut reader = BgzfReader::new(File::open("variants.vcf.gz")?)?;
//!
//! // Decompress the block starting at compressed offset 0
//! let block = reader.read_block_at(0)?.expect("empty stream");
//! println!("{} bytes decompressed", block.data.len());
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, TabfetchError};
use flate2::read::DeflateDecoder;
use lru::LruCache;
use std::io::{self, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Maximum decompressed size of a single BGZF block
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Canonical 28-byte empty block marking end of a BGZF stream
pub const EOF_MARKER: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Fixed gzip header bytes up to and including XLEN
const FIXED_HEADER_LEN: usize = 12;

/// CRC32 + ISIZE trailer
const TAIL_LEN: usize = 8;

/// Decompressed blocks kept around for locality; one is enough for
/// correctness
const BLOCK_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(4) {
    Some(n) => n,
    None => panic!("block cache capacity must be non-zero"),
};

/// Virtual file offset into a BGZF stream.
///
/// A 64-bit value combining:
/// - Bits 63-16: compressed file offset of the containing block
/// - Bits 15-0: uncompressed offset within the block's payload
///
/// # Example
///
/// ```
/// use tabfetch::VirtualOffset;
///
/// let offset = VirtualOffset::new(1024, 512);
/// assert_eq!(offset.compressed_offset(), 1024);
/// assert_eq!(offset.uncompressed_offset(), 512);
/// assert_eq!(offset.as_raw(), (1024 << 16) | 512);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualOffset(u64);

impl VirtualOffset {
    /// Create a virtual offset from compressed and uncompressed components.
    pub fn new(compressed: u64, uncompressed: u16) -> Self {
        VirtualOffset((compressed << 16) | (uncompressed as u64))
    }

    /// Create from a raw 64-bit value.
    pub fn from_raw(value: u64) -> Self {
        VirtualOffset(value)
    }

    /// Get the raw 64-bit value.
    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// Compressed file offset of the containing block (high 48 bits).
    pub fn compressed_offset(self) -> u64 {
        self.0 >> 16
    }

    /// Uncompressed offset within the block's payload (low 16 bits).
    pub fn uncompressed_offset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

/// A half-open range `[start, end)` in the virtual stream.
///
/// Chunks are the unit of retrieval produced by index queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Virtual offset where the chunk starts
    pub start: VirtualOffset,
    /// Virtual offset where the chunk ends
    pub end: VirtualOffset,
}

impl Chunk {
    /// Create a new chunk.
    pub fn new(start: VirtualOffset, end: VirtualOffset) -> Self {
        Chunk { start, end }
    }
}

/// One decompressed BGZF block.
#[derive(Debug, Clone)]
pub struct BgzfBlock {
    /// Compressed file offset of the block's first byte
    pub coffset: u64,
    /// Decompressed payload, shared with the reader's cache
    pub data: Arc<Vec<u8>>,
    /// Total compressed size of the member, including header and trailer
    pub compressed_len: u64,
}

impl BgzfBlock {
    /// Compressed offset of the member immediately after this one.
    pub fn next_coffset(&self) -> u64 {
        self.coffset + self.compressed_len
    }

    /// Whether this is an end-of-stream marker (empty payload).
    pub fn is_eof(&self) -> bool {
        self.data.is_empty()
    }
}

/// Random-access reader over a BGZF stream.
///
/// Blocks are decompressed one at a time and verified against their CRC32
/// and ISIZE trailer. A small LRU cache of decompressed payloads avoids
/// re-inflating a block when consecutive reads land in it.
///
/// The reader is single-threaded; one query drives it at a time.
#[derive(Debug)]
pub struct BgzfReader<R> {
    inner: R,
    cache: LruCache<u64, BgzfBlock>,
}

impl<R: Read + Seek> BgzfReader<R> {
    /// Wrap a seekable byte source, verifying that it starts with a valid
    /// BGZF member.
    ///
    /// # Errors
    ///
    /// Returns [`TabfetchError::MalformedBlock`] if the stream is empty or
    /// its first member is not BGZF (plain gzip without the `BC` subfield
    /// is rejected here).
    pub fn new(inner: R) -> Result<Self> {
        let mut reader = BgzfReader {
            inner,
            cache: LruCache::new(BLOCK_CACHE_CAPACITY),
        };
        match reader.read_block_at(0)? {
            Some(_) => Ok(reader),
            None => Err(TabfetchError::MalformedBlock {
                offset: 0,
                msg: "empty stream".into(),
            }),
        }
    }

    /// Consume the reader, returning the underlying byte source.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read and decompress the block starting at `coffset`.
    ///
    /// Returns `Ok(None)` at clean end-of-stream (no bytes available at
    /// `coffset`). An empty EOF marker block is returned as a block with an
    /// empty payload; see [`BgzfBlock::is_eof`].
    ///
    /// # Errors
    ///
    /// Any header corruption, truncation, deflate failure, or CRC/ISIZE
    /// mismatch is a [`TabfetchError::MalformedBlock`].
    pub fn read_block_at(&mut self, coffset: u64) -> Result<Option<BgzfBlock>> {
        if let Some(block) = self.cache.get(&coffset) {
            return Ok(Some(block.clone()));
        }
        match self.load_block(coffset)? {
            Some(block) => {
                self.cache.put(coffset, block.clone());
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    /// Iterate blocks lazily, starting at `start_coffset`.
    ///
    /// Iteration ends cleanly at end-of-stream or at an EOF marker block.
    pub fn blocks(&mut self, start_coffset: u64) -> Blocks<'_, R> {
        Blocks {
            reader: self,
            coffset: start_coffset,
            finished: false,
        }
    }

    fn load_block(&mut self, coffset: u64) -> Result<Option<BgzfBlock>> {
        let malformed = |msg: String| TabfetchError::MalformedBlock {
            offset: coffset,
            msg,
        };

        self.inner.seek(SeekFrom::Start(coffset))?;

        let mut fixed = [0u8; FIXED_HEADER_LEN];
        let got = read_some(&mut self.inner, &mut fixed)?;
        if got == 0 {
            return Ok(None);
        }
        if got < FIXED_HEADER_LEN {
            return Err(malformed(format!(
                "truncated header, got {got} of {FIXED_HEADER_LEN} bytes"
            )));
        }

        if fixed[0] != 0x1f || fixed[1] != 0x8b {
            return Err(malformed(format!(
                "invalid gzip magic [{:#04x}, {:#04x}]",
                fixed[0], fixed[1]
            )));
        }
        if fixed[2] != 0x08 {
            return Err(malformed(format!("unsupported compression method {}", fixed[2])));
        }
        if fixed[3] & 0x04 == 0 {
            return Err(malformed("FEXTRA flag not set, not a BGZF member".into()));
        }

        let xlen = u16::from_le_bytes([fixed[10], fixed[11]]) as usize;
        let mut extra = vec![0u8; xlen];
        self.inner
            .read_exact(&mut extra)
            .map_err(|e| truncated(coffset, "extra field", e))?;

        let bsize = find_bsize(&extra)
            .ok_or_else(|| malformed("no BC subfield in extra field".into()))?;

        let block_size = bsize as usize + 1;
        let consumed = FIXED_HEADER_LEN + xlen;
        if block_size < consumed + TAIL_LEN {
            return Err(malformed(format!(
                "BSIZE {bsize} too small for a {consumed}-byte header"
            )));
        }

        let mut rest = vec![0u8; block_size - consumed];
        self.inner
            .read_exact(&mut rest)
            .map_err(|e| truncated(coffset, "compressed payload", e))?;

        let (cdata, tail) = rest.split_at(rest.len() - TAIL_LEN);
        let crc = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let isize = u32::from_le_bytes([tail[4], tail[5], tail[6], tail[7]]) as usize;
        if isize > MAX_BLOCK_SIZE {
            return Err(malformed(format!("ISIZE {isize} exceeds 64 KiB block limit")));
        }

        let mut data = Vec::with_capacity(isize);
        DeflateDecoder::new(cdata)
            .read_to_end(&mut data)
            .map_err(|e| malformed(format!("deflate failure: {e}")))?;

        if data.len() != isize {
            return Err(malformed(format!(
                "ISIZE mismatch: expected {isize}, decompressed {}",
                data.len()
            )));
        }
        if crc32fast::hash(&data) != crc {
            return Err(malformed("CRC32 mismatch".into()));
        }

        Ok(Some(BgzfBlock {
            coffset,
            data: Arc::new(data),
            compressed_len: block_size as u64,
        }))
    }
}

/// Iterator over consecutive BGZF blocks.
///
/// Created by [`BgzfReader::blocks`].
pub struct Blocks<'a, R> {
    reader: &'a mut BgzfReader<R>,
    coffset: u64,
    finished: bool,
}

impl<'a, R: Read + Seek> Iterator for Blocks<'a, R> {
    type Item = Result<BgzfBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.reader.read_block_at(self.coffset) {
            Ok(Some(block)) if !block.is_eof() => {
                self.coffset = block.next_coffset();
                Some(Ok(block))
            }
            Ok(_) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Scan the gzip extra field for the BC subfield and return BSIZE.
fn find_bsize(extra: &[u8]) -> Option<u16> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let si1 = extra[pos];
        let si2 = extra[pos + 1];
        let slen = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        if si1 == b'B' && si2 == b'C' && slen == 2 {
            if pos + 6 > extra.len() {
                return None;
            }
            return Some(u16::from_le_bytes([extra[pos + 4], extra[pos + 5]]));
        }
        pos += 4 + slen;
    }
    None
}

/// Read until the buffer is full or the source is exhausted.
fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

fn truncated(coffset: u64, what: &str, err: io::Error) -> TabfetchError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        TabfetchError::MalformedBlock {
            offset: coffset,
            msg: format!("truncated {what}"),
        }
    } else {
        TabfetchError::Io(err)
    }
}
