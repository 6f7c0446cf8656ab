//! End-to-end region query tests over synthetic BGZF data and TBI indexes.
//!
//! Fixtures are built block-by-block so every record's virtual offset is
//! known exactly, which lets the index side be written byte-for-byte.

use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use tabfetch::formats::index::bins;
use tabfetch::io::bgzf::EOF_MARKER;
use tabfetch::{Chunk, IndexedReader, VirtualOffset};

/// Build one BGZF member around `payload`
fn bgzf_block(payload: &[u8]) -> Vec<u8> {
    let mut deflate = DeflateEncoder::new(Vec::new(), Compression::default());
    deflate.write_all(payload).unwrap();
    let cdata = deflate.finish().unwrap();

    let mut block = vec![
        0x1f, 0x8b, 0x08, 0x04, // magic, deflate, FEXTRA
        0, 0, 0, 0, // MTIME
        0, 0xff, // XFL, OS
    ];
    block.extend_from_slice(&6u16.to_le_bytes()); // XLEN
    block.extend_from_slice(b"BC");
    block.extend_from_slice(&2u16.to_le_bytes());
    let bsize_pos = block.len();
    block.extend_from_slice(&0u16.to_le_bytes());
    block.extend_from_slice(&cdata);
    block.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    block.extend_from_slice(&(payload.len() as u32).to_le_bytes());

    let bsize = (block.len() - 1) as u16;
    block[bsize_pos..bsize_pos + 2].copy_from_slice(&bsize.to_le_bytes());
    block
}

type BinList = Vec<(u32, Vec<(u64, u64)>)>;

/// Raw TBI image builder
fn build_tbi(
    format: i32,
    cols: (i32, i32, i32),
    skip: i32,
    refs: &[(&str, BinList, Vec<u64>)],
) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"TBI\x01");
    data.extend_from_slice(&(refs.len() as i32).to_le_bytes());
    data.extend_from_slice(&format.to_le_bytes());
    data.extend_from_slice(&cols.0.to_le_bytes());
    data.extend_from_slice(&cols.1.to_le_bytes());
    data.extend_from_slice(&cols.2.to_le_bytes());
    data.extend_from_slice(&(b'#' as i32).to_le_bytes());
    data.extend_from_slice(&skip.to_le_bytes());

    let mut names = Vec::new();
    for (name, _, _) in refs {
        names.extend_from_slice(name.as_bytes());
        names.push(0);
    }
    data.extend_from_slice(&(names.len() as i32).to_le_bytes());
    data.extend_from_slice(&names);

    for (_, bin_list, intervals) in refs {
        data.extend_from_slice(&(bin_list.len() as i32).to_le_bytes());
        for (bin_id, chunks) in bin_list {
            data.extend_from_slice(&bin_id.to_le_bytes());
            data.extend_from_slice(&(chunks.len() as i32).to_le_bytes());
            for (start, end) in chunks {
                data.extend_from_slice(&start.to_le_bytes());
                data.extend_from_slice(&end.to_le_bytes());
            }
        }
        data.extend_from_slice(&(intervals.len() as i32).to_le_bytes());
        for v in intervals {
            data.extend_from_slice(&v.to_le_bytes());
        }
    }
    data
}

struct Fixture {
    data: Vec<u8>,
    tbi: Vec<u8>,
    /// Per record: its virtual-offset chunk in the data file
    chunks: Vec<(u64, u64)>,
    /// Per record: the raw line, without newline
    lines: Vec<Vec<u8>>,
}

/// One BGZF block per line: header lines (if any) share block 0, every
/// record gets its own block, so chunk and linear-index values are exact.
fn fixture(
    format: i32,
    cols: (i32, i32, i32),
    skip: i32,
    header: &[&str],
    records: &[&str],
) -> Fixture {
    let col_beg = cols.1 as usize;
    let mut data = Vec::new();
    if !header.is_empty() {
        let mut block = Vec::new();
        for line in header {
            block.extend_from_slice(line.as_bytes());
            block.push(b'\n');
        }
        data.extend_from_slice(&bgzf_block(&block));
    }

    let mut chunks = Vec::new();
    let mut lines = Vec::new();
    let mut bin_map: BTreeMap<u32, Vec<(u64, u64)>> = BTreeMap::new();
    let mut linear: Vec<u64> = Vec::new();

    for line in records {
        let start = (data.len() as u64) << 16;
        let mut block = line.as_bytes().to_vec();
        block.push(b'\n');
        data.extend_from_slice(&bgzf_block(&block));
        let end = (data.len() as u64) << 16;

        let pos: u64 = line
            .split('\t')
            .nth(col_beg - 1)
            .and_then(|f| f.parse().ok())
            .expect("record position");
        let pos0 = pos - 1;
        bin_map.entry(bins::bin_for_pos(pos0)).or_default().push((start, end));

        let window = (pos0 >> 14) as usize;
        if linear.len() <= window {
            linear.resize(window + 1, 0);
        }
        if linear[window] == 0 || start < linear[window] {
            linear[window] = start;
        }

        chunks.push((start, end));
        lines.push(line.as_bytes().to_vec());
    }
    data.extend_from_slice(&EOF_MARKER);

    let bin_list: BinList = bin_map.into_iter().collect();
    let tbi = build_tbi(format, cols, skip, &[("chr1", bin_list, linear)]);
    Fixture {
        data,
        tbi,
        chunks,
        lines,
    }
}

fn vcf_fixture(records: &[&str]) -> Fixture {
    fixture(
        2,
        (1, 2, 0),
        0,
        &["##fileformat=VCFv4.2", "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO"],
        records,
    )
}

fn open(f: &Fixture) -> IndexedReader<Cursor<Vec<u8>>> {
    IndexedReader::from_readers(Cursor::new(f.data.clone()), &f.tbi[..]).unwrap()
}

fn fetch_all(reader: &mut IndexedReader<Cursor<Vec<u8>>>, begin: u64, end: u64) -> Vec<Vec<u8>> {
    reader
        .fetch("chr1", begin, end)
        .collect::<tabfetch::Result<Vec<_>>>()
        .unwrap()
}

const SEED_RECORDS: [&str; 4] = [
    "chr1\t100\trs1\tA\tT\t.\tPASS\t.",
    "chr1\t200\trs2\tC\tG\t.\tPASS\t.",
    "chr1\t1000000\trs3\tG\tA\t.\tPASS\t.",
    "chr1\t2000000\trs4\tT\tC\t.\tPASS\t.",
];

#[test]
fn test_fetch_inner_region_returns_single_record() {
    let f = vcf_fixture(&SEED_RECORDS);
    let mut reader = open(&f);

    let got = fetch_all(&mut reader, 150, 999_999);
    assert_eq!(got, vec![f.lines[1].clone()]);
}

#[test]
fn test_fetch_point_query_begin_is_inclusive() {
    let f = vcf_fixture(&SEED_RECORDS);
    let mut reader = open(&f);

    let got = fetch_all(&mut reader, 100, 101);
    assert_eq!(got, vec![f.lines[0].clone()]);
}

#[test]
fn test_fetch_unknown_reference_is_empty() {
    let f = vcf_fixture(&SEED_RECORDS);
    let mut reader = open(&f);

    let got: Vec<_> = reader
        .fetch("chrX", 1, 1_000_000)
        .collect::<tabfetch::Result<Vec<_>>>()
        .unwrap();
    assert!(got.is_empty());
}

#[test]
fn test_fetch_empty_interval_is_empty() {
    let f = vcf_fixture(&SEED_RECORDS);
    let mut reader = open(&f);

    assert!(fetch_all(&mut reader, 500, 500).is_empty());
    assert!(fetch_all(&mut reader, 500, 400).is_empty());
}

#[test]
fn test_whole_reference_matches_full_scan() {
    let f = vcf_fixture(&SEED_RECORDS);
    let mut reader = open(&f);

    let got = fetch_all(&mut reader, 1, 1 << 29);
    assert_eq!(got, f.lines);
}

#[test]
fn test_consecutive_queries_on_one_handle() {
    let f = vcf_fixture(&SEED_RECORDS);
    let mut reader = open(&f);

    assert_eq!(fetch_all(&mut reader, 150, 999_999).len(), 1);
    assert_eq!(fetch_all(&mut reader, 1, 1 << 29).len(), 4);
    assert_eq!(fetch_all(&mut reader, 1_999_999, 2_000_001).len(), 1);
}

#[test]
fn test_skip_lines_counted_from_file_start() {
    // No meta prefix on the first two lines; they are excluded by `skip`
    let f = fixture(
        2,
        (1, 2, 0),
        2,
        &[],
        &[
            "chr1\t100\t.\tA\tT\t.\t.\t.",
            "chr1\t200\t.\tC\tG\t.\t.\t.",
            "chr1\t300\t.\tG\tA\t.\t.\t.",
        ],
    );
    let mut reader = open(&f);

    let got = fetch_all(&mut reader, 1, 1000);
    assert_eq!(got, vec![f.lines[2].clone()]);
}

#[test]
fn test_meta_lines_inside_chunk_skipped() {
    // Headers and the record share block 0, and the chunk starts at virtual
    // offset 0, so the engine sees the meta lines
    let mut body = Vec::new();
    for line in [
        "##fileformat=VCFv4.2",
        "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO",
        "chr1\t100\t.\tA\tT\t.\t.\t.",
    ] {
        body.extend_from_slice(line.as_bytes());
        body.push(b'\n');
    }
    let mut data = bgzf_block(&body);
    let end = (data.len() as u64) << 16;
    data.extend_from_slice(&EOF_MARKER);

    let tbi = build_tbi(2, (1, 2, 0), 0, &[("chr1", vec![(4681, vec![(0, end)])], vec![0])]);
    let mut reader = IndexedReader::from_readers(Cursor::new(data), &tbi[..]).unwrap();

    let got = fetch_all(&mut reader, 1, 1000);
    assert_eq!(got, vec![b"chr1\t100\t.\tA\tT\t.\t.\t.".to_vec()]);
}

#[test]
fn test_record_straddling_blocks_emitted_once() {
    let body_lines = [
        "chr1\t100\t.\tA\tT\t.\t.\t.",
        "chr1\t200\t.\tA\tT\t.\t.\t.",
        "chr1\t300\t.\tA\tT\t.\t.\t.",
    ];
    let mut body = Vec::new();
    let mut starts = Vec::new();
    for line in &body_lines {
        starts.push(body.len());
        body.extend_from_slice(line.as_bytes());
        body.push(b'\n');
    }

    // Split the byte stream into 10-byte blocks so every line straddles
    // block boundaries
    let block_size = 10;
    let mut data = Vec::new();
    let mut block_coffsets = Vec::new();
    for piece in body.chunks(block_size) {
        block_coffsets.push(data.len() as u64);
        data.extend_from_slice(&bgzf_block(piece));
    }
    let end_voffset = (data.len() as u64) << 16;
    data.extend_from_slice(&EOF_MARKER);

    let voffset = |byte_index: usize| -> u64 {
        (block_coffsets[byte_index / block_size] << 16) | (byte_index % block_size) as u64
    };

    // End the middle record's chunk at the boundary of the block holding
    // its newline: the record begins before the chunk end but its tail
    // must be completed by reading past it
    let nl2 = starts[2] - 1;
    let cut = block_coffsets[nl2 / block_size] << 16;
    assert!(cut > voffset(starts[1]) && cut < voffset(starts[2]));

    let chunks = vec![
        (voffset(starts[0]), voffset(starts[1])),
        (voffset(starts[1]), cut),
        (voffset(starts[2]), end_voffset),
    ];
    let tbi = build_tbi(2, (1, 2, 0), 0, &[("chr1", vec![(4681, chunks)], vec![])]);
    let mut reader = IndexedReader::from_readers(Cursor::new(data), &tbi[..]).unwrap();

    let got = fetch_all(&mut reader, 200, 201);
    assert_eq!(got, vec![body_lines[1].as_bytes().to_vec()]);

    let all = fetch_all(&mut reader, 1, 1000);
    let expected: Vec<Vec<u8>> = body_lines.iter().map(|l| l.as_bytes().to_vec()).collect();
    assert_eq!(all, expected);
}

#[test]
fn test_chunks_duplicated_across_bins_emitted_once() {
    let f = fixture(
        2,
        (1, 2, 0),
        0,
        &[],
        &[
            "chr1\t100\t.\tA\tT\t.\t.\t.",
            "chr1\t200\t.\tC\tG\t.\t.\t.",
            "chr1\t300\t.\tG\tA\t.\t.\t.",
        ],
    );
    // Register every record chunk under bin 0 as well as its leaf bin
    let mut bin_list: BinList = vec![(0, f.chunks.clone()), (4681, f.chunks.clone())];
    bin_list.sort_by_key(|(bin, _)| *bin);
    let tbi = build_tbi(2, (1, 2, 0), 0, &[("chr1", bin_list, vec![])]);

    let mut reader = IndexedReader::from_readers(Cursor::new(f.data.clone()), &tbi[..]).unwrap();
    let got = fetch_all(&mut reader, 1, 1000);
    assert_eq!(got, f.lines);
}

#[test]
fn test_generic_end_column_boundary() {
    // Generic preset, 1-based inclusive begin/end columns. Zero-based spans
    // are [90, 100) and [90, 101); the query covers [100, 101)
    let f = fixture(
        0,
        (1, 2, 3),
        0,
        &[],
        &["chr1\t91\t100\tfeatA", "chr1\t91\t101\tfeatB"],
    );
    let mut reader = open(&f);

    let got = fetch_all(&mut reader, 101, 102);
    assert_eq!(got, vec![f.lines[1].clone()]);
}

#[test]
fn test_vcf_ref_allele_extends_span() {
    // REF "ACGT" at pos 100 spans [99, 103) zero-based
    let f = vcf_fixture(&["chr1\t100\t.\tACGT\tA\t.\t.\t."]);
    let mut reader = open(&f);

    assert_eq!(fetch_all(&mut reader, 103, 104).len(), 1);
    assert!(fetch_all(&mut reader, 104, 105).is_empty());
}

#[test]
fn test_vcf_info_end_extends_span() {
    let f = vcf_fixture(&[
        "chr1\t3000\t.\tA\t<DEL>\t.\t.\tSVTYPE=DEL;END=5000",
        "chr1\t6000\t.\tC\tG\t.\t.\t.",
    ]);
    let mut reader = open(&f);

    // The deletion covers [2999, 5000); a query inside it matches even
    // though it begins long after POS
    let got = fetch_all(&mut reader, 4000, 4500);
    assert_eq!(got, vec![f.lines[0].clone()]);
}

#[test]
fn test_fetch_vcf_returns_typed_records() {
    let f = vcf_fixture(&SEED_RECORDS);
    let mut reader = open(&f);

    let records: Vec<_> = reader
        .fetch_vcf("chr1", 150, 999_999)
        .collect::<tabfetch::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].chrom, "chr1");
    assert_eq!(records[0].pos, 200);
    assert_eq!(records[0].id.as_deref(), Some("rs2"));
    assert_eq!(records[0].ref_allele, "C");
}

#[test]
fn test_read_virtual_returns_chunk_bytes() {
    let f = vcf_fixture(&SEED_RECORDS);
    let mut reader = open(&f);

    let (start, end) = f.chunks[1];
    let chunk = Chunk::new(VirtualOffset::from_raw(start), VirtualOffset::from_raw(end));
    let bytes = reader.read_virtual(&chunk).unwrap();

    let mut expected = f.lines[1].clone();
    expected.push(b'\n');
    assert_eq!(bytes, expected);
}

#[test]
fn test_from_paths_and_references() {
    let dir = tempfile::TempDir::new().unwrap();
    let f = vcf_fixture(&SEED_RECORDS);

    let data_path = dir.path().join("variants.vcf.gz");
    let tbi_path = dir.path().join("variants.vcf.gz.tbi");
    std::fs::write(&data_path, &f.data).unwrap();
    std::fs::write(&tbi_path, &f.tbi).unwrap();

    let mut reader = IndexedReader::from_paths(&data_path, &tbi_path).unwrap();
    assert_eq!(reader.references().collect::<Vec<_>>(), vec!["chr1"]);

    let got = reader
        .fetch("chr1", 100, 101)
        .collect::<tabfetch::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(got, vec![f.lines[0].clone()]);
}

#[test]
fn test_malformed_line_surfaces_error() {
    // A non-numeric coordinate is index/data drift, not something to skip
    let mut data = bgzf_block(b"chr1\tabc\t.\tA\tT\t.\t.\t.\n");
    let end = (data.len() as u64) << 16;
    data.extend_from_slice(&EOF_MARKER);
    let tbi = build_tbi(2, (1, 2, 0), 0, &[("chr1", vec![(4681, vec![(0, end)])], vec![0])]);

    let mut reader = IndexedReader::from_readers(Cursor::new(data), &tbi[..]).unwrap();
    let results: Vec<_> = reader.fetch("chr1", 1, 1 << 29).collect();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
}
