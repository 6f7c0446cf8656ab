//! Tabix index support for random access to genomic data files.
//!
//! Tabix indexes enable region queries on sorted, tab-delimited,
//! BGZF-compressed files such as VCF, BED and GFF3. Decoding produces a
//! self-contained [`TbiIndex`]; queries combine its hierarchical binning
//! tree with a 16 kb linear index to plan a minimal set of file chunks.
//!
//! # Example
//!
//! ```no_run
//! use tabfetch::TbiIndex;
//!
//! # fn main() -> tabfetch::Result<()> {
//! let index = TbiIndex::from_path("variants.vcf.gz.tbi")?;
//! let chunks = index.query("chr1", 1_000_000, 2_000_000);
//! println!("{} chunks for region", chunks.len());
//! # Ok(())
//! # }
//! ```

pub mod bins;
pub mod tbi;

pub use tbi::{ReferenceStats, TbiFormat, TbiIndex, TbiReference};
