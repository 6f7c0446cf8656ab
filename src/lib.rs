//! tabfetch: random access to tabix-indexed genomic files
//!
//! # Overview
//!
//! tabfetch reads position-sorted, BGZF-compressed data files (notably VCF)
//! through their Tabix `.tbi` indexes. Given a chromosome name and an
//! interval, it returns the data lines intersecting that interval without
//! scanning the whole file.
//!
//! Three pieces cooperate:
//!
//! - [`io::bgzf`]: a block reader treating the compressed file as a virtual
//!   address space of 64-bit virtual offsets
//! - [`formats::index`]: the `.tbi` decoder and chunk planner (binning tree
//!   plus linear index)
//! - [`io::indexed`]: the query engine that drives the block reader through
//!   the planned chunks and filters lines by coordinate
//!
//! # Quick Start
//!
//! ```no_run
//! use tabfetch::IndexedReader;
//!
//! # fn main() -> tabfetch::Result<()> {
//! let mut reader = IndexedReader::from_paths("variants.vcf.gz", "variants.vcf.gz.tbi")?;
//!
//! for name in reader.references().collect::<Vec<_>>() {
//!     println!("indexed reference: {name}");
//! }
//!
//! // Lines are yielded lazily, in file order
//! for line in reader.fetch("chr1", 1_000_000, 2_000_000) {
//!     let line = line?;
//!     println!("{}", String::from_utf8_lossy(&line));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Scope
//!
//! The crate reads indexes; it does not build or write them, and it does
//! not implement the CSI successor format. A handle serves one query at a
//! time; take one handle per concurrent reader if needed.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod formats;
pub mod io;

// Re-export commonly used types
pub use error::{Result, TabfetchError};
pub use formats::index::{TbiFormat, TbiIndex};
pub use formats::vcf::VcfLine;
pub use io::bgzf::{BgzfReader, Chunk, VirtualOffset};
pub use io::indexed::IndexedReader;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
