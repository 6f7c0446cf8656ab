//! File-format support: the tabix index and a minimal VCF tokenizer.
//!
//! The index side decodes `.tbi` payloads into immutable in-memory values;
//! the VCF side tokenizes individual data lines for callers that want typed
//! records out of [`fetch_vcf`](crate::IndexedReader::fetch_vcf).

pub mod index;
pub mod vcf;

pub use index::{TbiFormat, TbiIndex};
pub use vcf::VcfLine;
