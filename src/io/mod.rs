//! I/O: BGZF block access and indexed random-access reading

pub mod bgzf;
pub mod indexed;

pub use bgzf::{BgzfBlock, BgzfReader, Chunk, VirtualOffset};
pub use indexed::{IndexedReader, Lines, VcfLines};
