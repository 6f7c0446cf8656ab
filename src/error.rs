//! Error types for tabfetch

use thiserror::Error;

/// Result type alias for tabfetch operations
pub type Result<T> = std::result::Result<T, TabfetchError>;

/// Error types that can occur in tabfetch
#[derive(Debug, Error)]
pub enum TabfetchError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed tabix index
    ///
    /// Bad magic, truncated payload, counts that overflow the payload,
    /// duplicate bins, or unknown format bits. Fatal at open; no partial
    /// index is ever returned.
    #[error("malformed tabix index: {msg}")]
    MalformedIndex {
        /// What was wrong with the index
        msg: String,
    },

    /// Malformed BGZF block
    ///
    /// Header corruption, deflate failure, CRC or ISIZE mismatch. Fatal for
    /// the current query; the handle stays usable for new queries.
    #[error("malformed BGZF block at offset {offset}: {msg}")]
    MalformedBlock {
        /// Compressed file offset of the block's first byte
        offset: u64,
        /// What was wrong with the block
        msg: String,
    },

    /// Malformed data line
    ///
    /// A line in the indexed file lacks the columns the index header names,
    /// or has non-numeric coordinates. Indicates index/data drift, so it is
    /// surfaced rather than skipped.
    #[error("invalid data line: {msg}")]
    InvalidLine {
        /// What was wrong with the line
        msg: String,
    },
}
