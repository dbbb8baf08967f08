use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the sort pipeline.
///
/// All variants are fatal: a failed pipeline leaves no partial result, and a
/// rerun starts from scratch with a cleared intermediate directory.
#[derive(Debug, Error)]
pub enum SortError {
    /// Missing/unreadable source, intermediate, or result path.
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Rejected construction parameters.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Input byte stream ends in the middle of an 8-byte value.
    #[error("input ends mid-value ({trailing} trailing bytes after {values} whole values)")]
    TruncatedInput { values: u64, trailing: usize },

    /// A programming/logic defect: a state the pipeline promises is unreachable.
    #[error("invariant violated: {0}")]
    Invariant(&'static str),
}

impl SortError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> SortError {
        SortError::Io {
            path: path.into(),
            source,
        }
    }
}
