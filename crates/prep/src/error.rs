//! Data-preparation error type.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrepError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A dataset line is not a JSON object.
    #[error("line {line}: {reason}")]
    InvalidRecord { line: usize, reason: String },

    #[error("line {line}: missing field '{field}'")]
    MissingField { line: usize, field: String },

    /// A label that the label map does not cover.
    #[error("line {line}: label '{label}' is not in the label map")]
    UnknownLabel { line: usize, label: String },

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("dataset is empty")]
    EmptyDataset,

    /// A TFRecord frame failed its length or data checksum.
    #[error("corrupt record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: &'static str },
}

impl PrepError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
