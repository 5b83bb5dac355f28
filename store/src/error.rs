use thiserror::Error;

/// Store-level failures.
///
/// Persistence errors are absorbed by the sync loop (logged, retried next
/// cycle); compression errors surface only on corrupt at-rest data.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("corrupt persistence record in {file}: {reason}")]
    CorruptRecord { file: String, reason: &'static str },
}
