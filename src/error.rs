use std::{io, sync::Arc};

pub type EfResult<T, E = Error> = Result<T, E>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The path backing an on-disk file no longer exists when measured or
    /// opened.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The final move during a save failed. The serialized temporary file
    /// may be left behind.
    #[error("file cannot save: {0}")]
    FileCannotSave(String),

    /// `next` was called on an exhausted iterator.
    #[error("end of stream")]
    EndOfStream,

    /// A transient file was traversed a second time. Re-reading requires
    /// prior canonicalization via `stored`, `slurped` or `serialized`.
    #[error("transient stream already consumed")]
    TransientConsumed,

    /// A record could not be decoded.
    #[error("parse error at {path}:{line}: {msg}")]
    Parse {
        path: String,
        /// 1-based data line position.
        line: u64,
        msg: String,
    },

    /// Workspace misconfiguration, e.g. re-initialization after use.
    #[error("configuration error: {0}")]
    Config(String),

    /// An generic IO error.
    #[error("io error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Io(Arc::new(value))
    }
}
