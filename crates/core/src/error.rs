use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("corrupt record in bucket `{bucket}`: {message}")]
    CorruptRecord { bucket: String, message: String },

    #[error("record encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid lookup key: {0:?}")]
    InvalidLookupKey(String),

    #[error("catalog schema version {db} is newer than this build supports ({code})")]
    SchemaTooNew { db: u32, code: u32 },

    #[error("ingestion root does not exist: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("ingestion root is not a directory: {}", .0.display())]
    RootNotDirectory(PathBuf),

    #[error("catalog writer has stopped")]
    WriterClosed,

    #[error("worker pool is closed")]
    PoolClosed,

    #[error("ingestion halted after a catalog failure")]
    Halted,

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Failures of the underlying store; fatal to the writer.
    pub fn is_store(&self) -> bool {
        matches!(
            self,
            Error::Store(_) | Error::CorruptRecord { .. } | Error::Encoding(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Recoverable failure while processing a single file. Logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("unsupported file type: {}", .0.display())]
    Unsupported(PathBuf),

    #[error("could not read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("file is empty: {}", .0.display())]
    Empty(PathBuf),

    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("could not resize image: {0}")]
    Resize(String),

    #[error("could not read EXIF metadata: {0}")]
    Metadata(#[from] exif::Error),
}
