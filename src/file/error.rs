use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Invalid file handle: {0}")]
    InvalidHandle(usize),

    #[error("File handle limit reached")]
    TooManyOpenFiles,

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Buffer pool exhausted: every frame is pinned")]
    BufferPoolExhausted,

    #[error("Disk manager could not allocate a page")]
    DiskAllocFailed,
}

pub type FileResult<T> = Result<T, FileError>;
