use thiserror::Error;

/// Result alias used throughout the storage core.
pub type StorageResult<T> = Result<T, StorageError>;

/// The error taxonomy of the storage core.
///
/// Everything surfaced to callers is one of these kinds; the buffer manager
/// is the only component that recovers internally (by logging a warning and
/// continuing) when eviction cannot make room.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("page {page_no} does not exist in file {file}")]
    PageNotFound { file: String, page_no: u32 },

    #[error("invalid page size {0}, must be a power of two in [512, 65536]")]
    InvalidPageSize(usize),

    #[error("file {file} carries unknown type code {code}")]
    UnknownFileType { file: String, code: u8 },

    #[error("file {0} already exists")]
    FileExists(String),

    #[error("file {0} is not open")]
    FileNotOpen(String),

    #[error("invalid file pointer ({page_no}, {offset})")]
    InvalidFilePointer { page_no: u16, offset: u16 },

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("page {page_no} cannot fit {needed} more bytes ({available} free)")]
    OutOfSpaceInPage {
        page_no: u32,
        needed: usize,
        available: usize,
    },

    #[error("duplicate key in index {index}: {key}")]
    DuplicateKey { index: String, key: String },

    #[error("index corruption in {index}: {detail}")]
    IndexCorruption { index: String, detail: String },

    #[error("a transaction is already in progress for this session")]
    TransactionInProgress,

    #[error("no transaction is in progress for this session")]
    NoTransaction,

    #[error("transactions are disabled by configuration")]
    TransactionsDisabled,

    #[error("write-ahead log is corrupt: {0}")]
    LogCorrupt(String),

    #[error("bad configuration: {0}")]
    Config(String),
}

impl StorageError {
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        StorageError::SchemaViolation(msg.into())
    }

    pub fn corrupt_log<S: Into<String>>(msg: S) -> Self {
        StorageError::LogCorrupt(msg.into())
    }

    pub fn corrupt_index<I: Into<String>, D: Into<String>>(index: I, detail: D) -> Self {
        StorageError::IndexCorruption {
            index: index.into(),
            detail: detail.into(),
        }
    }
}
