pub mod lsn;
pub mod record;

pub use lsn::Lsn;
pub use record::{WalRecord, WalRecordFrame, WalRecordType};

/// File offset of the first record in every WAL file: two bytes of
/// type/page-size, four reserved.
pub const WAL_FIRST_RECORD_OFFSET: u32 = 6;

/// Capacity of one `wal-NNNNN.log` file; a record that would cross this
/// boundary is written at the start of the next file instead.
pub const WAL_FILE_CAPACITY: u32 = 4 * 1024 * 1024;

/// Largest byte-range delta carried by a single UPDATE_PAGE record; wider
/// page changes are chunked so the two-byte record-size field cannot
/// overflow.
pub const MAX_CHANGE_CHUNK: usize = 16 * 1024;
