pub mod file;
pub mod record;

pub use file::{
    BufferPoolManager, DiskManager, FileHandle, PageGuard, PageId, PageNo, ReplacerPolicy,
    DEFAULT_POOL_SIZE, INVALID_PAGE_NO, PAGE_SIZE,
};
pub use record::{Record, RecordFileHandle, RecordManager, RecordScan, Rid, FIRST_RECORD_PAGE};
