mod bitmap;
mod error;
mod file_handle;
mod page;
mod record;
mod scan;


pub use error::{RecordError, RecordResult};
pub use file_handle::RecordFileHandle;
pub use page::{FileHeader, PageLayout, RecordPage, RecordPageMut};
pub use record::{Record, Rid, SlotNo};
pub use scan::RecordScan;

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::file::{BufferPoolManager, DiskManager, PageNo, PAGE_SIZE};

/// Page 0 holds the file header; records start on page 1
pub const FIRST_RECORD_PAGE: PageNo = 1;

/// Creates, opens, and destroys record files.
///
/// A record file is born with just its header page; record pages are
/// allocated on demand through the buffer pool as records arrive.
pub struct RecordManager {
    disk: Arc<Mutex<DiskManager>>,
    pool: Arc<BufferPoolManager>,
}

impl RecordManager {
    pub fn new(pool: Arc<BufferPoolManager>) -> Self {
        Self {
            disk: Arc::clone(pool.disk()),
            pool,
        }
    }

    /// Create a record file holding fixed-width records of `record_size`
    /// bytes
    pub fn create_file<P: AsRef<Path>>(&self, path: P, record_size: usize) -> RecordResult<()> {
        let hdr = FileHeader::new(record_size)?;

        let mut disk = self.disk.lock();
        disk.create_file(&path)?;
        let fd = disk.open_file(&path)?;

        let mut buf = vec![0u8; PAGE_SIZE];
        buf[..FileHeader::SIZE].copy_from_slice(&hdr.serialize());
        disk.write_page(fd, 0, &buf)?;
        disk.close_file(fd)?;

        Ok(())
    }

    /// Open a record file, reading and validating its header page
    pub fn open_file<P: AsRef<Path>>(&self, path: P) -> RecordResult<RecordFileHandle> {
        let mut disk = self.disk.lock();
        let fd = disk.open_file(&path)?;

        let mut buf = vec![0u8; PAGE_SIZE];
        disk.read_page(fd, 0, &mut buf)?;
        drop(disk);

        let hdr = FileHeader::deserialize(&buf)?;
        Ok(RecordFileHandle::new(Arc::clone(&self.pool), fd, hdr))
    }

    /// Flush a handle's header and pages, then close the underlying file
    pub fn close_file(&self, handle: RecordFileHandle) -> RecordResult<()> {
        handle.flush()?;
        self.disk.lock().close_file(handle.fd())?;
        Ok(())
    }

    /// Remove a record file from disk
    pub fn destroy_file<P: AsRef<Path>>(&self, path: P) -> RecordResult<()> {
        self.disk.lock().remove_file(path)?;
        Ok(())
    }
}
