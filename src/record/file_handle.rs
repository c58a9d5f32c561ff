use std::sync::Arc;

use parking_lot::Mutex;

use crate::file::{BufferPoolManager, FileHandle, PageGuard, PageId, PageNo, INVALID_PAGE_NO, PAGE_SIZE};

use super::error::{RecordError, RecordResult};
use super::page::{FileHeader, RecordPage, RecordPageMut};
use super::record::{Record, Rid, SlotNo};
use super::scan::RecordScan;
use super::FIRST_RECORD_PAGE;

/// Heap-file record CRUD over one open file.
///
/// The handle caches the file header; the header mutex doubles as the
/// serialization point for the paired file-header/page-header free-list
/// transitions. Pages are pinned through the buffer pool for the duration
/// of each operation and unpinned (dirty where modified) on guard drop.
pub struct RecordFileHandle {
    fd: FileHandle,
    hdr: Mutex<FileHeader>,
    pool: Arc<BufferPoolManager>,
}

impl RecordFileHandle {
    pub(crate) fn new(pool: Arc<BufferPoolManager>, fd: FileHandle, hdr: FileHeader) -> Self {
        Self {
            fd,
            hdr: Mutex::new(hdr),
            pool,
        }
    }

    pub fn fd(&self) -> FileHandle {
        self.fd
    }

    /// Fixed record width of this file in bytes
    pub fn record_size(&self) -> usize {
        self.hdr.lock().record_size as usize
    }

    /// Snapshot of the cached file header
    pub fn file_header(&self) -> FileHeader {
        *self.hdr.lock()
    }

    /// Read the record at `rid`
    pub fn get_record(&self, rid: Rid) -> RecordResult<Record> {
        let hdr = self.hdr.lock();
        let guard = self.fetch_record_page(&hdr, rid.page_no)?;
        let buf = guard.read();
        let page = RecordPage::new(&buf[..], hdr.layout());

        if rid.slot_no < 0 || !page.is_slot_used(rid.slot_no as usize) {
            return Err(RecordError::RecordNotFound {
                page_no: rid.page_no,
                slot_no: rid.slot_no,
            });
        }

        Ok(Record::new(page.slot(rid.slot_no as usize).to_vec()))
    }

    /// Insert `payload` into the first free slot of a not-full page,
    /// returning the new record's identifier
    pub fn insert_record(&self, payload: &[u8]) -> RecordResult<Rid> {
        let mut hdr = self.hdr.lock();
        self.check_payload(&hdr, payload)?;

        let guard = self.acquire_free_page(&mut hdr)?;
        let page_no = guard.page_no();
        let layout = hdr.layout();

        let mut buf = guard.write();
        let mut page = RecordPageMut::new(&mut buf[..], layout);
        let slot_no = page
            .find_free_slot()
            .ok_or(RecordError::PageFull(page_no))?;

        page.slot_mut(slot_no).copy_from_slice(payload);
        page.mark_slot_used(slot_no);
        let num_records = page.num_records() + 1;
        page.set_num_records(num_records);

        // Fill-to-full: unlink the page from the head of the free list
        if num_records as usize == layout.slots_per_page {
            hdr.first_free_page_no = page.next_free_page_no();
        }

        Ok(Rid::new(page_no, slot_no as SlotNo))
    }

    /// Insert `payload` at a caller-chosen position, extending the file
    /// with fresh pages until `rid.page_no` exists. Used by recovery and
    /// bulk load, which fill pages in order.
    pub fn insert_record_at(&self, rid: Rid, payload: &[u8]) -> RecordResult<()> {
        let mut hdr = self.hdr.lock();
        self.check_payload(&hdr, payload)?;
        let layout = hdr.layout();

        if rid.slot_no < 0 || rid.slot_no as usize >= layout.slots_per_page {
            return Err(RecordError::RecordNotFound {
                page_no: rid.page_no,
                slot_no: rid.slot_no,
            });
        }

        while rid.page_no >= hdr.num_pages {
            // Each fresh page lands at the head of the free list
            let _ = self.create_page(&mut hdr)?;
        }

        let guard = self.fetch_record_page(&hdr, rid.page_no)?;
        {
            let buf = guard.read();
            let page = RecordPage::new(&buf[..], layout);
            if page.is_slot_used(rid.slot_no as usize) {
                return Err(RecordError::SlotOccupied {
                    page_no: rid.page_no,
                    slot_no: rid.slot_no,
                });
            }
        }

        let mut buf = guard.write();
        let mut page = RecordPageMut::new(&mut buf[..], layout);
        page.slot_mut(rid.slot_no as usize).copy_from_slice(payload);
        page.mark_slot_used(rid.slot_no as usize);
        let num_records = page.num_records() + 1;
        page.set_num_records(num_records);

        if num_records as usize == layout.slots_per_page {
            hdr.first_free_page_no = page.next_free_page_no();
        }

        Ok(())
    }

    /// Delete the record at `rid`
    pub fn delete_record(&self, rid: Rid) -> RecordResult<()> {
        let mut hdr = self.hdr.lock();
        let layout = hdr.layout();
        let guard = self.fetch_record_page(&hdr, rid.page_no)?;

        let was_full = {
            let buf = guard.read();
            let page = RecordPage::new(&buf[..], layout);
            if rid.slot_no < 0 || !page.is_slot_used(rid.slot_no as usize) {
                return Err(RecordError::RecordNotFound {
                    page_no: rid.page_no,
                    slot_no: rid.slot_no,
                });
            }
            page.is_full()
        };

        let mut buf = guard.write();
        let mut page = RecordPageMut::new(&mut buf[..], layout);
        page.mark_slot_free(rid.slot_no as usize);
        page.set_num_records(page.num_records() - 1);

        // Full → not-full: push the page onto the head of the free list
        if was_full {
            page.set_next_free_page_no(hdr.first_free_page_no);
            hdr.first_free_page_no = rid.page_no;
        }

        Ok(())
    }

    /// Overwrite the record at `rid` in place
    pub fn update_record(&self, rid: Rid, payload: &[u8]) -> RecordResult<()> {
        let hdr = self.hdr.lock();
        self.check_payload(&hdr, payload)?;
        let layout = hdr.layout();
        let guard = self.fetch_record_page(&hdr, rid.page_no)?;

        {
            let buf = guard.read();
            let page = RecordPage::new(&buf[..], layout);
            if rid.slot_no < 0 || !page.is_slot_used(rid.slot_no as usize) {
                return Err(RecordError::RecordNotFound {
                    page_no: rid.page_no,
                    slot_no: rid.slot_no,
                });
            }
        }

        let mut buf = guard.write();
        let mut page = RecordPageMut::new(&mut buf[..], layout);
        page.slot_mut(rid.slot_no as usize).copy_from_slice(payload);

        Ok(())
    }

    /// Forward scan over every occupied slot of the file
    pub fn scan(&self) -> RecordResult<RecordScan<'_>> {
        RecordScan::new(self)
    }

    /// Write the cached header back to page 0 and flush every buffered
    /// page of the file. After this, a fresh buffer pool can reopen the
    /// file and see all records.
    pub fn flush(&self) -> RecordResult<()> {
        let hdr = self.hdr.lock();
        self.write_header(&hdr)?;
        self.pool.flush_all_pages(self.fd)?;
        Ok(())
    }

    /// Pin a record page for the scan; bounds-checked like every access
    pub(crate) fn pin_page(&self, page_no: PageNo) -> RecordResult<PageGuard<'_>> {
        let hdr = self.hdr.lock();
        self.fetch_record_page(&hdr, page_no)
    }

    fn fetch_record_page(
        &self,
        hdr: &FileHeader,
        page_no: PageNo,
    ) -> RecordResult<PageGuard<'_>> {
        if page_no < FIRST_RECORD_PAGE || page_no >= hdr.num_pages {
            return Err(RecordError::PageNotFound(page_no));
        }
        Ok(self.pool.fetch_page(PageId::new(self.fd, page_no))?)
    }

    /// Head of the free list, or a freshly created page when every record
    /// page is full
    fn acquire_free_page(&self, hdr: &mut FileHeader) -> RecordResult<PageGuard<'_>> {
        if hdr.first_free_page_no == INVALID_PAGE_NO {
            self.create_page(hdr)
        } else {
            self.fetch_record_page(hdr, hdr.first_free_page_no)
        }
    }

    /// Allocate and initialize a record page, linking it at the head of
    /// the free list
    fn create_page(&self, hdr: &mut FileHeader) -> RecordResult<PageGuard<'_>> {
        let guard = self.pool.new_page(self.fd)?;
        let page_no = guard.page_no();
        debug_assert_eq!(page_no, hdr.num_pages);

        {
            let mut buf = guard.write();
            let mut page = RecordPageMut::new(&mut buf[..], hdr.layout());
            page.init(hdr.first_free_page_no);
        }
        hdr.first_free_page_no = page_no;
        hdr.num_pages += 1;

        Ok(guard)
    }

    fn check_payload(&self, hdr: &FileHeader, payload: &[u8]) -> RecordResult<()> {
        if payload.len() != hdr.record_size as usize {
            return Err(RecordError::InvalidRecordSize {
                expected: hdr.record_size as usize,
                actual: payload.len(),
            });
        }
        Ok(())
    }

    fn write_header(&self, hdr: &FileHeader) -> RecordResult<()> {
        let mut buf = vec![0u8; PAGE_SIZE];
        buf[..FileHeader::SIZE].copy_from_slice(&hdr.serialize());
        self.pool.disk().lock().write_page(self.fd, 0, &buf)?;
        Ok(())
    }
}
