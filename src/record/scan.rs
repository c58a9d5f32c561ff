use crate::file::INVALID_PAGE_NO;

use super::error::RecordResult;
use super::file_handle::RecordFileHandle;
use super::page::RecordPage;
use super::record::{Rid, SlotNo};
use super::FIRST_RECORD_PAGE;

/// Single-pass forward cursor over every occupied slot of a file, in
/// ascending (page_no, slot_no) order.
///
/// Each visited page is pinned only while its bitmap is inspected.
/// Concurrent mutation of the file during a scan is not supported; higher
/// layers must stabilize the file first.
pub struct RecordScan<'a> {
    file: &'a RecordFileHandle,
    rid: Rid,
}

impl<'a> RecordScan<'a> {
    /// Open a scan positioned on the first occupied slot (or at the end)
    pub fn new(file: &'a RecordFileHandle) -> RecordResult<Self> {
        let mut scan = Self {
            file,
            rid: Rid::new(FIRST_RECORD_PAGE, -1),
        };
        scan.advance()?;
        Ok(scan)
    }

    /// Move to the next occupied slot strictly after the current position
    pub fn advance(&mut self) -> RecordResult<()> {
        loop {
            let hdr = self.file.file_header();
            if self.rid.page_no >= hdr.num_pages {
                self.rid = Rid::new(INVALID_PAGE_NO, -1);
                return Ok(());
            }

            let guard = self.file.pin_page(self.rid.page_no)?;
            let buf = guard.read();
            let page = RecordPage::new(&buf[..], hdr.layout());

            match page.next_used_slot(self.rid.slot_no) {
                Some(slot_no) => {
                    self.rid.slot_no = slot_no as SlotNo;
                    return Ok(());
                }
                None => {
                    self.rid.page_no += 1;
                    self.rid.slot_no = -1;
                }
            }
        }
    }

    /// True once the cursor has moved past the last occupied slot
    pub fn is_end(&self) -> bool {
        self.rid.page_no == INVALID_PAGE_NO
    }

    /// Current position. Meaningless once `is_end()` is true.
    pub fn rid(&self) -> Rid {
        self.rid
    }
}

impl Iterator for RecordScan<'_> {
    type Item = RecordResult<Rid>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_end() {
            return None;
        }
        let current = self.rid;
        match self.advance() {
            Ok(()) => Some(Ok(current)),
            Err(e) => {
                self.rid = Rid::new(INVALID_PAGE_NO, -1);
                Some(Err(e))
            }
        }
    }
}
