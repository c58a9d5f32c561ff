use crate::file::{FileError, PageNo};
use thiserror::Error;

use super::record::SlotNo;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Page not found: page_no={0}")]
    PageNotFound(PageNo),

    #[error("Record not found: page_no={page_no}, slot_no={slot_no}")]
    RecordNotFound { page_no: PageNo, slot_no: SlotNo },

    #[error("Slot already occupied: page_no={page_no}, slot_no={slot_no}")]
    SlotOccupied { page_no: PageNo, slot_no: SlotNo },

    #[error("Invalid record size: expected {expected}, got {actual}")]
    InvalidRecordSize { expected: usize, actual: usize },

    #[error("Record size {0} does not fit in a page")]
    RecordTooLarge(usize),

    #[error("Page full: page_no={0}")]
    PageFull(PageNo),

    #[error("Invalid file header: {0}")]
    InvalidHeader(String),
}

pub type RecordResult<T> = Result<T, RecordError>;
