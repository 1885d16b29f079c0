use std::fmt;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Page size (16KB) - unit of latching and redo addressing
pub const UNIV_PAGE_SIZE: usize = 16 * 1024;

/// Tablespace identifier
pub type SpaceId = u32;

/// Page number within a tablespace
pub type PageNo = u32;

/// Log sequence number (byte position in the redo stream)
pub type Lsn = u64;

/// Transaction ID
pub type TrxId = u64;

/// Sequence number of an undo record within one transaction
pub type UndoNo = u64;

/// Table ID stamped into log headers of dictionary transactions
pub type TableId = u64;

/// "No page" marker used in slots and file addresses
pub const FIL_NULL: PageNo = 0xFFFF_FFFF;

// File page header. Every page starts with these fields.

/// Page number of this page
pub const FIL_PAGE_OFFSET: usize = 4;
/// LSN of the newest redo group applied to this page (8 bytes)
pub const FIL_PAGE_LSN: usize = 16;
/// Page type tag used for type dispatch in the page cache
pub const FIL_PAGE_TYPE: usize = 24;
/// Space id of this page
pub const FIL_PAGE_SPACE_ID: usize = 34;
/// Start of the page body
pub const FIL_PAGE_DATA: usize = 38;
/// Size of the page trailer reserved at the end of each page
pub const FIL_PAGE_DATA_END: usize = 8;

/// Page type: freshly allocated, not yet formatted
pub const FIL_PAGE_TYPE_ALLOCATED: u16 = 0;
/// Page type: undo log page
pub const FIL_PAGE_UNDO_LOG: u16 = 2;

/// File segment headers are placed right after the file page header
pub const FSEG_PAGE_DATA: usize = FIL_PAGE_DATA;

/// File segment header (10 bytes): space, inode page, inode offset
pub const FSEG_HDR_SPACE: usize = 0;
pub const FSEG_HDR_PAGE_NO: usize = 4;
pub const FSEG_HDR_OFFSET: usize = 8;
pub const FSEG_HEADER_SIZE: usize = 10;

/// File address inside a space: page number + byte offset (6 bytes on disk)
pub const FIL_ADDR_PAGE: usize = 0;
pub const FIL_ADDR_BYTE: usize = 4;
pub const FIL_ADDR_SIZE: usize = 6;

/// Stable page address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode, Serialize, Deserialize)]
pub struct PageId {
    pub space: SpaceId,
    pub page_no: PageNo,
}

impl PageId {
    pub fn new(space: SpaceId, page_no: PageNo) -> Self {
        PageId { space, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.space, self.page_no)
    }
}

/// Address of a byte within a space, as stored in file list nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilAddr {
    pub page: PageNo,
    pub boffset: u16,
}

impl FilAddr {
    pub const NULL: FilAddr = FilAddr { page: FIL_NULL, boffset: 0 };

    pub fn new(page: PageNo, boffset: u16) -> Self {
        FilAddr { page, boffset }
    }

    pub fn is_null(&self) -> bool {
        self.page == FIL_NULL
    }
}
