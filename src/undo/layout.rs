//! On-page layout of undo pages, undo segment headers and undo log headers,
//! and the formatting operations that act on them.
//!
//! Every structural change is an [`UndoOp`]: a pure function of the page
//! bytes and the operation's own payload. The forward path applies it and
//! logs it in one step ([`apply_logged`]); recovery parses the same bytes
//! back into an `UndoOp` and applies it again.

use crate::error::{Error, Result};
use crate::storage::base::{
    PageId, TrxId, FIL_PAGE_DATA_END, FIL_PAGE_TYPE, FIL_PAGE_UNDO_LOG, FSEG_PAGE_DATA,
    UNIV_PAGE_SIZE,
};
use crate::storage::flst::{FLST_BASE_NODE_SIZE, FLST_NODE_SIZE};
use crate::storage::mach;
use crate::storage::mlog::MlogType;
use crate::storage::mtr::Mtr;
use crate::undo::{UndoState, UndoType};

// Undo page header, present on every page of an undo segment

pub const TRX_UNDO_PAGE_HDR: usize = FSEG_PAGE_DATA;
/// Segment type, insert or update
pub const TRX_UNDO_PAGE_TYPE: usize = 0;
/// Offset of the first record of the newest log header on this page
pub const TRX_UNDO_PAGE_START: usize = 2;
/// First free byte on the page
pub const TRX_UNDO_PAGE_FREE: usize = 4;
/// Node in the segment's page list
pub const TRX_UNDO_PAGE_NODE: usize = 6;
pub const TRX_UNDO_PAGE_HDR_SIZE: usize = 6 + FLST_NODE_SIZE;

// Undo segment header, only on the first page of a segment

pub const TRX_UNDO_SEG_HDR: usize = TRX_UNDO_PAGE_HDR + TRX_UNDO_PAGE_HDR_SIZE;
pub const TRX_UNDO_STATE: usize = 0;
/// Offset of the newest log header on the header page, 0 if none
pub const TRX_UNDO_LAST_LOG: usize = 2;
pub const TRX_UNDO_FSEG_HEADER: usize = 4;
/// Base node of the segment's page list
pub const TRX_UNDO_PAGE_LIST: usize = 4 + crate::storage::base::FSEG_HEADER_SIZE;
pub const TRX_UNDO_SEG_HDR_SIZE: usize = TRX_UNDO_PAGE_LIST + FLST_BASE_NODE_SIZE;

// Undo log header

pub const TRX_UNDO_TRX_ID: usize = 0;
/// Commit number, written when the log enters the history list
pub const TRX_UNDO_TRX_NO: usize = 8;
pub const TRX_UNDO_DEL_MARKS: usize = 16;
pub const TRX_UNDO_LOG_START: usize = 18;
pub const TRX_UNDO_DICT_OPERATION: usize = 20;
pub const TRX_UNDO_TABLE_ID: usize = 22;
pub const TRX_UNDO_NEXT_LOG: usize = 30;
pub const TRX_UNDO_PREV_LOG: usize = 32;
pub const TRX_UNDO_HISTORY_NODE: usize = 34;
pub const TRX_UNDO_LOG_HDR_SIZE: usize = 34 + FLST_NODE_SIZE;

/// Where a segment's only log header sits when the segment is reused for inserts
pub const TRX_UNDO_FIRST_LOG_HDR: usize = TRX_UNDO_SEG_HDR + TRX_UNDO_SEG_HDR_SIZE;

/// A one-page segment whose free offset is below this goes to the cache
pub const TRX_UNDO_PAGE_REUSE_LIMIT: usize = 3 * UNIV_PAGE_SIZE / 4;

/// Records may not run into the page trailer
pub const TRX_UNDO_PAGE_USABLE_END: usize = UNIV_PAGE_SIZE - FIL_PAGE_DATA_END;

/// Structural change to one undo page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOp {
    /// Format a page as an empty undo page of the given type
    PageInit { ty: UndoType },
    /// Append a log header at the free offset
    HdrCreate { trx_id: TrxId },
    /// Reinitialise the single log header of a cached insert segment
    HdrReuse { trx_id: TrxId },
    /// Pop the newest log header
    HdrDiscard,
    /// Append a record; `body` is everything between the two link fields
    RecInsert { body: Vec<u8> },
}

impl UndoOp {
    pub fn mlog_type(&self) -> MlogType {
        match self {
            UndoOp::PageInit { .. } => MlogType::UndoInit,
            UndoOp::HdrCreate { .. } => MlogType::UndoHdrCreate,
            UndoOp::HdrReuse { .. } => MlogType::UndoHdrReuse,
            UndoOp::HdrDiscard => MlogType::UndoHdrDiscard,
            UndoOp::RecInsert { .. } => MlogType::UndoInsert,
        }
    }

    /// Apply to a page. Returns the offset of the created log header or
    /// record where the operation creates one, 0 otherwise.
    pub fn apply(&self, page: &mut [u8]) -> usize {
        match self {
            UndoOp::PageInit { ty } => {
                page_init(page, *ty);
                0
            }
            UndoOp::HdrCreate { trx_id } => header_create(page, *trx_id),
            UndoOp::HdrReuse { trx_id } => insert_header_reuse(page, *trx_id),
            UndoOp::HdrDiscard => {
                discard_latest(page);
                0
            }
            UndoOp::RecInsert { body } => rec_insert(page, body),
        }
    }

    fn write_log(&self, mtr: &mut Mtr) {
        match self {
            UndoOp::PageInit { ty } => mtr.catenate_compressed(*ty as u32),
            UndoOp::HdrCreate { trx_id } | UndoOp::HdrReuse { trx_id } => mtr.catenate_wide(*trx_id),
            UndoOp::HdrDiscard => {}
            UndoOp::RecInsert { body } => {
                mtr.catenate_u16(body.len() as u16);
                mtr.catenate_bytes(body);
            }
        }
    }

    /// Parse the body of a redo record of type `ty`.
    /// `Ok(None)` means the buffer ends inside the record.
    pub fn parse(ty: MlogType, buf: &[u8]) -> Result<Option<(UndoOp, usize)>> {
        let parsed = match ty {
            MlogType::UndoInit => match mach::parse_compressed(buf) {
                Some((val, n)) => {
                    let ty = UndoType::from_u16(val as u16)
                        .filter(|_| val <= u16::MAX as u32)
                        .ok_or_else(|| Error::CorruptLog(format!("bad undo page type {}", val)))?;
                    Some((UndoOp::PageInit { ty }, n))
                }
                None => None,
            },
            MlogType::UndoHdrCreate => {
                mach::parse_wide_compressed(buf).map(|(trx_id, n)| (UndoOp::HdrCreate { trx_id }, n))
            }
            MlogType::UndoHdrReuse => {
                mach::parse_wide_compressed(buf).map(|(trx_id, n)| (UndoOp::HdrReuse { trx_id }, n))
            }
            MlogType::UndoHdrDiscard => Some((UndoOp::HdrDiscard, 0)),
            MlogType::UndoInsert => {
                if buf.len() < 2 {
                    None
                } else {
                    let len = mach::read_2(buf, 0) as usize;
                    buf.get(2..2 + len).map(|body| {
                        (UndoOp::RecInsert { body: body.to_vec() }, 2 + len)
                    })
                }
            }
            other => {
                return Err(Error::CorruptLog(format!("{:?} is not an undo record type", other)));
            }
        };
        Ok(parsed)
    }
}

/// Apply `op` to a page latched exclusive in `mtr` and log it
pub fn apply_logged(mtr: &mut Mtr, page: PageId, op: &UndoOp) -> usize {
    let offset = op.apply(mtr.frame_mut(page));
    mtr.write_initial_log_record(op.mlog_type(), page);
    op.write_log(mtr);
    offset
}

fn page_hdr(page: &[u8], field: usize) -> usize {
    mach::read_2(page, TRX_UNDO_PAGE_HDR + field) as usize
}

fn set_page_hdr(page: &mut [u8], field: usize, val: usize) {
    mach::write_2(page, TRX_UNDO_PAGE_HDR + field, val as u16);
}

fn seg_hdr(page: &[u8], field: usize) -> usize {
    mach::read_2(page, TRX_UNDO_SEG_HDR + field) as usize
}

fn set_seg_hdr(page: &mut [u8], field: usize, val: usize) {
    mach::write_2(page, TRX_UNDO_SEG_HDR + field, val as u16);
}

pub fn page_type(page: &[u8]) -> u16 {
    mach::read_2(page, TRX_UNDO_PAGE_HDR + TRX_UNDO_PAGE_TYPE)
}

pub fn page_start_offset(page: &[u8]) -> usize {
    page_hdr(page, TRX_UNDO_PAGE_START)
}

pub fn page_free(page: &[u8]) -> usize {
    page_hdr(page, TRX_UNDO_PAGE_FREE)
}

pub fn seg_state(page: &[u8]) -> u16 {
    mach::read_2(page, TRX_UNDO_SEG_HDR + TRX_UNDO_STATE)
}

pub fn last_log(page: &[u8]) -> usize {
    seg_hdr(page, TRX_UNDO_LAST_LOG)
}

pub fn log_hdr_field(page: &[u8], hdr_offset: usize, field: usize) -> usize {
    mach::read_2(page, hdr_offset + field) as usize
}

pub fn log_trx_id(page: &[u8], hdr_offset: usize) -> TrxId {
    mach::read_8(page, hdr_offset + TRX_UNDO_TRX_ID)
}

fn page_init(page: &mut [u8], ty: UndoType) {
    let start = TRX_UNDO_PAGE_HDR + TRX_UNDO_PAGE_HDR_SIZE;
    set_page_hdr(page, TRX_UNDO_PAGE_TYPE, ty as usize);
    set_page_hdr(page, TRX_UNDO_PAGE_START, start);
    set_page_hdr(page, TRX_UNDO_PAGE_FREE, start);
    mach::write_2(page, FIL_PAGE_TYPE, FIL_PAGE_UNDO_LOG);
}

fn header_create(page: &mut [u8], trx_id: TrxId) -> usize {
    let free = page_free(page);
    let new_free = free + TRX_UNDO_LOG_HDR_SIZE;
    assert!(new_free <= UNIV_PAGE_SIZE, "undo log header does not fit at {}", free);

    set_page_hdr(page, TRX_UNDO_PAGE_START, new_free);
    set_page_hdr(page, TRX_UNDO_PAGE_FREE, new_free);
    set_seg_hdr(page, TRX_UNDO_STATE, UndoState::Active as usize);

    let prev_log = last_log(page);
    if prev_log != 0 {
        mach::write_2(page, prev_log + TRX_UNDO_NEXT_LOG, free as u16);
    }
    set_seg_hdr(page, TRX_UNDO_LAST_LOG, free);

    mach::write_2(page, free + TRX_UNDO_DEL_MARKS, 1);
    mach::write_8(page, free + TRX_UNDO_TRX_ID, trx_id);
    mach::write_2(page, free + TRX_UNDO_LOG_START, new_free as u16);
    mach::write_2(page, free + TRX_UNDO_DICT_OPERATION, 0);
    mach::write_2(page, free + TRX_UNDO_NEXT_LOG, 0);
    mach::write_2(page, free + TRX_UNDO_PREV_LOG, prev_log as u16);
    free
}

fn insert_header_reuse(page: &mut [u8], trx_id: TrxId) -> usize {
    assert_eq!(
        page_type(page),
        UndoType::Insert as u16,
        "header reuse on a non-insert undo segment"
    );
    let free = TRX_UNDO_FIRST_LOG_HDR;
    let new_free = free + TRX_UNDO_LOG_HDR_SIZE;

    set_page_hdr(page, TRX_UNDO_PAGE_START, new_free);
    set_page_hdr(page, TRX_UNDO_PAGE_FREE, new_free);
    set_seg_hdr(page, TRX_UNDO_STATE, UndoState::Active as usize);

    mach::write_8(page, free + TRX_UNDO_TRX_ID, trx_id);
    mach::write_2(page, free + TRX_UNDO_LOG_START, new_free as u16);
    mach::write_2(page, free + TRX_UNDO_DICT_OPERATION, 0);
    free
}

fn discard_latest(page: &mut [u8]) {
    let free = last_log(page);
    let prev_hdr = log_hdr_field(page, free, TRX_UNDO_PREV_LOG);

    // With no older log left on the page, start collapses onto free
    let start = if prev_hdr != 0 {
        mach::write_2(page, prev_hdr + TRX_UNDO_NEXT_LOG, 0);
        log_hdr_field(page, prev_hdr, TRX_UNDO_LOG_START)
    } else {
        free
    };
    set_page_hdr(page, TRX_UNDO_PAGE_START, start);
    set_page_hdr(page, TRX_UNDO_PAGE_FREE, free);
    set_seg_hdr(page, TRX_UNDO_STATE, UndoState::Cached as usize);
    set_seg_hdr(page, TRX_UNDO_LAST_LOG, prev_hdr);
}

fn rec_insert(page: &mut [u8], body: &[u8]) -> usize {
    let first_free = page_free(page);
    let new_free = first_free + 4 + body.len();
    assert!(
        new_free <= TRX_UNDO_PAGE_USABLE_END,
        "undo record of {} bytes overflows the page at {}",
        body.len(),
        first_free
    );

    mach::write_2(page, first_free, new_free as u16);
    page[first_free + 2..first_free + 2 + body.len()].copy_from_slice(body);
    mach::write_2(page, new_free - 2, first_free as u16);
    set_page_hdr(page, TRX_UNDO_PAGE_FREE, new_free);
    first_free
}

/// State an undo segment takes when its transaction ends
pub fn finish_state(ty: UndoType, size: u32, free: usize) -> UndoState {
    if size == 1 && free < TRX_UNDO_PAGE_REUSE_LIMIT {
        UndoState::Cached
    } else if ty == UndoType::Insert {
        UndoState::ToFree
    } else {
        UndoState::ToPurge
    }
}
