//! Walking the records of one undo log across the pages of its segment.
//!
//! Every call latches the pages it reads in the caller's mini-transaction,
//! so a returned [`RecPtr`] stays valid until that mini-transaction commits.

use crate::error::Result;
use crate::storage::base::{PageId, PageNo, SpaceId, FIL_NULL};
use crate::storage::flst;
use crate::storage::mtr::{LatchMode, Mtr};
use crate::undo::layout::{log_hdr_field, TRX_UNDO_NEXT_LOG};
use crate::undo::page;
use crate::undo::seg::page_node;

/// Location of an undo record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecPtr {
    pub page: PageId,
    pub offset: usize,
}

/// First record of the log on the page after `page`, if the log continues there
fn first_rec_on_next_page(
    mtr: &mut Mtr,
    page: PageId,
    hdr_page_no: PageNo,
    hdr_offset: usize,
    mode: LatchMode,
) -> Result<Option<RecPtr>> {
    // A later log on the header page means this log ends there
    if page.page_no == hdr_page_no && log_hdr_field(mtr.frame(page), hdr_offset, TRX_UNDO_NEXT_LOG) != 0 {
        return Ok(None);
    }

    let next_page_no = flst::next(mtr, page_node(page)).page;
    if next_page_no == FIL_NULL {
        return Ok(None);
    }
    let next = PageId::new(page.space, next_page_no);
    mtr.page_get(next, mode)?;
    Ok(page::page_get_first_rec(mtr.frame(next), hdr_page_no, hdr_offset).map(|offset| RecPtr {
        page: next,
        offset,
    }))
}

/// Last record of the log on the page before `page`
fn last_rec_on_prev_page(
    mtr: &mut Mtr,
    page: PageId,
    hdr_page_no: PageNo,
    hdr_offset: usize,
) -> Result<Option<RecPtr>> {
    let prev_page_no = flst::prev(mtr, page_node(page)).page;
    if prev_page_no == FIL_NULL {
        return Ok(None);
    }
    let prev = PageId::new(page.space, prev_page_no);
    mtr.s_latch(prev)?;
    Ok(page::page_get_last_rec(mtr.frame(prev), hdr_page_no, hdr_offset).map(|offset| RecPtr {
        page: prev,
        offset,
    }))
}

/// First record of the log whose header is at `hdr_offset` on `hdr_page_no`
pub fn get_first_rec(
    mtr: &mut Mtr,
    space: SpaceId,
    hdr_page_no: PageNo,
    hdr_offset: usize,
    mode: LatchMode,
) -> Result<Option<RecPtr>> {
    let hdr_page = PageId::new(space, hdr_page_no);
    mtr.page_get(hdr_page, mode)?;
    if let Some(offset) = page::page_get_first_rec(mtr.frame(hdr_page), hdr_page_no, hdr_offset) {
        return Ok(Some(RecPtr { page: hdr_page, offset }));
    }
    first_rec_on_next_page(mtr, hdr_page, hdr_page_no, hdr_offset, mode)
}

/// Record after `rec`, following the page list; `rec`'s page must be latched
pub fn get_next_rec(mtr: &mut Mtr, rec: RecPtr, hdr_page_no: PageNo, hdr_offset: usize) -> Result<Option<RecPtr>> {
    if let Some(offset) = page::page_get_next_rec(mtr.frame(rec.page), rec.offset, hdr_page_no, hdr_offset) {
        return Ok(Some(RecPtr { page: rec.page, offset }));
    }
    first_rec_on_next_page(mtr, rec.page, hdr_page_no, hdr_offset, LatchMode::Shared)
}

/// Record before `rec`, following the page list; `rec`'s page must be latched
pub fn get_prev_rec(mtr: &mut Mtr, rec: RecPtr, hdr_page_no: PageNo, hdr_offset: usize) -> Result<Option<RecPtr>> {
    if let Some(offset) = page::page_get_prev_rec(mtr.frame(rec.page), rec.offset, hdr_page_no, hdr_offset) {
        return Ok(Some(RecPtr { page: rec.page, offset }));
    }
    last_rec_on_prev_page(mtr, rec.page, hdr_page_no, hdr_offset)
}
