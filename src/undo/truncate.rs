//! Truncation of an undo log from either end. Each page is handled in its
//! own mini-transaction.

use tracing::debug;

use crate::error::Result;
use crate::storage::base::{PageId, PageNo, SpaceId, UndoNo};
use crate::storage::mlog::MlogType;
use crate::storage::mtr::{LatchMode, Mtr};
use crate::trx::UndoGuard;
use crate::undo::layout::{TRX_UNDO_LOG_START, TRX_UNDO_PAGE_FREE, TRX_UNDO_PAGE_HDR};
use crate::undo::mem::UndoHandle;
use crate::undo::nav::get_first_rec;
use crate::undo::page;
use crate::undo::rseg::RsegGuard;
use crate::undo::seg;

/// Remove the records with `undo_no >= limit` from the end of `undo`,
/// freeing trailing pages that become empty. The header page is never freed.
pub fn truncate_end(g: &mut UndoGuard<'_>, undo: UndoHandle, limit: UndoNo) -> Result<()> {
    let rseg = g.rseg.rseg();
    loop {
        let mut mtr = rseg.sys().mtr();
        let obj = g.rseg.undos.expect(undo).clone();
        let last_page = PageId::new(obj.space, obj.last_page_no);
        mtr.x_latch(last_page)?;

        let mut trunc_here = None;
        let mut rec = page::page_get_last_rec(mtr.frame(last_page), obj.hdr_page_no, obj.hdr_offset);
        let page_emptied = loop {
            match rec {
                None => break obj.last_page_no != obj.hdr_page_no,
                Some(r) if page::rec_undo_no(mtr.frame(last_page), r) >= limit => {
                    trunc_here = Some(r);
                    rec = page::page_get_prev_rec(mtr.frame(last_page), r, obj.hdr_page_no, obj.hdr_offset);
                }
                Some(_) => break false,
            }
        };

        if page_emptied {
            seg::free_page_in_rollback(g, undo, obj.last_page_no, &mut mtr)?;
            mtr.commit()?;
            continue;
        }

        if let Some(offset) = trunc_here {
            mtr.write_ulint(last_page, TRX_UNDO_PAGE_HDR + TRX_UNDO_PAGE_FREE, offset as u32, MlogType::TwoBytes);
        }
        refresh_top(g, undo, last_page, &mtr);
        mtr.commit()?;
        debug!(space = obj.space, hdr_page_no = obj.hdr_page_no, limit, "truncated undo log end");
        return Ok(());
    }
}

/// Point the top record of `undo` at the last surviving record
fn refresh_top(g: &mut UndoGuard<'_>, undo: UndoHandle, last_page: PageId, mtr: &Mtr) {
    let obj = g.rseg.undos.expect_mut(undo);
    let frame = mtr.frame(last_page);
    match page::page_get_last_rec(frame, obj.hdr_page_no, obj.hdr_offset) {
        Some(rec) => {
            obj.empty = false;
            obj.top_page_no = last_page.page_no;
            obj.top_offset = rec;
            obj.top_undo_no = page::rec_undo_no(frame, rec);
        }
        None => {
            obj.empty = true;
            obj.top_page_no = last_page.page_no;
            obj.top_offset = 0;
            obj.top_undo_no = 0;
        }
    }
}

/// Mark the records of the log on its header page as gone by moving the
/// log start to the end of the log on that page
fn empty_header_page(mtr: &mut Mtr, space: SpaceId, hdr_page_no: PageNo, hdr_offset: usize) -> Result<()> {
    let page = PageId::new(space, hdr_page_no);
    mtr.x_latch(page)?;
    let end = page::page_get_end(mtr.frame(page), hdr_page_no, hdr_offset);
    mtr.write_ulint(page, hdr_offset + TRX_UNDO_LOG_START, end as u32, MlogType::TwoBytes);
    Ok(())
}

/// Remove whole leading pages of a log in the history list while every
/// record on them is below `limit`. Freed pages are debited from the
/// history size.
pub fn truncate_start(
    rseg: &mut RsegGuard<'_>,
    space: SpaceId,
    hdr_page_no: PageNo,
    hdr_offset: usize,
    limit: UndoNo,
) -> Result<()> {
    if limit == 0 {
        return Ok(());
    }

    loop {
        let mut mtr = rseg.rseg().sys().mtr();
        let Some(first) = get_first_rec(&mut mtr, space, hdr_page_no, hdr_offset, LatchMode::Exclusive)? else {
            mtr.commit()?;
            return Ok(());
        };

        let frame = mtr.frame(first.page);
        let Some(last) = page::page_get_last_rec(frame, hdr_page_no, hdr_offset) else {
            mtr.commit()?;
            return Ok(());
        };
        if page::rec_undo_no(frame, last) >= limit {
            mtr.commit()?;
            return Ok(());
        }

        if first.page.page_no == hdr_page_no {
            empty_header_page(&mut mtr, space, hdr_page_no, hdr_offset)?;
        } else {
            seg::free_page(rseg, true, space, hdr_page_no, first.page.page_no, &mut mtr)?;
        }
        mtr.commit()?;
        debug!(space, hdr_page_no, page_no = first.page.page_no, limit, "truncated undo log start");
    }
}
