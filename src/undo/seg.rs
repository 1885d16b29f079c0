//! Undo segment growth and release.

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::storage::base::{PageId, PageNo, SpaceId, FIL_NULL};
use crate::storage::flst::{self, FlstBase, FlstNode};
use crate::storage::fsp::{Direction, FsegAddr, ReservePurpose};
use crate::storage::mlog::MlogType;
use crate::storage::mtr::Mtr;
use crate::trx::UndoGuard;
use crate::undo::layout::{
    apply_logged, UndoOp, TRX_UNDO_FSEG_HEADER, TRX_UNDO_LAST_LOG, TRX_UNDO_PAGE_FREE,
    TRX_UNDO_PAGE_HDR, TRX_UNDO_PAGE_LIST, TRX_UNDO_PAGE_NODE, TRX_UNDO_SEG_HDR,
    TRX_UNDO_SEG_HDR_SIZE,
};
use crate::undo::mem::UndoHandle;
use crate::undo::rseg::{self, RollbackSegment, RsegGuard};
use crate::undo::UndoType;

pub fn fseg_addr(space: SpaceId, hdr_page_no: PageNo) -> FsegAddr {
    FsegAddr::new(PageId::new(space, hdr_page_no), TRX_UNDO_SEG_HDR + TRX_UNDO_FSEG_HEADER)
}

pub fn page_list(space: SpaceId, hdr_page_no: PageNo) -> FlstBase {
    FlstBase::new(PageId::new(space, hdr_page_no), TRX_UNDO_SEG_HDR + TRX_UNDO_PAGE_LIST)
}

pub fn page_node(page: PageId) -> FlstNode {
    FlstNode::new(page, TRX_UNDO_PAGE_HDR + TRX_UNDO_PAGE_NODE)
}

/// Create an undo segment and publish it in a free slot of the rollback
/// segment. Returns the slot and the header page.
pub fn seg_create(rseg: &RsegGuard<'_>, ty: UndoType, mtr: &mut Mtr) -> Result<(usize, PageNo)> {
    let sys = rseg.rseg().sys();
    let rseg_page = rseg.rseg().page_id();
    let space = rseg_page.space;
    mtr.x_latch(rseg_page)?;

    let Some(slot) = rseg::undo_find_free(mtr, rseg_page) else {
        warn!(
            space,
            rseg_page_no = rseg_page.page_no,
            "cannot find a free slot for an undo log, too many concurrently active transactions"
        );
        return Err(Error::NoFreeSlot);
    };

    if !sys.fsp().reserve_free_extents(space, 2, ReservePurpose::Undo) {
        return Err(Error::OutOfSpace);
    }
    let created = sys.fsp().create_segment(space, TRX_UNDO_SEG_HDR + TRX_UNDO_FSEG_HEADER, mtr);
    sys.fsp().release_free_extents(space, 2);
    let page_no = created?.ok_or(Error::OutOfSpace)?;

    let page = PageId::new(space, page_no);
    apply_logged(mtr, page, &UndoOp::PageInit { ty });
    mtr.write_ulint(
        page,
        TRX_UNDO_PAGE_HDR + TRX_UNDO_PAGE_FREE,
        (TRX_UNDO_SEG_HDR + TRX_UNDO_SEG_HDR_SIZE) as u32,
        MlogType::TwoBytes,
    );
    mtr.write_ulint(page, TRX_UNDO_SEG_HDR + TRX_UNDO_LAST_LOG, 0, MlogType::TwoBytes);

    let list = page_list(space, page_no);
    flst::init(mtr, list);
    flst::add_last(mtr, list, page_node(page))?;

    rseg::set_nth_undo(mtr, rseg_page, slot, page_no);
    debug!(space, page_no, slot, ?ty, "created undo segment");
    Ok((slot, page_no))
}

/// Add a page to the end of an undo segment. The transaction undo mutex and
/// the rollback segment mutex are held through `g`.
pub fn add_page(g: &mut UndoGuard<'_>, undo: UndoHandle, mtr: &mut Mtr) -> Result<PageNo> {
    let rseg = g.rseg.rseg();
    if g.rseg.curr_size >= rseg.max_size() {
        return Err(Error::SegmentFull);
    }

    let obj = g.rseg.undos.expect(undo).clone();
    let hdr_page = PageId::new(obj.space, obj.hdr_page_no);
    mtr.x_latch(hdr_page)?;

    let fsp = rseg.sys().fsp();
    if !fsp.reserve_free_extents(obj.space, 1, ReservePurpose::Undo) {
        return Err(Error::OutOfSpace);
    }
    let allocated = fsp.alloc_page(
        fseg_addr(obj.space, obj.hdr_page_no),
        obj.top_page_no + 1,
        Direction::Up,
        mtr,
    );
    fsp.release_free_extents(obj.space, 1);
    let page_no = allocated?.ok_or(Error::OutOfSpace)?;

    let page = PageId::new(obj.space, page_no);
    apply_logged(mtr, page, &UndoOp::PageInit { ty: obj.ty });
    flst::add_last(mtr, page_list(obj.space, obj.hdr_page_no), page_node(page))?;

    let undo_obj = g.rseg.undos.expect_mut(undo);
    undo_obj.last_page_no = page_no;
    undo_obj.size += 1;
    g.rseg.curr_size += 1;
    debug!(space = obj.space, page_no, size = obj.size + 1, "added undo page");
    Ok(page_no)
}

/// Free a page other than the header page. Returns the new last page of the
/// segment. `in_history` pages are also debited from the history size.
pub fn free_page(
    rseg: &mut RsegGuard<'_>,
    in_history: bool,
    space: SpaceId,
    hdr_page_no: PageNo,
    page_no: PageNo,
    mtr: &mut Mtr,
) -> Result<PageNo> {
    assert_ne!(hdr_page_no, page_no, "the header page is only freed with its segment");
    let seg = rseg.rseg();
    let hdr_page = PageId::new(space, hdr_page_no);
    let page = PageId::new(space, page_no);
    mtr.x_latch(page)?;
    mtr.x_latch(hdr_page)?;

    let list = page_list(space, hdr_page_no);
    flst::remove(mtr, list, page_node(page))?;
    seg.sys().fsp().free_page(fseg_addr(space, hdr_page_no), page_no, mtr)?;
    let last = flst::last(mtr, list);

    rseg.curr_size -= 1;
    if in_history {
        let rseg_page = seg.page_id();
        mtr.x_latch(rseg_page)?;
        let hist_size = rseg::history_size(mtr, rseg_page);
        assert!(hist_size > 0, "history size underflow");
        rseg::set_history_size(mtr, rseg_page, hist_size - 1);
    }
    debug!(space, page_no, hdr_page_no, in_history, "freed undo page");
    Ok(last.page)
}

/// Free the last page of a segment during rollback
pub fn free_page_in_rollback(g: &mut UndoGuard<'_>, undo: UndoHandle, page_no: PageNo, mtr: &mut Mtr) -> Result<()> {
    let obj = g.rseg.undos.expect(undo).clone();
    assert_ne!(obj.hdr_page_no, page_no);
    let last = free_page(&mut g.rseg, false, obj.space, obj.hdr_page_no, page_no, mtr)?;
    let undo_obj = g.rseg.undos.expect_mut(undo);
    undo_obj.last_page_no = last;
    undo_obj.size -= 1;
    Ok(())
}

/// Free a whole undo segment, one bounded step per mini-transaction, then
/// clear its slot. Safe to call again after an interruption.
pub fn seg_free(rseg: &RollbackSegment, space: SpaceId, hdr_page_no: PageNo, slot: usize) -> Result<()> {
    let fseg = fseg_addr(space, hdr_page_no);
    loop {
        let guard = rseg.lock();
        let mut mtr = rseg.sys().mtr();
        mtr.x_latch(fseg.page)?;
        let finished = rseg.sys().fsp().free_segment_step(fseg, &mut mtr)?;
        if finished {
            mtr.x_latch(rseg.page_id())?;
            rseg::set_nth_undo(&mut mtr, rseg.page_id(), slot, FIL_NULL);
        }
        mtr.commit()?;
        drop(guard);
        if finished {
            debug!(space, hdr_page_no, slot, "freed undo segment");
            return Ok(());
        }
    }
}
