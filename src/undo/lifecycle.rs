//! Lifecycle of in-memory undo objects: binding to transactions, the state
//! decision at transaction end, cleanup, and the startup scan that rebuilds
//! the objects from the slot table.

use tracing::{debug, error, info};

use crate::config::ForceRecovery;
use crate::error::{Error, Result};
use crate::storage::base::{Lsn, PageId, PageNo, TableId, TrxId, UndoNo, FIL_NULL};
use crate::storage::flst;
use crate::storage::mlog::MlogType;
use crate::storage::mtr::Mtr;
use crate::trx::{SoleView, Transaction, UndoGuard};
use crate::undo::layout::{
    self, apply_logged, finish_state, UndoOp, TRX_UNDO_DICT_OPERATION, TRX_UNDO_PAGE_FREE,
    TRX_UNDO_PAGE_HDR, TRX_UNDO_PAGE_USABLE_END, TRX_UNDO_SEG_HDR, TRX_UNDO_STATE,
    TRX_UNDO_TABLE_ID,
};
use crate::undo::mem::{check_slot, UndoHandle, UndoList, UndoObject};
use crate::undo::nav::RecPtr;
use crate::undo::page::{self, TRX_UNDO_DEL_MARK_REC, TRX_UNDO_REC_OVERHEAD};
use crate::undo::rseg::{get_nth_undo, RollbackSegment, RsegGuard, TRX_RSEG_N_SLOTS};
use crate::undo::seg;
use crate::undo::{UndoState, UndoType};

/// Create a fresh undo segment and its in-memory object
fn create(rseg: &mut RsegGuard<'_>, ty: UndoType, trx_id: TrxId, mtr: &mut Mtr) -> Result<UndoHandle> {
    let owner = rseg.rseg();
    if rseg.curr_size >= owner.max_size() {
        return Err(Error::SegmentFull);
    }
    rseg.curr_size += 1;

    let (slot, page_no) = match seg::seg_create(rseg, ty, mtr) {
        Ok(created) => created,
        Err(e) => {
            rseg.curr_size -= 1;
            return Err(e);
        }
    };

    let page = PageId::new(owner.space(), page_no);
    let offset = apply_logged(mtr, page, &UndoOp::HdrCreate { trx_id });
    let obj = UndoObject::new(slot, ty, trx_id, owner.space(), page_no, offset);
    Ok(rseg.undos.insert(obj))
}

/// Pop a cached object of the wanted type and start a new log in it
fn reuse_cached(
    rseg: &mut RsegGuard<'_>,
    ty: UndoType,
    trx_id: TrxId,
    mtr: &mut Mtr,
) -> Result<Option<UndoHandle>> {
    let Some(handle) = rseg.lists.pop_first(UndoList::cached(ty)) else {
        return Ok(None);
    };
    let obj = rseg.undos.expect(handle).clone();
    assert_eq!(obj.size, 1, "cached undo segment spans several pages");
    assert_eq!(obj.hdr_page_no, obj.top_page_no);

    let page = PageId::new(obj.space, obj.hdr_page_no);
    mtr.x_latch(page)?;
    let offset = match ty {
        UndoType::Insert => apply_logged(mtr, page, &UndoOp::HdrReuse { trx_id }),
        UndoType::Update => {
            assert_eq!(layout::page_type(mtr.frame(page)), UndoType::Update as u16);
            apply_logged(mtr, page, &UndoOp::HdrCreate { trx_id })
        }
    };

    rseg.undos.expect_mut(handle).init_for_reuse(trx_id, offset);
    debug!(space = obj.space, page_no = obj.hdr_page_no, slot = obj.id, trx_id, "reused cached undo segment");
    Ok(Some(handle))
}

/// Stamp the table of a dictionary operation into the log header
fn mark_as_dict_operation(rseg: &mut RsegGuard<'_>, handle: UndoHandle, table_id: TableId, mtr: &mut Mtr) -> Result<()> {
    let obj = rseg.undos.expect_mut(handle);
    let page = PageId::new(obj.space, obj.hdr_page_no);
    mtr.x_latch(page)?;
    mtr.write_ulint(page, obj.hdr_offset + TRX_UNDO_DICT_OPERATION, 1, MlogType::TwoBytes);
    mtr.write_u64(page, obj.hdr_offset + TRX_UNDO_TABLE_ID, table_id);
    obj.dict_operation = true;
    obj.table_id = table_id;
    Ok(())
}

/// Bind an undo object of type `ty` to `trx`, reusing a cached segment when
/// one is available.
pub fn assign_undo(trx: &Transaction, ty: UndoType) -> Result<UndoHandle> {
    let mut g = trx.lock_undo();
    assign_undo_locked(&mut g, ty)
}

/// [`assign_undo`] with both mutexes already held
pub fn assign_undo_locked(g: &mut UndoGuard<'_>, ty: UndoType) -> Result<UndoHandle> {
    if let Some(bound) = g.bound.get(ty) {
        error!(trx_id = g.trx.id(), ?ty, ?bound, "transaction already has an undo object of this type");
        panic!("transaction {} already has a {:?} undo object", g.trx.id(), ty);
    }

    let trx_id = g.trx.id();
    let mut mtr = g.rseg.rseg().sys().mtr();

    let assigned = match reuse_cached(&mut g.rseg, ty, trx_id, &mut mtr) {
        Ok(Some(handle)) => Ok(handle),
        Ok(None) => create(&mut g.rseg, ty, trx_id, &mut mtr),
        Err(e) => Err(e),
    };
    let handle = match assigned {
        Ok(handle) => handle,
        Err(e) => {
            mtr.commit()?;
            return Err(e);
        }
    };

    g.rseg.lists.add_first(UndoList::active(ty), handle);
    *g.bound.slot_mut(ty) = Some(handle);

    if let Some(table_id) = g.trx.dict_table() {
        if let Err(e) = mark_as_dict_operation(&mut g.rseg, handle, table_id, &mut mtr) {
            mtr.commit()?;
            return Err(e);
        }
    }
    mtr.commit()?;
    Ok(handle)
}

/// Decide and persist the state of `undo` at transaction end.
/// Returns the header page of the segment.
pub fn set_state_at_finish(g: &mut UndoGuard<'_>, undo: UndoHandle, mtr: &mut Mtr) -> Result<PageId> {
    let obj = g.rseg.undos.expect_mut(undo);
    check_slot(obj.id);

    let page = PageId::new(obj.space, obj.hdr_page_no);
    mtr.x_latch(page)?;
    let free = mtr.read_2(page, TRX_UNDO_PAGE_HDR + TRX_UNDO_PAGE_FREE) as usize;
    let state = finish_state(obj.ty, obj.size, free);
    obj.state = state;
    mtr.write_ulint(page, TRX_UNDO_SEG_HDR + TRX_UNDO_STATE, state as u32, MlogType::TwoBytes);
    debug!(trx_id = obj.trx_id, slot = obj.id, ?state, size = obj.size, free, "undo segment finished");
    Ok(page)
}

/// Hand the update undo log of a committing transaction to the history list,
/// then cache or drop its in-memory object.
pub fn update_cleanup(g: &mut UndoGuard<'_>, hdr_page: PageId, mtr: &mut Mtr) -> Result<()> {
    let Some(handle) = g.bound.update else {
        error!(trx_id = g.trx.id(), "update cleanup without an update undo object");
        panic!("transaction {} has no update undo object", g.trx.id());
    };
    let obj = g.rseg.undos.expect(handle).clone();
    let owner = g.rseg.rseg();
    owner.sys().history().add_update_undo_to_history(g.trx, owner, &obj, hdr_page, mtr)?;

    g.rseg.lists.remove(UndoList::ActiveUpdate, handle);
    g.bound.update = None;
    match obj.state {
        UndoState::Cached => g.rseg.lists.add_first(UndoList::CachedUpdate, handle),
        UndoState::ToPurge => {
            g.rseg.undos.remove(handle);
        }
        other => {
            error!(slot = obj.id, state = ?other, "update undo cleanup in an unexpected state");
            panic!("update undo in slot {} cleaned up in state {:?}", obj.id, other);
        }
    }
    Ok(())
}

/// Drop the newest log header of the update undo instead of registering it
/// in the history, then recycle the segment. Only valid while exactly one
/// read view exists system-wide, which the `SoleView` token attests.
pub fn update_cleanup_by_discard(g: &mut UndoGuard<'_>, _view: SoleView, mut mtr: Mtr) -> Result<Lsn> {
    let Some(handle) = g.bound.update else {
        error!(trx_id = g.trx.id(), "discard cleanup without an update undo object");
        panic!("transaction {} has no update undo object", g.trx.id());
    };
    let obj = g.rseg.undos.expect_mut(handle);
    assert_eq!(obj.size, 1, "only a one-page update undo can be discarded");
    assert!(!obj.del_marks, "discarding an update undo with delete marks");

    let page = PageId::new(obj.space, obj.hdr_page_no);
    mtr.x_latch(page)?;
    apply_logged(&mut mtr, page, &UndoOp::HdrDiscard);
    obj.state = UndoState::Cached;
    let (space, hdr_page_no, trx_id) = (obj.space, obj.hdr_page_no, obj.trx_id);

    g.rseg.lists.remove(UndoList::ActiveUpdate, handle);
    g.rseg.lists.add_first(UndoList::CachedUpdate, handle);
    g.bound.update = None;
    let lsn = mtr.commit()?;
    debug!(space, page_no = hdr_page_no, trx_id, lsn, "discarded update undo log");
    Ok(lsn)
}

/// Release the insert undo of a finished transaction. A segment left in
/// `ToFree` is freed step by step outside the rollback segment mutex.
pub fn insert_cleanup(trx: &Transaction) -> Result<()> {
    let mut bound = trx.lock_bindings();
    let rseg = trx.rseg();
    let Some(handle) = bound.insert else {
        error!(trx_id = trx.id(), "insert cleanup without an insert undo object");
        panic!("transaction {} has no insert undo object", trx.id());
    };

    let obj = {
        let mut inner = rseg.lock();
        inner.lists.remove(UndoList::ActiveInsert, handle);
        bound.insert = None;
        let obj = inner.undos.expect(handle).clone();
        match obj.state {
            UndoState::Cached => {
                inner.lists.add_first(UndoList::CachedInsert, handle);
                return Ok(());
            }
            UndoState::ToFree => obj,
            other => {
                error!(slot = obj.id, state = ?other, "insert undo cleanup in an unexpected state");
                panic!("insert undo in slot {} cleaned up in state {:?}", obj.id, other);
            }
        }
    };

    seg::seg_free(rseg, obj.space, obj.hdr_page_no, obj.id)?;

    let mut inner = rseg.lock();
    assert!(inner.curr_size >= obj.size, "rollback segment size underflow");
    inner.curr_size -= obj.size;
    inner.undos.remove(handle);
    Ok(())
}

/// Rebuild the undo object for the segment in `slot` from its header page.
/// Returns the segment size in pages.
fn mem_create_at_db_start(rseg: &mut RsegGuard<'_>, slot: usize, page_no: PageNo, mtr: &mut Mtr) -> Result<u32> {
    check_slot(slot);
    let space = rseg.rseg().space();
    let page = PageId::new(space, page_no);
    mtr.x_latch(page)?;

    let frame = mtr.frame(page);
    let raw_type = layout::page_type(frame);
    let Some(ty) = UndoType::from_u16(raw_type) else {
        error!(space, page_no, slot, raw_type, "undo header page has an unknown type");
        panic!("undo page {} in slot {} has type {}", page, slot, raw_type);
    };
    let raw_state = layout::seg_state(frame);
    let Some(state) = UndoState::from_u16(raw_state) else {
        error!(space, page_no, slot, raw_state, "undo segment has an unknown state");
        panic!("undo segment {} in slot {} has state {}", page, slot, raw_state);
    };
    let offset = layout::last_log(frame);

    let list = seg::page_list(space, page_no);
    let size = flst::len(mtr, list);

    let mut obj = if offset == 0 {
        // Every log header was discarded; nothing to resume
        let mut obj = UndoObject::new(slot, ty, 0, space, page_no, 0);
        obj.state = state;
        obj.size = size;
        obj
    } else {
        let mut obj = UndoObject::new(slot, ty, layout::log_trx_id(frame, offset), space, page_no, offset);
        obj.dict_operation = mtr.read_2(page, offset + TRX_UNDO_DICT_OPERATION) != 0;
        obj.table_id = mtr.read_8(page, offset + TRX_UNDO_TABLE_ID);
        obj.state = state;
        obj.size = size;
        obj
    };

    if state != UndoState::ToFree && offset != 0 {
        let last = flst::last(mtr, list).page;
        obj.last_page_no = last;
        obj.top_page_no = last;

        let last_page = PageId::new(space, last);
        mtr.x_latch(last_page)?;
        let frame = mtr.frame(last_page);
        match page::page_get_last_rec(frame, page_no, offset) {
            Some(rec) => {
                obj.empty = false;
                obj.top_offset = rec;
                obj.top_undo_no = page::rec_undo_no(frame, rec);
            }
            None => obj.empty = true,
        }
    }

    let list = match state {
        UndoState::Cached => UndoList::cached(ty),
        _ => UndoList::active(ty),
    };
    debug!(space, page_no, slot, ?ty, ?state, size, "loaded undo segment");
    let handle = rseg.undos.insert(obj);
    rseg.lists.add_last(list, handle);
    Ok(size)
}

/// Rebuild the in-memory undo objects of `rseg` from its slot table.
/// Returns the total number of pages in live undo segments.
pub fn lists_init(rseg: &RollbackSegment) -> Result<u32> {
    if rseg.sys().config().force_recovery() == ForceRecovery::NoUndoLogScan {
        info!(space = rseg.space(), page_no = rseg.page_no(), "skipping undo log scan");
        return Ok(0);
    }

    let rseg_page = rseg.page_id();
    let occupied: Vec<(usize, PageNo)> = {
        let mut mtr = rseg.sys().mtr();
        mtr.s_latch(rseg_page)?;
        let slots = (0..TRX_RSEG_N_SLOTS)
            .map(|n| (n, get_nth_undo(&mtr, rseg_page, n)))
            .filter(|&(_, page_no)| page_no != FIL_NULL)
            .collect();
        mtr.commit()?;
        slots
    };

    let mut size = 0;
    for &(slot, page_no) in &occupied {
        let mut g = rseg.lock();
        let mut mtr = rseg.sys().mtr();
        size += mem_create_at_db_start(&mut g, slot, page_no, &mut mtr)?;
        mtr.commit()?;
    }
    info!(space = rseg.space(), page_no = rseg.page_no(), segments = occupied.len(), size, "undo lists initialised");
    Ok(size)
}

/// Append one undo record for `trx`, assigning an undo object of type `ty`
/// first if none is bound and growing the segment when the last page is full.
pub fn append_record(
    trx: &Transaction,
    ty: UndoType,
    type_cmpl: u8,
    undo_no: UndoNo,
    payload: &[u8],
) -> Result<RecPtr> {
    let body = page::rec_body(type_cmpl, undo_no, payload);
    if TRX_UNDO_SEG_HDR + TRX_UNDO_REC_OVERHEAD + body.len() > TRX_UNDO_PAGE_USABLE_END {
        return Err(Error::InvalidOperation(format!(
            "undo record of {} bytes cannot fit on an undo page",
            body.len()
        )));
    }
    let body_len = body.len();
    let op = UndoOp::RecInsert { body };

    let mut g = trx.lock_undo();
    let handle = match g.bound.get(ty) {
        Some(handle) => handle,
        None => assign_undo_locked(&mut g, ty)?,
    };

    let mut mtr = g.rseg.rseg().sys().mtr();
    loop {
        let (space, last_page_no) = {
            let obj = g.rseg.undos.expect(handle);
            (obj.space, obj.last_page_no)
        };
        let page = PageId::new(space, last_page_no);
        mtr.x_latch(page)?;

        if page::rec_fits(mtr.frame(page), body_len) {
            let offset = apply_logged(&mut mtr, page, &op);
            let obj = g.rseg.undos.expect_mut(handle);
            obj.empty = false;
            obj.top_page_no = last_page_no;
            obj.top_offset = offset;
            obj.top_undo_no = undo_no;
            if type_cmpl & 0x0F == TRX_UNDO_DEL_MARK_REC {
                obj.del_marks = true;
            }
            mtr.commit()?;
            return Ok(RecPtr { page, offset });
        }

        if let Err(e) = seg::add_page(&mut g, handle, &mut mtr) {
            mtr.commit()?;
            return Err(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::Config;
    use crate::storage::buffer::MemBufferPool;
    use crate::storage::fsp::MemFileSpace;
    use crate::storage::wal::MemLog;
    use crate::undo::UndoSys;

    fn rseg() -> Arc<RollbackSegment> {
        let sys = UndoSys::new(
            Arc::new(MemBufferPool::new()),
            Arc::new(MemLog::new()),
            Arc::new(MemFileSpace::with_space(0, 4096)),
            Config::default(),
        );
        RollbackSegment::create(Arc::new(sys), 0).unwrap()
    }

    #[test]
    fn test_dict_stamp_commits_with_assign() {
        let pool = Arc::new(MemBufferPool::new());
        let log = Arc::new(MemLog::new());
        let sys = UndoSys::new(
            pool.clone(),
            log.clone(),
            Arc::new(MemFileSpace::with_space(0, 4096)),
            Config::default(),
        );
        let rseg = RollbackSegment::create(Arc::new(sys), 0).unwrap();
        let groups_before = log.n_groups();

        let trx = Transaction::new_dict_operation(20, rseg.clone(), 77);
        let handle = assign_undo(&trx, UndoType::Update).unwrap();
        assert_eq!(log.n_groups(), groups_before + 1);
        let obj = rseg.undo(handle).unwrap();
        assert!(obj.dict_operation);

        let replay = MemBufferPool::new();
        crate::recv::recover(&replay, &log.groups()).unwrap();
        let page = PageId::new(0, obj.hdr_page_no);
        let frame = replay.snapshot(page).unwrap();
        assert_eq!(crate::storage::mach::read_2(&frame, obj.hdr_offset + TRX_UNDO_DICT_OPERATION), 1);
        assert_eq!(crate::storage::mach::read_8(&frame, obj.hdr_offset + TRX_UNDO_TABLE_ID), 77);
        assert_eq!(Some(frame), pool.snapshot(page));
    }

    #[test]
    fn test_assign_creates_then_reuses() {
        let rseg = rseg();
        let t1 = Transaction::new(10, rseg.clone());
        let h1 = assign_undo(&t1, UndoType::Insert).unwrap();
        assert_eq!(rseg.list_len(UndoList::ActiveInsert), 1);
        assert_eq!(rseg.curr_size(), 1);

        {
            let mut g = t1.lock_undo();
            let mut mtr = rseg.sys().mtr();
            set_state_at_finish(&mut g, h1, &mut mtr).unwrap();
            mtr.commit().unwrap();
        }
        insert_cleanup(&t1).unwrap();
        assert_eq!(rseg.list_len(UndoList::CachedInsert), 1);

        let t2 = Transaction::new(11, rseg.clone());
        let h2 = assign_undo(&t2, UndoType::Insert).unwrap();
        assert_eq!(h1, h2);
        let obj = rseg.undo(h2).unwrap();
        assert_eq!(obj.trx_id, 11);
        assert_eq!(obj.state, UndoState::Active);
        assert_eq!(rseg.list_len(UndoList::CachedInsert), 0);
        assert_eq!(rseg.curr_size(), 1);
    }

    #[test]
    #[should_panic(expected = "already has")]
    fn test_double_binding_panics() {
        let rseg = rseg();
        let trx = Transaction::new(1, rseg);
        assign_undo(&trx, UndoType::Update).unwrap();
        assign_undo(&trx, UndoType::Update).unwrap();
    }

    #[test]
    fn test_dict_operation_is_stamped() {
        let rseg = rseg();
        let trx = Transaction::new_dict_operation(3, rseg.clone(), 77);
        let h = assign_undo(&trx, UndoType::Update).unwrap();
        let obj = rseg.undo(h).unwrap();
        assert!(obj.dict_operation);
        assert_eq!(obj.table_id, 77);

        let mut mtr = rseg.sys().mtr();
        let page = PageId::new(obj.space, obj.hdr_page_no);
        mtr.s_latch(page).unwrap();
        assert_eq!(mtr.read_2(page, obj.hdr_offset + TRX_UNDO_DICT_OPERATION), 1);
        assert_eq!(mtr.read_8(page, obj.hdr_offset + TRX_UNDO_TABLE_ID), 77);
        mtr.commit().unwrap();
    }

    #[test]
    fn test_append_grows_segment() {
        let rseg = rseg();
        let trx = Transaction::new(5, rseg.clone());
        let payload = vec![0xAB; 4000];
        let mut last = None;
        for n in 0..8 {
            last = Some(append_record(&trx, UndoType::Update, 12, n, &payload).unwrap());
        }
        let h = trx.undo_bindings().update.unwrap();
        let obj = rseg.undo(h).unwrap();
        assert!(obj.size >= 2);
        assert_eq!(obj.top_undo_no, 7);
        assert_eq!(obj.top_page_no, obj.last_page_no);
        assert_eq!(Some(obj.top_offset), last.map(|r| r.offset));
        assert_eq!(rseg.curr_size(), obj.size);
    }

    #[test]
    fn test_oversized_record_is_rejected() {
        let rseg = rseg();
        let trx = Transaction::new(5, rseg.clone());
        let payload = vec![0; TRX_UNDO_PAGE_USABLE_END];
        let err = append_record(&trx, UndoType::Insert, 11, 0, &payload).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert!(trx.undo_bindings().insert.is_none());
    }

    #[test]
    fn test_delete_mark_sets_flag() {
        let rseg = rseg();
        let trx = Transaction::new(5, rseg.clone());
        append_record(&trx, UndoType::Update, 12, 0, b"x").unwrap();
        let h = trx.undo_bindings().update.unwrap();
        assert!(!rseg.undo(h).unwrap().del_marks);
        append_record(&trx, UndoType::Update, TRX_UNDO_DEL_MARK_REC | 0x20, 1, b"y").unwrap();
        assert!(rseg.undo(h).unwrap().del_marks);
    }
}
