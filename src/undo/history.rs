use crate::error::Result;
use crate::storage::base::{FIL_NULL, PageId};
use crate::storage::flst::{self, FlstNode};
use crate::storage::mlog::MlogType;
use crate::storage::mtr::Mtr;
use crate::trx::Transaction;
use crate::undo::layout::{TRX_UNDO_DEL_MARKS, TRX_UNDO_HISTORY_NODE, TRX_UNDO_TRX_NO};
use crate::undo::mem::UndoObject;
use crate::undo::rseg::{self, RollbackSegment};
use crate::undo::UndoState;

/// Purge-side registration of committed update undo logs
pub trait HistoryHook: Send + Sync {
    /// Called from update cleanup with the rollback segment mutex held and
    /// the header page latched exclusive in `mtr`.
    fn add_update_undo_to_history(
        &self,
        trx: &Transaction,
        rseg: &RollbackSegment,
        undo: &UndoObject,
        hdr_page: PageId,
        mtr: &mut Mtr,
    ) -> Result<()>;
}

/// Links the log header into the rollback segment's on-page history list
#[derive(Debug, Default, Clone, Copy)]
pub struct RsegHistory;

impl HistoryHook for RsegHistory {
    fn add_update_undo_to_history(
        &self,
        trx: &Transaction,
        rseg: &RollbackSegment,
        undo: &UndoObject,
        hdr_page: PageId,
        mtr: &mut Mtr,
    ) -> Result<()> {
        let rseg_page = rseg.page_id();
        mtr.x_latch(rseg_page)?;
        mtr.x_latch(hdr_page)?;

        // A cached segment stays in its slot; otherwise purge owns the pages now
        if undo.state != UndoState::Cached {
            rseg::set_nth_undo(mtr, rseg_page, undo.id, FIL_NULL);
            let hist_size = rseg::history_size(mtr, rseg_page);
            rseg::set_history_size(mtr, rseg_page, hist_size + undo.size);
        }

        flst::add_first(
            mtr,
            rseg::history_base(rseg_page),
            FlstNode::new(hdr_page, undo.hdr_offset + TRX_UNDO_HISTORY_NODE),
        )?;

        mtr.write_u64(hdr_page, undo.hdr_offset + TRX_UNDO_TRX_NO, trx.no());
        if !undo.del_marks {
            mtr.write_ulint(hdr_page, undo.hdr_offset + TRX_UNDO_DEL_MARKS, 0, MlogType::TwoBytes);
        }
        Ok(())
    }
}
