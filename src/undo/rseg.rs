//! Rollback segments: the header page holding the undo slot table and the
//! history list base, and the in-memory state guarded by the segment mutex.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::storage::base::{PageId, PageNo, SpaceId, FIL_NULL, FSEG_PAGE_DATA, UNIV_PAGE_SIZE};
use crate::storage::flst::{self, FlstBase, FLST_BASE_NODE_SIZE};
use crate::storage::mlog::MlogType;
use crate::storage::mtr::Mtr;
use crate::undo::lifecycle::lists_init;
use crate::undo::mem::{UndoArena, UndoHandle, UndoList, UndoLists, UndoObject};
use crate::undo::UndoSys;

/// Rollback segment header, right after the file page header
pub const TRX_RSEG: usize = FSEG_PAGE_DATA;
pub const TRX_RSEG_MAX_SIZE: usize = 0;
/// Pages held by logs in the history list
pub const TRX_RSEG_HISTORY_SIZE: usize = 4;
pub const TRX_RSEG_HISTORY: usize = 8;
pub const TRX_RSEG_FSEG_HEADER: usize = 8 + FLST_BASE_NODE_SIZE;
pub const TRX_RSEG_UNDO_SLOTS: usize = TRX_RSEG_FSEG_HEADER + crate::storage::base::FSEG_HEADER_SIZE;

pub const TRX_RSEG_SLOT_SIZE: usize = 4;
pub const TRX_RSEG_N_SLOTS: usize = UNIV_PAGE_SIZE / 16;

pub fn history_base(page: PageId) -> FlstBase {
    FlstBase::new(page, TRX_RSEG + TRX_RSEG_HISTORY)
}

fn slot_offset(n: usize) -> usize {
    if n >= TRX_RSEG_N_SLOTS {
        error!(n, "rollback segment slot out of range");
        panic!("rollback segment slot {} out of range", n);
    }
    TRX_RSEG + TRX_RSEG_UNDO_SLOTS + n * TRX_RSEG_SLOT_SIZE
}

pub fn get_nth_undo(mtr: &Mtr, rseg_page: PageId, n: usize) -> PageNo {
    mtr.read_4(rseg_page, slot_offset(n))
}

pub fn set_nth_undo(mtr: &mut Mtr, rseg_page: PageId, n: usize, page_no: PageNo) {
    mtr.write_ulint(rseg_page, slot_offset(n), page_no, MlogType::FourBytes);
}

pub fn undo_find_free(mtr: &Mtr, rseg_page: PageId) -> Option<usize> {
    (0..TRX_RSEG_N_SLOTS).find(|&n| get_nth_undo(mtr, rseg_page, n) == FIL_NULL)
}

pub fn history_size(mtr: &Mtr, rseg_page: PageId) -> u32 {
    mtr.read_4(rseg_page, TRX_RSEG + TRX_RSEG_HISTORY_SIZE)
}

pub fn set_history_size(mtr: &mut Mtr, rseg_page: PageId, size: u32) {
    mtr.write_ulint(rseg_page, TRX_RSEG + TRX_RSEG_HISTORY_SIZE, size, MlogType::FourBytes);
}

pub fn max_size(mtr: &Mtr, rseg_page: PageId) -> u32 {
    mtr.read_4(rseg_page, TRX_RSEG + TRX_RSEG_MAX_SIZE)
}

/// Allocate and format a rollback segment header page.
/// Returns `None` when the space has no page left.
pub fn header_create(sys: &UndoSys, space: SpaceId, max_size: u32, mtr: &mut Mtr) -> Result<Option<PageNo>> {
    let Some(page_no) = sys.fsp().create_segment(space, TRX_RSEG + TRX_RSEG_FSEG_HEADER, mtr)? else {
        return Ok(None);
    };
    let page = PageId::new(space, page_no);

    mtr.write_ulint(page, TRX_RSEG + TRX_RSEG_MAX_SIZE, max_size, MlogType::FourBytes);
    set_history_size(mtr, page, 0);
    flst::init(mtr, history_base(page));
    for n in 0..TRX_RSEG_N_SLOTS {
        set_nth_undo(mtr, page, n, FIL_NULL);
    }
    Ok(Some(page_no))
}

/// State guarded by the rollback segment mutex
pub struct RsegInner {
    /// Pages held by this rollback segment's live undo segments and history
    pub curr_size: u32,
    pub undos: UndoArena,
    pub lists: UndoLists,
}

pub struct RollbackSegment {
    sys: Arc<UndoSys>,
    space: SpaceId,
    page_no: PageNo,
    max_size: u32,
    inner: Mutex<RsegInner>,
}

/// Held rollback segment mutex
pub struct RsegGuard<'a> {
    rseg: &'a RollbackSegment,
    inner: MutexGuard<'a, RsegInner>,
}

impl<'a> RsegGuard<'a> {
    pub fn rseg(&self) -> &'a RollbackSegment {
        self.rseg
    }
}

impl Deref for RsegGuard<'_> {
    type Target = RsegInner;

    fn deref(&self) -> &RsegInner {
        &self.inner
    }
}

impl DerefMut for RsegGuard<'_> {
    fn deref_mut(&mut self) -> &mut RsegInner {
        &mut self.inner
    }
}

impl RollbackSegment {
    /// Create a new rollback segment in `space` and load it
    pub fn create(sys: Arc<UndoSys>, space: SpaceId) -> Result<Arc<Self>> {
        let mut mtr = sys.mtr();
        let page_no = header_create(&sys, space, sys.config().rseg_max_size(), &mut mtr)?
            .ok_or(Error::OutOfSpace)?;
        mtr.commit()?;
        info!(space, page_no, "created rollback segment");
        Self::open(sys, space, page_no)
    }

    /// Load an existing rollback segment, rebuilding its undo objects from disk
    pub fn open(sys: Arc<UndoSys>, space: SpaceId, page_no: PageNo) -> Result<Arc<Self>> {
        let page = PageId::new(space, page_no);
        let (max_size, hist_size) = {
            let mut mtr = sys.mtr();
            mtr.s_latch(page)?;
            let sizes = (max_size(&mtr, page), history_size(&mtr, page));
            mtr.commit()?;
            sizes
        };

        let rseg = Arc::new(RollbackSegment {
            sys,
            space,
            page_no,
            max_size,
            inner: Mutex::new(RsegInner {
                curr_size: 0,
                undos: UndoArena::new(),
                lists: UndoLists::new(),
            }),
        });

        let live = lists_init(&rseg)?;
        let mut inner = rseg.lock();
        inner.curr_size = hist_size + live;
        info!(space, page_no, curr_size = inner.curr_size, history_size = hist_size, "opened rollback segment");
        drop(inner);
        Ok(rseg)
    }

    pub fn lock(&self) -> RsegGuard<'_> {
        RsegGuard {
            rseg: self,
            inner: self.inner.lock(),
        }
    }

    pub fn sys(&self) -> &UndoSys {
        &self.sys
    }

    pub fn space(&self) -> SpaceId {
        self.space
    }

    pub fn page_no(&self) -> PageNo {
        self.page_no
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(self.space, self.page_no)
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn curr_size(&self) -> u32 {
        self.inner.lock().curr_size
    }

    pub fn list_len(&self, list: UndoList) -> usize {
        self.inner.lock().lists.len(list)
    }

    /// Copy of a live undo object
    pub fn undo(&self, handle: UndoHandle) -> Option<UndoObject> {
        self.inner.lock().undos.get(handle).cloned()
    }

    /// Copies of the undo objects on `list`, head first
    pub fn undos_on(&self, list: UndoList) -> Vec<UndoObject> {
        let inner = self.inner.lock();
        inner
            .lists
            .iter(list)
            .filter_map(|h| inner.undos.get(h).cloned())
            .collect()
    }

    /// Persisted history size
    pub fn history_size(&self) -> Result<u32> {
        let mut mtr = self.sys.mtr();
        mtr.s_latch(self.page_id())?;
        let size = history_size(&mtr, self.page_id());
        mtr.commit()?;
        Ok(size)
    }

    /// Page number stored in slot `n`
    pub fn slot(&self, n: usize) -> Result<PageNo> {
        let mut mtr = self.sys.mtr();
        mtr.s_latch(self.page_id())?;
        let page_no = get_nth_undo(&mtr, self.page_id(), n);
        mtr.commit()?;
        Ok(page_no)
    }
}
