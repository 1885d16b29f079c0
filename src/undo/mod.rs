//! Undo log subsystem: undo pages and segments, per-transaction log headers,
//! the rollback segment slot table and the in-memory undo objects that
//! mirror live segments.
//!
//! Lock order is transaction undo mutex, then rollback segment mutex, then
//! page latches. [`crate::trx::Transaction::lock_undo`] takes the first two
//! in that order; page latches are only taken by mini-transactions started
//! afterwards.

pub mod history;
pub mod layout;
pub mod lifecycle;
pub mod mem;
pub mod nav;
pub mod page;
pub mod rseg;
pub mod seg;
pub mod truncate;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::storage::buffer::BufferPool;
use crate::storage::fsp::FileSpace;
use crate::storage::mtr::Mtr;
use crate::storage::wal::LogSink;

pub use history::{HistoryHook, RsegHistory};
pub use lifecycle::{
    append_record, assign_undo, insert_cleanup, lists_init, set_state_at_finish, update_cleanup,
    update_cleanup_by_discard,
};
pub use mem::{UndoHandle, UndoList, UndoObject};
pub use nav::{get_first_rec, get_next_rec, get_prev_rec, RecPtr};
pub use rseg::{RollbackSegment, RsegGuard};
pub use truncate::{truncate_end, truncate_start};

/// Kind of undo segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum UndoType {
    /// Undo of fresh inserts; only needed for rollback
    Insert = 1,
    /// Undo of updates and delete marks; also read by MVCC and purge
    Update = 2,
}

impl UndoType {
    pub fn from_u16(val: u16) -> Option<Self> {
        match val {
            1 => Some(UndoType::Insert),
            2 => Some(UndoType::Update),
            _ => None,
        }
    }
}

/// Segment state, mirrored between the segment header and the undo object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum UndoState {
    Active = 1,
    /// Kept for reuse by a later transaction
    Cached = 2,
    /// Insert undo to be freed right after commit
    ToFree = 3,
    /// Update undo handed to purge
    ToPurge = 4,
}

impl UndoState {
    pub fn from_u16(val: u16) -> Option<Self> {
        match val {
            1 => Some(UndoState::Active),
            2 => Some(UndoState::Cached),
            3 => Some(UndoState::ToFree),
            4 => Some(UndoState::ToPurge),
            _ => None,
        }
    }
}

/// Collaborators shared by every rollback segment
pub struct UndoSys {
    pool: Arc<dyn BufferPool>,
    log: Arc<dyn LogSink>,
    fsp: Arc<dyn FileSpace>,
    history: Arc<dyn HistoryHook>,
    config: Config,
}

impl UndoSys {
    pub fn new(
        pool: Arc<dyn BufferPool>,
        log: Arc<dyn LogSink>,
        fsp: Arc<dyn FileSpace>,
        config: Config,
    ) -> Self {
        Self::with_history(pool, log, fsp, Arc::new(RsegHistory), config)
    }

    pub fn with_history(
        pool: Arc<dyn BufferPool>,
        log: Arc<dyn LogSink>,
        fsp: Arc<dyn FileSpace>,
        history: Arc<dyn HistoryHook>,
        config: Config,
    ) -> Self {
        UndoSys {
            pool,
            log,
            fsp,
            history,
            config,
        }
    }

    /// Start a mini-transaction against this system's buffer pool and log
    pub fn mtr(&self) -> Mtr<'_> {
        Mtr::start(self.pool.as_ref(), self.log.as_ref())
    }

    pub fn pool(&self) -> &dyn BufferPool {
        self.pool.as_ref()
    }

    pub fn log(&self) -> &dyn LogSink {
        self.log.as_ref()
    }

    pub fn fsp(&self) -> &dyn FileSpace {
        self.fsp.as_ref()
    }

    pub fn history(&self) -> &dyn HistoryHook {
        self.history.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
