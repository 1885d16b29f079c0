//! The slice of a transaction the undo subsystem needs: identity, commit
//! number, rollback segment and the undo objects bound to it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::storage::base::{TableId, TrxId};
use crate::undo::mem::UndoHandle;
use crate::undo::rseg::{RollbackSegment, RsegGuard};
use crate::undo::UndoType;

/// Undo objects bound to a transaction, at most one of each type
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrxUndo {
    pub insert: Option<UndoHandle>,
    pub update: Option<UndoHandle>,
}

impl TrxUndo {
    pub fn get(&self, ty: UndoType) -> Option<UndoHandle> {
        match ty {
            UndoType::Insert => self.insert,
            UndoType::Update => self.update,
        }
    }

    pub fn slot_mut(&mut self, ty: UndoType) -> &mut Option<UndoHandle> {
        match ty {
            UndoType::Insert => &mut self.insert,
            UndoType::Update => &mut self.update,
        }
    }
}

pub struct Transaction {
    id: TrxId,
    /// Commit number, 0 until assigned
    no: AtomicU64,
    rseg: Arc<RollbackSegment>,
    /// Table touched by a dictionary operation, if this is one
    dict_table: Option<TableId>,
    undo: Mutex<TrxUndo>,
}

impl Transaction {
    pub fn new(id: TrxId, rseg: Arc<RollbackSegment>) -> Self {
        Transaction {
            id,
            no: AtomicU64::new(0),
            rseg,
            dict_table: None,
            undo: Mutex::new(TrxUndo::default()),
        }
    }

    /// Transaction that alters the data dictionary for `table_id`
    pub fn new_dict_operation(id: TrxId, rseg: Arc<RollbackSegment>, table_id: TableId) -> Self {
        let mut trx = Self::new(id, rseg);
        trx.dict_table = Some(table_id);
        trx
    }

    pub fn id(&self) -> TrxId {
        self.id
    }

    pub fn no(&self) -> TrxId {
        self.no.load(Ordering::Acquire)
    }

    pub fn set_no(&self, no: TrxId) {
        self.no.store(no, Ordering::Release);
    }

    pub fn rseg(&self) -> &Arc<RollbackSegment> {
        &self.rseg
    }

    pub fn dict_table(&self) -> Option<TableId> {
        self.dict_table
    }

    /// Current undo bindings
    pub fn undo_bindings(&self) -> TrxUndo {
        *self.undo.lock()
    }

    /// Take the transaction undo mutex, then the rollback segment mutex
    pub fn lock_undo(&self) -> UndoGuard<'_> {
        let bound = self.undo.lock();
        let rseg = self.rseg.lock();
        UndoGuard {
            trx: self,
            bound,
            rseg,
        }
    }

    pub(crate) fn lock_bindings(&self) -> MutexGuard<'_, TrxUndo> {
        self.undo.lock()
    }
}

/// Transaction undo mutex and rollback segment mutex, held in lock order
pub struct UndoGuard<'a> {
    pub trx: &'a Transaction,
    pub bound: MutexGuard<'a, TrxUndo>,
    pub rseg: RsegGuard<'a>,
}

/// Proof from the view manager that exactly one read view exists system-wide
#[derive(Debug)]
pub struct SoleView {
    _private: (),
}

impl SoleView {
    pub fn from_view_count(n_views: usize) -> Option<Self> {
        (n_views == 1).then_some(SoleView { _private: () })
    }
}
