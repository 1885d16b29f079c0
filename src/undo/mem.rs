use std::collections::VecDeque;

use tracing::error;

use crate::storage::base::{PageNo, SpaceId, TableId, TrxId, UndoNo};
use crate::undo::rseg::TRX_RSEG_N_SLOTS;
use crate::undo::{UndoState, UndoType};

/// In-memory control block of one undo segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoObject {
    /// Slot in the rollback segment
    pub id: usize,
    pub ty: UndoType,
    pub state: UndoState,
    /// Some record of the current log delete-marked a row
    pub del_marks: bool,
    pub trx_id: TrxId,
    pub dict_operation: bool,
    pub table_id: TableId,
    pub space: SpaceId,
    pub hdr_page_no: PageNo,
    /// Offset of the current log header on the header page
    pub hdr_offset: usize,
    pub last_page_no: PageNo,
    /// Pages in the segment
    pub size: u32,
    /// No record written to the current log yet
    pub empty: bool,
    pub top_page_no: PageNo,
    pub top_offset: usize,
    pub top_undo_no: UndoNo,
}

impl UndoObject {
    pub fn new(
        id: usize,
        ty: UndoType,
        trx_id: TrxId,
        space: SpaceId,
        page_no: PageNo,
        offset: usize,
    ) -> Self {
        check_slot(id);
        UndoObject {
            id,
            ty,
            state: UndoState::Active,
            del_marks: false,
            trx_id,
            dict_operation: false,
            table_id: 0,
            space,
            hdr_page_no: page_no,
            hdr_offset: offset,
            last_page_no: page_no,
            size: 1,
            empty: true,
            top_page_no: page_no,
            top_offset: 0,
            top_undo_no: 0,
        }
    }

    /// Rebind a cached object to a new transaction
    pub fn init_for_reuse(&mut self, trx_id: TrxId, offset: usize) {
        check_slot(self.id);
        self.state = UndoState::Active;
        self.del_marks = false;
        self.trx_id = trx_id;
        self.dict_operation = false;
        self.hdr_offset = offset;
        self.empty = true;
    }
}

pub(crate) fn check_slot(id: usize) {
    if id >= TRX_RSEG_N_SLOTS {
        error!(id, "undo slot id out of range");
        panic!("undo slot id {} out of range", id);
    }
}

/// Generation-checked reference to an [`UndoObject`] in an [`UndoArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UndoHandle {
    index: u32,
    generation: u32,
}

enum Entry {
    Occupied { generation: u32, obj: UndoObject },
    Vacant { generation: u32 },
}

/// Owner of the undo objects of one rollback segment
#[derive(Default)]
pub struct UndoArena {
    entries: Vec<Entry>,
    vacant: Vec<u32>,
}

impl UndoArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, obj: UndoObject) -> UndoHandle {
        if let Some(index) = self.vacant.pop() {
            let entry = &mut self.entries[index as usize];
            let generation = match entry {
                Entry::Vacant { generation } => *generation + 1,
                Entry::Occupied { .. } => unreachable!("vacant list points at a live entry"),
            };
            *entry = Entry::Occupied { generation, obj };
            return UndoHandle { index, generation };
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry::Occupied { generation: 0, obj });
        UndoHandle { index, generation: 0 }
    }

    pub fn get(&self, handle: UndoHandle) -> Option<&UndoObject> {
        match self.entries.get(handle.index as usize) {
            Some(Entry::Occupied { generation, obj }) if *generation == handle.generation => Some(obj),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: UndoHandle) -> Option<&mut UndoObject> {
        match self.entries.get_mut(handle.index as usize) {
            Some(Entry::Occupied { generation, obj }) if *generation == handle.generation => Some(obj),
            _ => None,
        }
    }

    /// Free the object; later lookups through any copy of `handle` fail
    pub fn remove(&mut self, handle: UndoHandle) -> Option<UndoObject> {
        self.get(handle)?;
        let vacant = Entry::Vacant { generation: handle.generation };
        match std::mem::replace(&mut self.entries[handle.index as usize], vacant) {
            Entry::Occupied { obj, .. } => {
                self.vacant.push(handle.index);
                Some(obj)
            }
            Entry::Vacant { .. } => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len() - self.vacant.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Object behind `handle`; a stale handle is a fatal usage error
    pub fn expect(&self, handle: UndoHandle) -> &UndoObject {
        match self.get(handle) {
            Some(obj) => obj,
            None => {
                error!(?handle, "stale undo handle");
                panic!("undo handle {:?} does not refer to a live undo object", handle);
            }
        }
    }

    pub fn expect_mut(&mut self, handle: UndoHandle) -> &mut UndoObject {
        match self.get_mut(handle) {
            Some(obj) => obj,
            None => {
                error!(?handle, "stale undo handle");
                panic!("undo handle {:?} does not refer to a live undo object", handle);
            }
        }
    }
}

/// The four disjoint lists an undo object lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoList {
    ActiveInsert,
    ActiveUpdate,
    CachedInsert,
    CachedUpdate,
}

impl UndoList {
    pub fn active(ty: UndoType) -> Self {
        match ty {
            UndoType::Insert => UndoList::ActiveInsert,
            UndoType::Update => UndoList::ActiveUpdate,
        }
    }

    pub fn cached(ty: UndoType) -> Self {
        match ty {
            UndoType::Insert => UndoList::CachedInsert,
            UndoType::Update => UndoList::CachedUpdate,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
pub struct UndoLists {
    lists: [VecDeque<UndoHandle>; 4],
}

impl UndoLists {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_first(&mut self, list: UndoList, handle: UndoHandle) {
        self.lists[list.index()].push_front(handle);
    }

    pub fn add_last(&mut self, list: UndoList, handle: UndoHandle) {
        self.lists[list.index()].push_back(handle);
    }

    pub fn pop_first(&mut self, list: UndoList) -> Option<UndoHandle> {
        self.lists[list.index()].pop_front()
    }

    /// Unlink `handle`; it must be on `list`
    pub fn remove(&mut self, list: UndoList, handle: UndoHandle) {
        let members = &mut self.lists[list.index()];
        match members.iter().position(|h| *h == handle) {
            Some(pos) => {
                members.remove(pos);
            }
            None => {
                error!(?list, ?handle, "undo object missing from its list");
                panic!("undo object {:?} is not on list {:?}", handle, list);
            }
        }
    }

    pub fn contains(&self, list: UndoList, handle: UndoHandle) -> bool {
        self.lists[list.index()].contains(&handle)
    }

    pub fn len(&self, list: UndoList) -> usize {
        self.lists[list.index()].len()
    }

    pub fn iter(&self, list: UndoList) -> impl Iterator<Item = UndoHandle> + '_ {
        self.lists[list.index()].iter().copied()
    }
}
