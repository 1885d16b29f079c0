//! File-based doubly linked lists.
//!
//! A list is anchored by a base node and threads through nodes embedded in
//! pages of one space. Links are file addresses, so walking a list always
//! goes back through the buffer pool. Every link update is redo logged.

use crate::error::Result;
use crate::storage::base::{FilAddr, PageId, SpaceId, FIL_ADDR_BYTE, FIL_ADDR_PAGE};
use crate::storage::mlog::MlogType;
use crate::storage::mtr::Mtr;

/// Base node: length, first and last node addresses
pub const FLST_LEN: usize = 0;
pub const FLST_FIRST: usize = 4;
pub const FLST_LAST: usize = 10;
pub const FLST_BASE_NODE_SIZE: usize = 16;

/// List node: previous and next node addresses
pub const FLST_PREV: usize = 0;
pub const FLST_NEXT: usize = 6;
pub const FLST_NODE_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlstBase {
    pub page: PageId,
    pub offset: usize,
}

impl FlstBase {
    pub fn new(page: PageId, offset: usize) -> Self {
        FlstBase { page, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlstNode {
    pub page: PageId,
    pub offset: usize,
}

impl FlstNode {
    pub fn new(page: PageId, offset: usize) -> Self {
        FlstNode { page, offset }
    }

    pub fn at(space: SpaceId, addr: FilAddr) -> Self {
        FlstNode {
            page: PageId::new(space, addr.page),
            offset: addr.boffset as usize,
        }
    }

    pub fn addr(&self) -> FilAddr {
        FilAddr::new(self.page.page_no, self.offset as u16)
    }
}

pub fn read_addr(mtr: &Mtr, page: PageId, offset: usize) -> FilAddr {
    FilAddr::new(
        mtr.read_4(page, offset + FIL_ADDR_PAGE),
        mtr.read_2(page, offset + FIL_ADDR_BYTE),
    )
}

pub fn write_addr(mtr: &mut Mtr, page: PageId, offset: usize, addr: FilAddr) {
    mtr.write_ulint(page, offset + FIL_ADDR_PAGE, addr.page, MlogType::FourBytes);
    mtr.write_ulint(page, offset + FIL_ADDR_BYTE, addr.boffset as u32, MlogType::TwoBytes);
}

pub fn init(mtr: &mut Mtr, base: FlstBase) {
    mtr.write_ulint(base.page, base.offset + FLST_LEN, 0, MlogType::FourBytes);
    write_addr(mtr, base.page, base.offset + FLST_FIRST, FilAddr::NULL);
    write_addr(mtr, base.page, base.offset + FLST_LAST, FilAddr::NULL);
}

pub fn len(mtr: &Mtr, base: FlstBase) -> u32 {
    mtr.read_4(base.page, base.offset + FLST_LEN)
}

pub fn first(mtr: &Mtr, base: FlstBase) -> FilAddr {
    read_addr(mtr, base.page, base.offset + FLST_FIRST)
}

pub fn last(mtr: &Mtr, base: FlstBase) -> FilAddr {
    read_addr(mtr, base.page, base.offset + FLST_LAST)
}

pub fn next(mtr: &Mtr, node: FlstNode) -> FilAddr {
    read_addr(mtr, node.page, node.offset + FLST_NEXT)
}

pub fn prev(mtr: &Mtr, node: FlstNode) -> FilAddr {
    read_addr(mtr, node.page, node.offset + FLST_PREV)
}

fn set_len(mtr: &mut Mtr, base: FlstBase, len: u32) {
    mtr.write_ulint(base.page, base.offset + FLST_LEN, len, MlogType::FourBytes);
}

fn add_to_empty(mtr: &mut Mtr, base: FlstBase, node: FlstNode) {
    debug_assert_eq!(len(mtr, base), 0);
    write_addr(mtr, base.page, base.offset + FLST_FIRST, node.addr());
    write_addr(mtr, base.page, base.offset + FLST_LAST, node.addr());
    write_addr(mtr, node.page, node.offset + FLST_PREV, FilAddr::NULL);
    write_addr(mtr, node.page, node.offset + FLST_NEXT, FilAddr::NULL);
    set_len(mtr, base, 1);
}

/// Insert `node` right after `after`
fn insert_after(mtr: &mut Mtr, base: FlstBase, after: FlstNode, node: FlstNode) -> Result<()> {
    let space = base.page.space;
    let old_next = next(mtr, after);

    write_addr(mtr, node.page, node.offset + FLST_PREV, after.addr());
    write_addr(mtr, node.page, node.offset + FLST_NEXT, old_next);

    if old_next.is_null() {
        write_addr(mtr, base.page, base.offset + FLST_LAST, node.addr());
    } else {
        let next_node = FlstNode::at(space, old_next);
        mtr.x_latch(next_node.page)?;
        write_addr(mtr, next_node.page, next_node.offset + FLST_PREV, node.addr());
    }
    write_addr(mtr, after.page, after.offset + FLST_NEXT, node.addr());

    let n = len(mtr, base);
    set_len(mtr, base, n + 1);
    Ok(())
}

/// Insert `node` right before `before`
fn insert_before(mtr: &mut Mtr, base: FlstBase, before: FlstNode, node: FlstNode) -> Result<()> {
    let space = base.page.space;
    let old_prev = prev(mtr, before);

    write_addr(mtr, node.page, node.offset + FLST_PREV, old_prev);
    write_addr(mtr, node.page, node.offset + FLST_NEXT, before.addr());

    if old_prev.is_null() {
        write_addr(mtr, base.page, base.offset + FLST_FIRST, node.addr());
    } else {
        let prev_node = FlstNode::at(space, old_prev);
        mtr.x_latch(prev_node.page)?;
        write_addr(mtr, prev_node.page, prev_node.offset + FLST_NEXT, node.addr());
    }
    write_addr(mtr, before.page, before.offset + FLST_PREV, node.addr());

    let n = len(mtr, base);
    set_len(mtr, base, n + 1);
    Ok(())
}

/// Append `node` at the end of the list. Both pages must be latched exclusive.
pub fn add_last(mtr: &mut Mtr, base: FlstBase, node: FlstNode) -> Result<()> {
    if len(mtr, base) == 0 {
        add_to_empty(mtr, base, node);
        return Ok(());
    }
    let last_node = FlstNode::at(base.page.space, last(mtr, base));
    mtr.x_latch(last_node.page)?;
    insert_after(mtr, base, last_node, node)
}

/// Prepend `node` to the list. Both pages must be latched exclusive.
pub fn add_first(mtr: &mut Mtr, base: FlstBase, node: FlstNode) -> Result<()> {
    if len(mtr, base) == 0 {
        add_to_empty(mtr, base, node);
        return Ok(());
    }
    let first_node = FlstNode::at(base.page.space, first(mtr, base));
    mtr.x_latch(first_node.page)?;
    insert_before(mtr, base, first_node, node)
}

/// Unlink `node`; its own link fields are left as they were
pub fn remove(mtr: &mut Mtr, base: FlstBase, node: FlstNode) -> Result<()> {
    let space = base.page.space;
    let node_prev = prev(mtr, node);
    let node_next = next(mtr, node);

    if node_prev.is_null() {
        write_addr(mtr, base.page, base.offset + FLST_FIRST, node_next);
    } else {
        let p = FlstNode::at(space, node_prev);
        mtr.x_latch(p.page)?;
        write_addr(mtr, p.page, p.offset + FLST_NEXT, node_next);
    }

    if node_next.is_null() {
        write_addr(mtr, base.page, base.offset + FLST_LAST, node_prev);
    } else {
        let n = FlstNode::at(space, node_next);
        mtr.x_latch(n.page)?;
        write_addr(mtr, n.page, n.offset + FLST_PREV, node_prev);
    }

    let n = len(mtr, base);
    assert!(n > 0, "removing from an empty file list");
    set_len(mtr, base, n - 1);
    Ok(())
}
