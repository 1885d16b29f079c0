//! Mini-transactions.
//!
//! A mini-transaction latches the pages it touches, buffers the redo records
//! describing its writes and makes both visible atomically at `commit`: the
//! group is appended to the log sink, every modified page is stamped with the
//! group's end LSN and only then are the latches released.

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};
use tracing::error;

use crate::error::Result;
use crate::storage::base::{Lsn, PageId, FIL_PAGE_LSN};
use crate::storage::buffer::{BufferPool, Frame};
use crate::storage::mach;
use crate::storage::mlog::{self, FieldWrite, MlogType};
use crate::storage::wal::LogSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchMode {
    Shared,
    Exclusive,
}

enum Latch {
    Shared(ArcRwLockReadGuard<RawRwLock, Frame>),
    Exclusive(ArcRwLockWriteGuard<RawRwLock, Frame>),
}

struct MemoSlot {
    id: PageId,
    latch: Latch,
    modified: bool,
}

pub struct Mtr<'a> {
    pool: &'a dyn BufferPool,
    log: &'a dyn LogSink,
    memo: Vec<MemoSlot>,
    log_buf: Vec<u8>,
    n_recs: usize,
}

impl<'a> Mtr<'a> {
    pub fn start(pool: &'a dyn BufferPool, log: &'a dyn LogSink) -> Self {
        Mtr {
            pool,
            log,
            memo: Vec::new(),
            log_buf: Vec::new(),
            n_recs: 0,
        }
    }

    /// Latch a page for the rest of this mini-transaction.
    /// Requesting a page already held returns the held latch; upgrading a
    /// shared latch to exclusive is a usage error.
    pub fn page_get(&mut self, id: PageId, mode: LatchMode) -> Result<()> {
        if let Some(slot) = self.memo.iter().find(|s| s.id == id) {
            if mode == LatchMode::Exclusive && matches!(slot.latch, Latch::Shared(_)) {
                error!(page = %id, "latch upgrade inside a mini-transaction");
                panic!("page {} latched shared, cannot upgrade to exclusive", id);
            }
            return Ok(());
        }

        let frame = self.pool.get(id)?;
        let latch = match mode {
            LatchMode::Shared => Latch::Shared(RwLock::read_arc(&frame)),
            LatchMode::Exclusive => Latch::Exclusive(RwLock::write_arc(&frame)),
        };
        self.memo.push(MemoSlot {
            id,
            latch,
            modified: false,
        });
        Ok(())
    }

    pub fn x_latch(&mut self, id: PageId) -> Result<()> {
        self.page_get(id, LatchMode::Exclusive)
    }

    pub fn s_latch(&mut self, id: PageId) -> Result<()> {
        self.page_get(id, LatchMode::Shared)
    }

    pub fn is_latched(&self, id: PageId) -> bool {
        self.memo.iter().any(|s| s.id == id)
    }

    pub fn frame(&self, id: PageId) -> &[u8] {
        match self.memo.iter().find(|s| s.id == id) {
            Some(MemoSlot { latch: Latch::Shared(g), .. }) => &g[..],
            Some(MemoSlot { latch: Latch::Exclusive(g), .. }) => &g[..],
            None => panic!("page {} is not latched by this mini-transaction", id),
        }
    }

    /// Mutable page access. The caller is responsible for logging the change.
    pub fn frame_mut(&mut self, id: PageId) -> &mut [u8] {
        match self.memo.iter_mut().find(|s| s.id == id) {
            Some(slot) => {
                slot.modified = true;
                match &mut slot.latch {
                    Latch::Exclusive(g) => &mut g[..],
                    Latch::Shared(_) => panic!("page {} is not latched exclusive", id),
                }
            }
            None => panic!("page {} is not latched by this mini-transaction", id),
        }
    }

    pub fn read_1(&self, id: PageId, offset: usize) -> u8 {
        mach::read_1(self.frame(id), offset)
    }

    pub fn read_2(&self, id: PageId, offset: usize) -> u16 {
        mach::read_2(self.frame(id), offset)
    }

    pub fn read_4(&self, id: PageId, offset: usize) -> u32 {
        mach::read_4(self.frame(id), offset)
    }

    pub fn read_8(&self, id: PageId, offset: usize) -> u64 {
        mach::read_8(self.frame(id), offset)
    }

    /// Logged write of a 1, 2 or 4 byte field
    pub fn write_ulint(&mut self, id: PageId, offset: usize, val: u32, ty: MlogType) {
        debug_assert!(matches!(
            ty,
            MlogType::OneByte | MlogType::TwoBytes | MlogType::FourBytes
        ));
        self.write_field(
            id,
            FieldWrite {
                ty,
                offset: offset as u16,
                value: val as u64,
            },
        );
    }

    /// Logged write of an 8 byte field
    pub fn write_u64(&mut self, id: PageId, offset: usize, val: u64) {
        self.write_field(
            id,
            FieldWrite {
                ty: MlogType::EightBytes,
                offset: offset as u16,
                value: val,
            },
        );
    }

    fn write_field(&mut self, id: PageId, w: FieldWrite) {
        w.apply(self.frame_mut(id));
        self.write_initial_log_record(w.ty, id);
        w.write_body(&mut self.log_buf);
    }

    /// Start a redo record; the body follows through the `catenate_*` calls
    pub fn write_initial_log_record(&mut self, ty: MlogType, id: PageId) {
        mlog::write_initial_record(&mut self.log_buf, ty, id);
        self.n_recs += 1;
    }

    pub fn catenate_compressed(&mut self, val: u32) {
        mach::write_compressed(&mut self.log_buf, val);
    }

    pub fn catenate_wide(&mut self, val: u64) {
        mach::write_wide_compressed(&mut self.log_buf, val);
    }

    pub fn catenate_u16(&mut self, val: u16) {
        self.log_buf.extend_from_slice(&val.to_be_bytes());
    }

    pub fn catenate_bytes(&mut self, bytes: &[u8]) {
        self.log_buf.extend_from_slice(bytes);
    }

    /// Format a page just handed out by the file-space manager
    pub fn init_file_page(&mut self, id: PageId) {
        mlog::init_file_page(self.frame_mut(id), id);
        self.write_initial_log_record(MlogType::InitFilePage, id);
    }

    pub fn n_log_recs(&self) -> usize {
        self.n_recs
    }

    /// Bytes of redo buffered so far
    pub fn log_len(&self) -> usize {
        self.log_buf.len()
    }

    /// Make the mini-transaction durable and release its latches.
    /// A mini-transaction that wrote no redo only releases latches.
    pub fn commit(mut self) -> Result<Lsn> {
        if self.log_buf.is_empty() {
            self.memo.clear();
            return Ok(self.log.current_lsn());
        }

        let end_lsn = self.log.append_group(&self.log_buf)?;
        for slot in self.memo.iter_mut().filter(|s| s.modified) {
            if let Latch::Exclusive(g) = &mut slot.latch {
                mach::write_8(&mut g[..], FIL_PAGE_LSN, end_lsn);
            }
        }
        // Latches released in reverse acquisition order
        while self.memo.pop().is_some() {}
        Ok(end_lsn)
    }
}
