//! Paged storage plumbing the undo subsystem runs on: page frames and the
//! buffer pool, mini-transactions and their redo records, the redo sinks,
//! file-based lists and the file-space manager.

pub mod base;
pub mod buffer;
pub mod flst;
pub mod fsp;
pub mod mach;
pub mod mlog;
pub mod mtr;
pub mod wal;

pub use base::{FilAddr, Lsn, PageId, PageNo, SpaceId, TrxId, UndoNo};
pub use buffer::{BufferPool, Frame, FrameRef, MemBufferPool};
pub use fsp::{FileSpace, MemFileSpace};
pub use mtr::{LatchMode, Mtr};
pub use wal::{LogGroup, LogSink, MemLog, WalFile};
