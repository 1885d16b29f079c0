//! Undo log segments for the flint storage engine.
//!
//! The crate keeps the undo logs of transactions on 16KB pages grouped into
//! undo segments, each segment published in a slot of a rollback segment.
//! Every page change goes through a mini-transaction ([`storage::Mtr`]) that
//! logs it as redo, and [`recv`] replays that redo after a crash.

pub mod config;
pub mod error;
pub mod recv;
pub mod storage;
pub mod trx;
pub mod undo;

pub use config::{Config, ForceRecovery};
pub use error::{Error, Result};
pub use trx::{SoleView, Transaction, TrxUndo, UndoGuard};
pub use undo::{RollbackSegment, UndoHandle, UndoList, UndoObject, UndoState, UndoSys, UndoType};
