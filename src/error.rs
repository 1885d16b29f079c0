use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Every slot of the rollback segment is occupied
    #[error("no free undo slot in rollback segment")]
    NoFreeSlot,

    /// The file-space manager could not reserve extents or hand out a page
    #[error("out of file space")]
    OutOfSpace,

    /// The rollback segment reached its configured maximum size
    #[error("rollback segment full")]
    SegmentFull,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt redo log: {0}")]
    CorruptLog(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Resource exhaustion the transaction layer may surface and retry
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Error::NoFreeSlot | Error::OutOfSpace | Error::SegmentFull)
    }
}
