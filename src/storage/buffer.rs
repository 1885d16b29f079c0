use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::storage::base::{PageId, UNIV_PAGE_SIZE};

/// In-memory copy of one page
pub struct Frame {
    data: Box<[u8]>,
}

impl Frame {
    pub fn new() -> Self {
        Frame {
            data: vec![0u8; UNIV_PAGE_SIZE].into_boxed_slice(),
        }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for Frame {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Shared handle to a cached page; the lock is the page latch
pub type FrameRef = Arc<RwLock<Frame>>;

/// Page cache consumed by the undo subsystem.
/// Latching is done by the caller (normally a mini-transaction) on the returned frame.
pub trait BufferPool: Send + Sync {
    /// Return the frame for `id`, reading it in if needed.
    /// Pages never written before come back zero-filled.
    fn get(&self, id: PageId) -> Result<FrameRef>;
}

/// Buffer pool that keeps every page resident
#[derive(Default)]
pub struct MemBufferPool {
    frames: RwLock<HashMap<PageId, FrameRef>>,
}

impl MemBufferPool {
    pub fn new() -> Self {
        MemBufferPool {
            frames: RwLock::new(HashMap::new()),
        }
    }

    /// Copy of the page bytes, if the page was ever touched
    pub fn snapshot(&self, id: PageId) -> Option<Vec<u8>> {
        let frames = self.frames.read();
        frames.get(&id).map(|f| f.read().to_vec())
    }

    /// All resident page ids, sorted
    pub fn page_ids(&self) -> Vec<PageId> {
        let mut ids: Vec<PageId> = self.frames.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.frames.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BufferPool for MemBufferPool {
    fn get(&self, id: PageId) -> Result<FrameRef> {
        if let Some(frame) = self.frames.read().get(&id) {
            return Ok(frame.clone());
        }
        let mut frames = self.frames.write();
        let frame = frames
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(Frame::new())));
        Ok(frame.clone())
    }
}
