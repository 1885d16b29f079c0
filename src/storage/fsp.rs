use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::storage::base::{
    PageId, PageNo, SpaceId, FSEG_HDR_OFFSET, FSEG_HDR_PAGE_NO, FSEG_HDR_SPACE,
};
use crate::storage::mlog::MlogType;
use crate::storage::mtr::Mtr;

/// Pages per extent
pub const FSP_EXTENT_SIZE: u32 = 64;

/// First page handed out in a fresh space; page 0 holds the space header
pub const FSP_FIRST_FREE_PAGE: PageNo = 1;

/// Pages returned to the space per `free_segment_step`, header page excluded
pub const FSEG_FREE_STEP_PAGES: usize = 4;

/// Why extents are being reserved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservePurpose {
    /// Ordinary allocation; keeps one extent in hand for other users
    Normal,
    /// Undo log allocation
    Undo,
}

/// Preferred direction when the hinted page is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    NoDir,
}

/// Where a segment's 10 byte file segment header lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsegAddr {
    pub page: PageId,
    pub offset: usize,
}

impl FsegAddr {
    pub fn new(page: PageId, offset: usize) -> Self {
        FsegAddr { page, offset }
    }
}

/// File-space manager used by the undo subsystem.
///
/// Every page a segment receives is latched exclusive in the caller's
/// mini-transaction and formatted with a logged `init_file_page`.
pub trait FileSpace: Send + Sync {
    /// Reserve `n` free extents. Returns false when the space cannot spare them.
    fn reserve_free_extents(&self, space: SpaceId, n: u32, purpose: ReservePurpose) -> bool;

    fn release_free_extents(&self, space: SpaceId, n: u32);

    /// Create a segment whose header is written at `fseg_offset` of its first page.
    /// Returns the first page, or `None` when the space is full.
    fn create_segment(&self, space: SpaceId, fseg_offset: usize, mtr: &mut Mtr) -> Result<Option<PageNo>>;

    /// Allocate one page to the segment, near `hint` when possible
    fn alloc_page(&self, seg: FsegAddr, hint: PageNo, dir: Direction, mtr: &mut Mtr) -> Result<Option<PageNo>>;

    /// Return a non-header page of the segment to the space
    fn free_page(&self, seg: FsegAddr, page_no: PageNo, mtr: &mut Mtr) -> Result<()>;

    /// Free a bounded amount of the segment. Returns true once the whole
    /// segment, header page included, is gone.
    fn free_segment_step(&self, seg: FsegAddr, mtr: &mut Mtr) -> Result<bool>;
}

struct Segment {
    header_page: PageNo,
    pages: BTreeSet<PageNo>,
}

struct SpaceState {
    size: u32,
    /// Lowest page never handed out
    high_water: PageNo,
    free: BTreeSet<PageNo>,
    reserved: u32,
    next_seg_id: u32,
    segments: HashMap<u32, Segment>,
}

impl SpaceState {
    fn new(size: u32) -> Self {
        SpaceState {
            size,
            high_water: FSP_FIRST_FREE_PAGE,
            free: BTreeSet::new(),
            reserved: 0,
            next_seg_id: 1,
            segments: HashMap::new(),
        }
    }

    fn available(&self) -> u32 {
        self.size.saturating_sub(self.high_water) + self.free.len() as u32
    }

    fn take(&mut self, page_no: PageNo) -> bool {
        if self.free.remove(&page_no) {
            return true;
        }
        if page_no == self.high_water && page_no < self.size {
            self.high_water += 1;
            return true;
        }
        false
    }

    fn alloc(&mut self, hint: Option<PageNo>, dir: Direction) -> Option<PageNo> {
        if let Some(hint) = hint {
            if self.take(hint) {
                return Some(hint);
            }
            let near = match dir {
                Direction::Up => self.free.range(hint..).next().copied(),
                Direction::Down => self.free.range(..hint).next_back().copied(),
                Direction::NoDir => None,
            };
            if let Some(page_no) = near {
                self.free.remove(&page_no);
                return Some(page_no);
            }
        }
        if self.high_water < self.size {
            self.high_water += 1;
            return Some(self.high_water - 1);
        }
        self.free.pop_first()
    }
}

/// File-space manager keeping extent and segment bookkeeping in memory
pub struct MemFileSpace {
    spaces: Mutex<HashMap<SpaceId, SpaceState>>,
}

impl MemFileSpace {
    pub fn new() -> Self {
        MemFileSpace {
            spaces: Mutex::new(HashMap::new()),
        }
    }

    /// Single space of `size` pages
    pub fn with_space(space: SpaceId, size: u32) -> Self {
        let fsp = Self::new();
        fsp.add_space(space, size);
        fsp
    }

    pub fn add_space(&self, space: SpaceId, size: u32) {
        self.spaces.lock().insert(space, SpaceState::new(size));
    }

    pub fn reserved_extents(&self, space: SpaceId) -> u32 {
        self.spaces.lock().get(&space).map_or(0, |s| s.reserved)
    }

    /// Pages that can still be handed out
    pub fn free_pages(&self, space: SpaceId) -> u32 {
        self.spaces.lock().get(&space).map_or(0, |s| s.available())
    }

    /// Pages currently owned by segments
    pub fn used_pages(&self, space: SpaceId) -> usize {
        self.spaces
            .lock()
            .get(&space)
            .map_or(0, |s| s.segments.values().map(|seg| seg.pages.len()).sum())
    }

    pub fn n_segments(&self, space: SpaceId) -> usize {
        self.spaces.lock().get(&space).map_or(0, |s| s.segments.len())
    }

    fn segment_id(seg: FsegAddr, mtr: &mut Mtr) -> Result<u32> {
        mtr.x_latch(seg.page)?;
        Ok(mtr.read_4(seg.page, seg.offset + FSEG_HDR_PAGE_NO))
    }
}

impl Default for MemFileSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSpace for MemFileSpace {
    fn reserve_free_extents(&self, space: SpaceId, n: u32, purpose: ReservePurpose) -> bool {
        let mut spaces = self.spaces.lock();
        let Some(state) = spaces.get_mut(&space) else {
            return false;
        };
        let margin = match purpose {
            ReservePurpose::Normal => 1,
            ReservePurpose::Undo => 0,
        };
        if (state.reserved + n + margin) * FSP_EXTENT_SIZE > state.available() {
            debug!(space, n, reserved = state.reserved, available = state.available(), "extent reservation refused");
            return false;
        }
        state.reserved += n;
        true
    }

    fn release_free_extents(&self, space: SpaceId, n: u32) {
        let mut spaces = self.spaces.lock();
        if let Some(state) = spaces.get_mut(&space) {
            assert!(state.reserved >= n, "releasing {} extents, only {} reserved", n, state.reserved);
            state.reserved -= n;
        }
    }

    fn create_segment(&self, space: SpaceId, fseg_offset: usize, mtr: &mut Mtr) -> Result<Option<PageNo>> {
        let (page_no, seg_id) = {
            let mut spaces = self.spaces.lock();
            let state = spaces.get_mut(&space).ok_or(Error::OutOfSpace)?;
            let Some(page_no) = state.alloc(None, Direction::NoDir) else {
                return Ok(None);
            };
            let seg_id = state.next_seg_id;
            state.next_seg_id += 1;
            state.segments.insert(
                seg_id,
                Segment {
                    header_page: page_no,
                    pages: BTreeSet::from([page_no]),
                },
            );
            (page_no, seg_id)
        };

        let id = PageId::new(space, page_no);
        mtr.x_latch(id)?;
        mtr.init_file_page(id);
        mtr.write_ulint(id, fseg_offset + FSEG_HDR_SPACE, space, MlogType::FourBytes);
        mtr.write_ulint(id, fseg_offset + FSEG_HDR_PAGE_NO, seg_id, MlogType::FourBytes);
        mtr.write_ulint(id, fseg_offset + FSEG_HDR_OFFSET, fseg_offset as u32, MlogType::TwoBytes);
        debug!(space, page_no, seg_id, "created file segment");
        Ok(Some(page_no))
    }

    fn alloc_page(&self, seg: FsegAddr, hint: PageNo, dir: Direction, mtr: &mut Mtr) -> Result<Option<PageNo>> {
        let seg_id = Self::segment_id(seg, mtr)?;
        let space = seg.page.space;
        let page_no = {
            let mut spaces = self.spaces.lock();
            let state = spaces.get_mut(&space).ok_or(Error::OutOfSpace)?;
            if !state.segments.contains_key(&seg_id) {
                error!(space, seg_id, "allocation from unknown file segment");
                panic!("file segment {} does not exist in space {}", seg_id, space);
            }
            let Some(page_no) = state.alloc(Some(hint), dir) else {
                return Ok(None);
            };
            if let Some(segment) = state.segments.get_mut(&seg_id) {
                segment.pages.insert(page_no);
            }
            page_no
        };

        let id = PageId::new(space, page_no);
        mtr.x_latch(id)?;
        mtr.init_file_page(id);
        Ok(Some(page_no))
    }

    fn free_page(&self, seg: FsegAddr, page_no: PageNo, mtr: &mut Mtr) -> Result<()> {
        let seg_id = Self::segment_id(seg, mtr)?;
        let space = seg.page.space;
        let mut spaces = self.spaces.lock();
        let state = spaces.get_mut(&space).ok_or(Error::OutOfSpace)?;
        let owned = match state.segments.get_mut(&seg_id) {
            Some(segment) => segment.header_page != page_no && segment.pages.remove(&page_no),
            None => false,
        };
        if !owned {
            error!(space, seg_id, page_no, "freeing a page the segment does not own");
            panic!("page {} is not a freeable page of segment {}", page_no, seg_id);
        }
        state.free.insert(page_no);
        Ok(())
    }

    fn free_segment_step(&self, seg: FsegAddr, mtr: &mut Mtr) -> Result<bool> {
        let seg_id = Self::segment_id(seg, mtr)?;
        let space = seg.page.space;
        let mut spaces = self.spaces.lock();
        let state = spaces.get_mut(&space).ok_or(Error::OutOfSpace)?;
        let Some(segment) = state.segments.get_mut(&seg_id) else {
            error!(space, seg_id, "stepping a freed file segment");
            panic!("file segment {} does not exist in space {}", seg_id, space);
        };

        let header_page = segment.header_page;
        let victims: Vec<PageNo> = segment
            .pages
            .iter()
            .copied()
            .filter(|&p| p != header_page)
            .take(FSEG_FREE_STEP_PAGES)
            .collect();

        if victims.is_empty() {
            state.segments.remove(&seg_id);
            state.free.insert(header_page);
            debug!(space, seg_id, header_page, "file segment freed");
            return Ok(true);
        }

        for page_no in &victims {
            segment.pages.remove(page_no);
        }
        state.free.extend(victims.iter().copied());
        debug!(space, seg_id, freed = victims.len(), "file segment free step");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::base::FIL_PAGE_OFFSET;
    use crate::storage::buffer::MemBufferPool;
    use crate::storage::wal::MemLog;

    const SEG_OFFSET: usize = 60;

    #[test]
    fn test_reservation_bounds() {
        let fsp = MemFileSpace::with_space(0, 4 * FSP_EXTENT_SIZE + 1);
        assert!(fsp.reserve_free_extents(0, 2, ReservePurpose::Undo));
        assert!(fsp.reserve_free_extents(0, 2, ReservePurpose::Undo));
        assert!(!fsp.reserve_free_extents(0, 1, ReservePurpose::Undo));
        fsp.release_free_extents(0, 4);
        assert!(!fsp.reserve_free_extents(0, 4, ReservePurpose::Normal));
        assert_eq!(fsp.reserved_extents(0), 0);
        assert!(!fsp.reserve_free_extents(7, 1, ReservePurpose::Undo));
    }

    #[test]
    fn test_segment_lifecycle() {
        let pool = MemBufferPool::new();
        let log = MemLog::new();
        let fsp = MemFileSpace::with_space(0, 1000);

        let mut mtr = Mtr::start(&pool, &log);
        let hdr = fsp.create_segment(0, SEG_OFFSET, &mut mtr).unwrap().unwrap();
        let seg = FsegAddr::new(PageId::new(0, hdr), SEG_OFFSET);
        assert_eq!(mtr.read_4(seg.page, FIL_PAGE_OFFSET), hdr);

        let mut pages = Vec::new();
        for _ in 0..6 {
            let last = pages.last().copied().unwrap_or(hdr);
            pages.push(fsp.alloc_page(seg, last + 1, Direction::Up, &mut mtr).unwrap().unwrap());
        }
        mtr.commit().unwrap();
        assert_eq!(pages, vec![hdr + 1, hdr + 2, hdr + 3, hdr + 4, hdr + 5, hdr + 6]);
        assert_eq!(fsp.used_pages(0), 7);

        let mut mtr = Mtr::start(&pool, &log);
        fsp.free_page(seg, hdr + 3, &mut mtr).unwrap();
        mtr.commit().unwrap();
        assert_eq!(fsp.used_pages(0), 6);

        let mut steps = 0;
        loop {
            steps += 1;
            let mut mtr = Mtr::start(&pool, &log);
            let done = fsp.free_segment_step(seg, &mut mtr).unwrap();
            mtr.commit().unwrap();
            if done {
                break;
            }
        }
        assert_eq!(steps, 3);
        assert_eq!(fsp.n_segments(0), 0);
        assert_eq!(fsp.used_pages(0), 0);
    }

    #[test]
    #[should_panic(expected = "not a freeable page")]
    fn test_free_header_page_panics() {
        let pool = MemBufferPool::new();
        let log = MemLog::new();
        let fsp = MemFileSpace::with_space(0, 100);
        let mut mtr = Mtr::start(&pool, &log);
        let hdr = fsp.create_segment(0, SEG_OFFSET, &mut mtr).unwrap().unwrap();
        let seg = FsegAddr::new(PageId::new(0, hdr), SEG_OFFSET);
        let _ = fsp.free_page(seg, hdr, &mut mtr);
    }
}
