use crate::storage::base::{PageId, FIL_PAGE_OFFSET, FIL_PAGE_SPACE_ID};
use crate::storage::mach;

/// Redo record type tag (first byte of every record)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MlogType {
    /// One-byte field write
    OneByte = 1,
    /// Two-byte field write
    TwoBytes = 2,
    /// Four-byte field write
    FourBytes = 4,
    /// Eight-byte field write
    EightBytes = 8,
    /// Undo record appended to an undo page
    UndoInsert = 20,
    /// Undo page formatted
    UndoInit = 22,
    /// Latest log header popped off an undo segment
    UndoHdrDiscard = 23,
    /// Insert undo log header reinitialised in place
    UndoHdrReuse = 24,
    /// Undo log header appended
    UndoHdrCreate = 25,
    /// Page handed out by the file-space manager
    InitFilePage = 29,
}

impl MlogType {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(MlogType::OneByte),
            2 => Some(MlogType::TwoBytes),
            4 => Some(MlogType::FourBytes),
            8 => Some(MlogType::EightBytes),
            20 => Some(MlogType::UndoInsert),
            22 => Some(MlogType::UndoInit),
            23 => Some(MlogType::UndoHdrDiscard),
            24 => Some(MlogType::UndoHdrReuse),
            25 => Some(MlogType::UndoHdrCreate),
            29 => Some(MlogType::InitFilePage),
            _ => None,
        }
    }

    pub fn is_nbytes(&self) -> bool {
        matches!(
            self,
            MlogType::OneByte | MlogType::TwoBytes | MlogType::FourBytes | MlogType::EightBytes
        )
    }
}

/// Encode the record prefix: type, compressed space id, compressed page number
pub fn write_initial_record(out: &mut Vec<u8>, ty: MlogType, page: PageId) {
    out.push(ty as u8);
    mach::write_compressed(out, page.space);
    mach::write_compressed(out, page.page_no);
}

/// Parse the record prefix. The type byte is returned raw so the caller can
/// tell an unknown tag apart from a truncated record.
pub fn parse_initial_record(buf: &[u8]) -> Option<(u8, PageId, usize)> {
    let ty = *buf.first()?;
    let (space, n1) = mach::parse_compressed(&buf[1..])?;
    let (page_no, n2) = mach::parse_compressed(&buf[1 + n1..])?;
    Some((ty, PageId::new(space, page_no), 1 + n1 + n2))
}

/// A fixed-width field write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldWrite {
    pub ty: MlogType,
    pub offset: u16,
    pub value: u64,
}

impl FieldWrite {
    pub fn apply(&self, frame: &mut [u8]) {
        let offset = self.offset as usize;
        match self.ty {
            MlogType::OneByte => mach::write_1(frame, offset, self.value as u8),
            MlogType::TwoBytes => mach::write_2(frame, offset, self.value as u16),
            MlogType::FourBytes => mach::write_4(frame, offset, self.value as u32),
            MlogType::EightBytes => mach::write_8(frame, offset, self.value),
            other => panic!("{:?} is not a field write", other),
        }
    }

    pub fn write_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.offset.to_be_bytes());
        if self.ty == MlogType::EightBytes {
            mach::write_wide_compressed(out, self.value);
        } else {
            mach::write_compressed(out, self.value as u32);
        }
    }

    pub fn parse(ty: MlogType, buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() < 2 {
            return None;
        }
        let offset = mach::read_2(buf, 0);
        let (value, n) = if ty == MlogType::EightBytes {
            mach::parse_wide_compressed(&buf[2..])?
        } else {
            let (v, n) = mach::parse_compressed(&buf[2..])?;
            (v as u64, n)
        };
        Some((FieldWrite { ty, offset, value }, 2 + n))
    }
}

/// Zero a page and stamp its identity into the file page header
pub fn init_file_page(frame: &mut [u8], page: PageId) {
    frame.fill(0);
    mach::write_4(frame, FIL_PAGE_OFFSET, page.page_no);
    mach::write_4(frame, FIL_PAGE_SPACE_ID, page.space);
}
