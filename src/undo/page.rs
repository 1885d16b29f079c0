//! Undo records on a single page.
//!
//! ```text
//! | next: 2 | type_cmpl: 1 | undo_no (much compressed) | payload ... | start: 2 |
//! ```
//!
//! `next` is the offset just past the record, `start` the offset of the
//! record itself, so a page can be walked in both directions. Records of one
//! log lie between the log's start and end offsets on each page: on the
//! header page that is `log_start` up to the next log header (or `free`),
//! on other pages the first byte after the page header up to `free`.

use crate::storage::base::{PageNo, UndoNo, FIL_PAGE_OFFSET};
use crate::storage::mach;
use crate::undo::layout::{
    log_hdr_field, page_free, TRX_UNDO_LOG_START, TRX_UNDO_NEXT_LOG, TRX_UNDO_PAGE_HDR,
    TRX_UNDO_PAGE_HDR_SIZE, TRX_UNDO_PAGE_USABLE_END,
};

/// Record type and compilation info byte marking a delete-marked record
pub const TRX_UNDO_DEL_MARK_REC: u8 = 14;

/// Bytes a record takes on the page besides its body
pub const TRX_UNDO_REC_OVERHEAD: usize = 4;

fn page_no(page: &[u8]) -> PageNo {
    mach::read_4(page, FIL_PAGE_OFFSET)
}

pub fn page_get_start(page: &[u8], hdr_page_no: PageNo, hdr_offset: usize) -> usize {
    if page_no(page) == hdr_page_no {
        log_hdr_field(page, hdr_offset, TRX_UNDO_LOG_START)
    } else {
        TRX_UNDO_PAGE_HDR + TRX_UNDO_PAGE_HDR_SIZE
    }
}

pub fn page_get_end(page: &[u8], hdr_page_no: PageNo, hdr_offset: usize) -> usize {
    if page_no(page) == hdr_page_no {
        match log_hdr_field(page, hdr_offset, TRX_UNDO_NEXT_LOG) {
            0 => page_free(page),
            next => next,
        }
    } else {
        page_free(page)
    }
}

pub fn page_get_first_rec(page: &[u8], hdr_page_no: PageNo, hdr_offset: usize) -> Option<usize> {
    let start = page_get_start(page, hdr_page_no, hdr_offset);
    if start == page_get_end(page, hdr_page_no, hdr_offset) {
        return None;
    }
    Some(start)
}

pub fn page_get_last_rec(page: &[u8], hdr_page_no: PageNo, hdr_offset: usize) -> Option<usize> {
    let start = page_get_start(page, hdr_page_no, hdr_offset);
    let end = page_get_end(page, hdr_page_no, hdr_offset);
    if start == end {
        return None;
    }
    Some(mach::read_2(page, end - 2) as usize)
}

pub fn page_get_next_rec(page: &[u8], rec: usize, hdr_page_no: PageNo, hdr_offset: usize) -> Option<usize> {
    let end = page_get_end(page, hdr_page_no, hdr_offset);
    let next = mach::read_2(page, rec) as usize;
    if next == end {
        return None;
    }
    Some(next)
}

pub fn page_get_prev_rec(page: &[u8], rec: usize, hdr_page_no: PageNo, hdr_offset: usize) -> Option<usize> {
    let start = page_get_start(page, hdr_page_no, hdr_offset);
    if rec == start {
        return None;
    }
    Some(mach::read_2(page, rec - 2) as usize)
}

pub fn rec_type_cmpl(page: &[u8], rec: usize) -> u8 {
    page[rec + 2]
}

pub fn rec_undo_no(page: &[u8], rec: usize) -> UndoNo {
    match mach::parse_much_compressed(&page[rec + 3..]) {
        Some((undo_no, _)) => undo_no,
        None => panic!("undo record at {} has a truncated undo number", rec),
    }
}

/// Opaque payload following the undo number
pub fn rec_payload(page: &[u8], rec: usize) -> &[u8] {
    let next = mach::read_2(page, rec) as usize;
    let n = match mach::parse_much_compressed(&page[rec + 3..]) {
        Some((_, n)) => n,
        None => panic!("undo record at {} has a truncated undo number", rec),
    };
    &page[rec + 3 + n..next - 2]
}

/// Body of a record as stored between its two link fields
pub fn rec_body(type_cmpl: u8, undo_no: UndoNo, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + 11 + payload.len());
    body.push(type_cmpl);
    mach::write_much_compressed(&mut body, undo_no);
    body.extend_from_slice(payload);
    body
}

pub fn rec_fits(page: &[u8], body_len: usize) -> bool {
    page_free(page) + TRX_UNDO_REC_OVERHEAD + body_len <= TRX_UNDO_PAGE_USABLE_END
}
