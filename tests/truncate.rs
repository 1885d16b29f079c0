mod common;

use common::{commit, TestEnv, SPACE};
use flint_undo::storage::flst;
use flint_undo::storage::{LatchMode, PageId, PageNo, UndoNo};
use flint_undo::undo::{append_record, get_first_rec, get_next_rec, page, seg, truncate_end, truncate_start};
use flint_undo::{RollbackSegment, Transaction, UndoType};

/// Undo numbers of the records of one log, grouped by page in list order
fn log_pages(rseg: &RollbackSegment, hdr_page_no: PageNo, hdr_offset: usize) -> Vec<(PageNo, Vec<UndoNo>)> {
    let mut mtr = rseg.sys().mtr();
    let mut pages: Vec<(PageNo, Vec<UndoNo>)> = Vec::new();
    let mut rec = get_first_rec(&mut mtr, SPACE, hdr_page_no, hdr_offset, LatchMode::Shared).unwrap();
    while let Some(r) = rec {
        let undo_no = page::rec_undo_no(mtr.frame(r.page), r.offset);
        match pages.last_mut() {
            Some((page_no, recs)) if *page_no == r.page.page_no => recs.push(undo_no),
            _ => pages.push((r.page.page_no, vec![undo_no])),
        }
        rec = get_next_rec(&mut mtr, r, hdr_page_no, hdr_offset).unwrap();
    }
    mtr.commit().unwrap();
    pages
}

fn page_list_len(rseg: &RollbackSegment, hdr_page_no: PageNo) -> u32 {
    let mut mtr = rseg.sys().mtr();
    mtr.s_latch(PageId::new(SPACE, hdr_page_no)).unwrap();
    let len = flst::len(&mtr, seg::page_list(SPACE, hdr_page_no));
    mtr.commit().unwrap();
    len
}

fn fill(trx: &Transaction, ty: UndoType, n_recs: u64, payload_len: usize) {
    let payload = vec![0xA5u8; payload_len];
    for n in 0..n_recs {
        append_record(trx, ty, 11, n, &payload).unwrap();
    }
}

#[test]
fn test_truncate_end_to_header_page() {
    let env = TestEnv::new();
    let rseg = env.create_rseg();
    let trx = Transaction::new(1, rseg.clone());
    fill(&trx, UndoType::Insert, 20, 2000);

    let handle = trx.undo_bindings().insert.unwrap();
    let before = rseg.undo(handle).unwrap();
    assert!(before.size >= 3);
    let curr_before = rseg.curr_size();
    let used_before = env.fsp.used_pages(SPACE);

    {
        let mut g = trx.lock_undo();
        truncate_end(&mut g, handle, 0).unwrap();
    }
    let after = rseg.undo(handle).unwrap();
    assert_eq!(after.size, 1);
    assert_eq!(after.last_page_no, after.hdr_page_no);
    assert!(after.empty);
    assert_eq!(rseg.curr_size(), curr_before - (before.size - 1));
    assert_eq!(env.fsp.used_pages(SPACE), used_before - (before.size as usize - 1));
    assert_eq!(page_list_len(&rseg, after.hdr_page_no), 1);
    assert!(log_pages(&rseg, after.hdr_page_no, after.hdr_offset).is_empty());

    // Nothing left to remove
    {
        let mut g = trx.lock_undo();
        truncate_end(&mut g, handle, 0).unwrap();
    }
    assert_eq!(rseg.undo(handle).unwrap(), after);
    assert_eq!(rseg.curr_size(), curr_before - (before.size - 1));
}

#[test]
fn test_truncate_end_keeps_records_below_limit() {
    let env = TestEnv::new();
    let rseg = env.create_rseg();
    let trx = Transaction::new(1, rseg.clone());
    fill(&trx, UndoType::Insert, 20, 2000);
    let handle = trx.undo_bindings().insert.unwrap();
    let before = rseg.undo(handle).unwrap();

    let pages = log_pages(&rseg, before.hdr_page_no, before.hdr_offset);
    let pages_needed = pages.iter().filter(|(_, recs)| recs[0] < 10).count() as u32;

    {
        let mut g = trx.lock_undo();
        truncate_end(&mut g, handle, 10).unwrap();
    }
    let after = rseg.undo(handle).unwrap();
    assert_eq!(after.size, pages_needed);
    assert_eq!(after.top_undo_no, 9);
    assert!(!after.empty);

    let remaining: Vec<UndoNo> = log_pages(&rseg, after.hdr_page_no, after.hdr_offset)
        .into_iter()
        .flat_map(|(_, recs)| recs)
        .collect();
    assert_eq!(remaining, (0..10).collect::<Vec<_>>());

    // Appending after a rollback to a savepoint continues on the last page
    let rec = append_record(&trx, UndoType::Insert, 11, 10, b"again").unwrap();
    assert_eq!(rec.page.page_no, after.last_page_no);
}

#[test]
fn test_truncate_end_above_max_is_noop() {
    let env = TestEnv::new();
    let rseg = env.create_rseg();
    let trx = Transaction::new(1, rseg.clone());
    fill(&trx, UndoType::Update, 12, 3000);
    let handle = trx.undo_bindings().update.unwrap();
    let before = rseg.undo(handle).unwrap();
    let pages_before = log_pages(&rseg, before.hdr_page_no, before.hdr_offset);

    {
        let mut g = trx.lock_undo();
        truncate_end(&mut g, handle, 12).unwrap();
        truncate_end(&mut g, handle, 1000).unwrap();
    }
    assert_eq!(rseg.undo(handle).unwrap(), before);
    assert_eq!(log_pages(&rseg, before.hdr_page_no, before.hdr_offset), pages_before);
}

#[test]
fn test_truncate_start_drops_leading_pages() {
    let env = TestEnv::new();
    let rseg = env.create_rseg();
    let trx = Transaction::new(1, rseg.clone());
    fill(&trx, UndoType::Update, 30, 2000);
    let obj = rseg.undo(trx.undo_bindings().update.unwrap()).unwrap();
    let (hdr_page_no, hdr_offset) = (obj.hdr_page_no, obj.hdr_offset);
    commit(&trx, 50).unwrap();

    let pages = log_pages(&rseg, hdr_page_no, hdr_offset);
    assert!(pages.len() >= 4);

    let mut prev_list_len = page_list_len(&rseg, hdr_page_no);
    let mut prev_curr = rseg.curr_size();
    let mut prev_hist = rseg.history_size().unwrap();
    assert_eq!(prev_hist, prev_list_len);

    for limit in [10, 17, 17, 25] {
        truncate_start(&mut rseg.lock(), SPACE, hdr_page_no, hdr_offset, limit).unwrap();

        let now = log_pages(&rseg, hdr_page_no, hdr_offset);
        let (_, first) = &now[0];
        assert!(first.iter().any(|&n| n >= limit), "first page lost its records at or above {}", limit);
        for (_, recs) in &now[1..] {
            assert!(recs.iter().all(|&n| n >= limit));
        }
        let all: Vec<UndoNo> = now.iter().flat_map(|(_, recs)| recs.iter().copied()).collect();
        let expected_tail: Vec<UndoNo> = (limit..30).collect();
        assert!(all.ends_with(&expected_tail));

        let list_len = page_list_len(&rseg, hdr_page_no);
        let dropped = prev_list_len - list_len;
        assert_eq!(prev_curr - rseg.curr_size(), dropped);
        assert_eq!(prev_hist - rseg.history_size().unwrap(), dropped);
        prev_list_len = list_len;
        prev_curr = rseg.curr_size();
        prev_hist = rseg.history_size().unwrap();
    }

    // Records of the first leading page are only hidden, the page stays
    assert!(page_list_len(&rseg, hdr_page_no) >= 2);
}

#[test]
fn test_truncate_start_zero_limit_is_noop() {
    let env = TestEnv::new();
    let rseg = env.create_rseg();
    let trx = Transaction::new(1, rseg.clone());
    fill(&trx, UndoType::Update, 20, 2000);
    let obj = rseg.undo(trx.undo_bindings().update.unwrap()).unwrap();
    commit(&trx, 9).unwrap();

    let before = log_pages(&rseg, obj.hdr_page_no, obj.hdr_offset);
    let groups_before = env.log.n_groups();
    truncate_start(&mut rseg.lock(), SPACE, obj.hdr_page_no, obj.hdr_offset, 0).unwrap();
    assert_eq!(log_pages(&rseg, obj.hdr_page_no, obj.hdr_offset), before);
    assert_eq!(env.log.n_groups(), groups_before);
}
