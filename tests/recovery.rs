mod common;

use std::fs::OpenOptions;
use std::sync::Arc;

use common::{assert_pools_equal, commit, page_bytes, rollback, sys_with_log, TestEnv, SPACE};
use flint_undo::recv::{recover, recover_filtered, recover_wal};
use flint_undo::storage::mlog::MlogType;
use flint_undo::storage::wal::WalEntryHeader;
use flint_undo::storage::{MemBufferPool, MemLog, Mtr, PageId, WalFile};
use flint_undo::undo::layout::{self, apply_logged, UndoOp, TRX_UNDO_FIRST_LOG_HDR, TRX_UNDO_PAGE_FREE, TRX_UNDO_PAGE_HDR};
use flint_undo::undo::{append_record, truncate_start, update_cleanup_by_discard};
use flint_undo::{Config, Error, RollbackSegment, SoleView, Transaction, UndoSys, UndoType};
use serial_test::serial;

/// Exercise every page-changing path of the undo subsystem
fn run_workload(sys: Arc<UndoSys>) -> Arc<RollbackSegment> {
    let rseg = RollbackSegment::create(sys, SPACE).unwrap();

    // Small insert log, cached on commit
    let t1 = Transaction::new(1, rseg.clone());
    append_record(&t1, UndoType::Insert, 11, 0, b"first row").unwrap();
    commit(&t1, 1).unwrap();

    // Large insert log, freed on commit
    let t2 = Transaction::new(2, rseg.clone());
    for n in 0..12 {
        append_record(&t2, UndoType::Insert, 11, n, &[2u8; 3000]).unwrap();
    }
    commit(&t2, 2).unwrap();

    // Small update log, cached and chained into the history
    let t3 = Transaction::new(3, rseg.clone());
    append_record(&t3, UndoType::Update, 14, 0, b"delete mark").unwrap();
    commit(&t3, 3).unwrap();

    // Large update log handed to purge, then partially truncated
    let t4 = Transaction::new(4, rseg.clone());
    for n in 0..20 {
        append_record(&t4, UndoType::Update, 12, n, &[4u8; 2000]).unwrap();
    }
    let big = rseg.undo(t4.undo_bindings().update.unwrap()).unwrap();
    commit(&t4, 4).unwrap();
    truncate_start(&mut rseg.lock(), SPACE, big.hdr_page_no, big.hdr_offset, 12).unwrap();

    // Update log discarded instead of being kept for purge
    let t5 = Transaction::new(5, rseg.clone());
    append_record(&t5, UndoType::Update, 12, 0, b"unseen").unwrap();
    {
        let mut g = t5.lock_undo();
        let view = SoleView::from_view_count(1).unwrap();
        let mtr = rseg.sys().mtr();
        update_cleanup_by_discard(&mut g, view, mtr).unwrap();
    }

    // Rolled back transaction with both kinds of undo
    let t6 = Transaction::new_dict_operation(6, rseg.clone(), 31);
    for n in 0..8 {
        append_record(&t6, UndoType::Insert, 11, n, &[6u8; 3000]).unwrap();
        append_record(&t6, UndoType::Update, 12, n + 8, &[6u8; 3000]).unwrap();
    }
    rollback(&t6, 6).unwrap();

    // Still active at the end, reusing cached segments
    let t7 = Transaction::new(7, rseg.clone());
    append_record(&t7, UndoType::Insert, 11, 0, b"pending").unwrap();
    append_record(&t7, UndoType::Update, 12, 1, b"pending").unwrap();

    rseg
}

#[test]
fn test_replay_header_creation() {
    let pool = MemBufferPool::new();
    let log = MemLog::new();
    let page = PageId::new(SPACE, 3);

    let mut mtr = Mtr::start(&pool, &log);
    mtr.x_latch(page).unwrap();
    apply_logged(&mut mtr, page, &UndoOp::PageInit { ty: UndoType::Update });
    mtr.write_ulint(page, TRX_UNDO_PAGE_HDR + TRX_UNDO_PAGE_FREE, TRX_UNDO_FIRST_LOG_HDR as u32, MlogType::TwoBytes);
    let first = apply_logged(&mut mtr, page, &UndoOp::HdrCreate { trx_id: 5 });
    let second = apply_logged(&mut mtr, page, &UndoOp::HdrCreate { trx_id: 9 });
    mtr.commit().unwrap();
    assert_eq!(first, TRX_UNDO_FIRST_LOG_HDR);
    assert_eq!(second, TRX_UNDO_FIRST_LOG_HDR + layout::TRX_UNDO_LOG_HDR_SIZE);

    let replay = MemBufferPool::new();
    let stats = recover(&replay, &log.groups()).unwrap();
    assert_eq!(stats.groups, 1);
    assert_eq!(stats.applied, 4);
    assert_eq!(page_bytes(&replay, page), page_bytes(&pool, page));

    let frame = page_bytes(&replay, page);
    assert_eq!(layout::last_log(&frame), second);
    assert_eq!(layout::log_trx_id(&frame, second), 9);
    assert_eq!(layout::log_hdr_field(&frame, second, layout::TRX_UNDO_PREV_LOG), first);
    assert_eq!(layout::log_hdr_field(&frame, first, layout::TRX_UNDO_NEXT_LOG), second);
}

#[test]
fn test_replay_matches_workload() {
    let env = TestEnv::new();
    let rseg = run_workload(env.sys.clone());

    let replay = Arc::new(MemBufferPool::new());
    let stats = recover(replay.as_ref(), &env.log.groups()).unwrap();
    assert!(!stats.truncated);
    assert_eq!(stats.groups, env.log.n_groups());
    assert_pools_equal(&env.pool, &replay);

    // The replayed pages rebuild the same rollback segment
    let recovered = Arc::new(UndoSys::new(replay.clone(), Arc::new(MemLog::new()), env.fsp.clone(), Config::default()));
    let reopened = RollbackSegment::open(recovered, SPACE, rseg.page_no()).unwrap();
    assert_eq!(reopened.curr_size(), rseg.curr_size());
    assert_eq!(reopened.history_size().unwrap(), rseg.history_size().unwrap());

    // Replaying again changes nothing
    let again = recover(replay.as_ref(), &env.log.groups()).unwrap();
    assert_eq!(again.applied, 0);
    assert_pools_equal(&env.pool, &replay);
}

#[test]
fn test_replay_only_wanted_pages() {
    let env = TestEnv::new();
    let rseg = run_workload(env.sys.clone());
    let skipped_page = rseg.page_id();

    let replay = MemBufferPool::new();
    let stats = recover_filtered(&replay, &env.log.groups(), |page| page != skipped_page).unwrap();
    assert!(stats.skipped > 0);
    assert!(replay.snapshot(skipped_page).is_none());
    for id in env.pool.page_ids().into_iter().filter(|&id| id != skipped_page) {
        assert_eq!(page_bytes(&replay, id), page_bytes(&env.pool, id), "page {}", id);
    }
}

#[test]
#[serial]
fn test_wal_torn_tail_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("redo.log");
    let wal = Arc::new(WalFile::open(&path).unwrap());
    let (pool, sys) = sys_with_log(wal.clone(), 4096);
    let rseg = run_workload(sys);

    let snapshot: Vec<(PageId, Vec<u8>)> = pool
        .page_ids()
        .into_iter()
        .map(|id| (id, page_bytes(&pool, id)))
        .collect();
    let durable_end = wal.next_offset();

    let late = Transaction::new(100, rseg.clone());
    append_record(&late, UndoType::Insert, 11, 0, &[9u8; 200]).unwrap();
    assert!(wal.next_offset() > durable_end + 25);

    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(durable_end + 25)
        .unwrap();

    let replay = MemBufferPool::new();
    let stats = recover_wal(&path, &replay).unwrap();
    assert!(!stats.truncated);
    let mut ids: Vec<PageId> = snapshot.iter().map(|(id, _)| *id).collect();
    ids.extend(replay.page_ids());
    ids.sort();
    ids.dedup();
    for id in ids {
        let expected = snapshot
            .iter()
            .find(|(p, _)| *p == id)
            .map(|(_, bytes)| bytes.clone())
            .unwrap_or_else(|| vec![0u8; flint_undo::storage::base::UNIV_PAGE_SIZE]);
        assert!(page_bytes(&replay, id) == expected, "page {} differs from the durable state", id);
    }
}

#[test]
#[serial]
fn test_wal_checksum_mismatch_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("redo.log");
    let wal = Arc::new(WalFile::open(&path).unwrap());
    let (_pool, sys) = sys_with_log(wal.clone(), 1024);
    run_workload(sys);
    drop(wal);

    let mut bytes = std::fs::read(&path).unwrap();
    // Inside the payload of the first entry
    bytes[WalEntryHeader::SIZE + 1] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let replay = MemBufferPool::new();
    let err = recover_wal(&path, &replay).unwrap_err();
    assert!(matches!(err, Error::CorruptLog(_)));
}
