#![allow(dead_code)]

use std::sync::Arc;

use flint_undo::storage::{LogSink, MemBufferPool, MemFileSpace, MemLog, PageId, SpaceId, TrxId};
use flint_undo::undo::{insert_cleanup, set_state_at_finish, truncate_end, update_cleanup};
use flint_undo::{Config, Result, RollbackSegment, Transaction, UndoSys};
use tracing_subscriber::EnvFilter;

pub const SPACE: SpaceId = 0;

/// In-memory buffer pool, redo log and file space wired into an `UndoSys`
pub struct TestEnv {
    pub pool: Arc<MemBufferPool>,
    pub log: Arc<MemLog>,
    pub fsp: Arc<MemFileSpace>,
    pub sys: Arc<UndoSys>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with(Config::default(), 4096)
    }

    /// Environment with `config` and a space of `space_size` pages
    pub fn with(config: Config, space_size: u32) -> Self {
        init_tracing();
        let pool = Arc::new(MemBufferPool::new());
        let log = Arc::new(MemLog::new());
        let fsp = Arc::new(MemFileSpace::with_space(SPACE, space_size));
        let sys = Arc::new(UndoSys::new(pool.clone(), log.clone(), fsp.clone(), config));
        TestEnv { pool, log, fsp, sys }
    }

    pub fn create_rseg(&self) -> Arc<RollbackSegment> {
        RollbackSegment::create(self.sys.clone(), SPACE).expect("create rollback segment")
    }

    /// A second system over the same pages with a different configuration
    pub fn reopen_with(&self, config: Config) -> Arc<UndoSys> {
        Arc::new(UndoSys::new(self.pool.clone(), self.log.clone(), self.fsp.clone(), config))
    }
}

/// Undo system whose redo goes to `log` instead of memory
pub fn sys_with_log(log: Arc<dyn LogSink>, space_size: u32) -> (Arc<MemBufferPool>, Arc<UndoSys>) {
    init_tracing();
    let pool = Arc::new(MemBufferPool::new());
    let fsp = Arc::new(MemFileSpace::with_space(SPACE, space_size));
    let sys = Arc::new(UndoSys::new(pool.clone(), log, fsp, Config::default()));
    (pool, sys)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// End `trx` as a commit: finish both undo logs, send the update log to the
/// history and release the insert log.
pub fn commit(trx: &Transaction, trx_no: TrxId) -> Result<()> {
    let bound = trx.undo_bindings();
    if let Some(update) = bound.update {
        trx.set_no(trx_no);
        let mut g = trx.lock_undo();
        let mut mtr = trx.rseg().sys().mtr();
        let hdr_page = set_state_at_finish(&mut g, update, &mut mtr)?;
        update_cleanup(&mut g, hdr_page, &mut mtr)?;
        mtr.commit()?;
    }
    if let Some(insert) = bound.insert {
        {
            let mut g = trx.lock_undo();
            let mut mtr = trx.rseg().sys().mtr();
            set_state_at_finish(&mut g, insert, &mut mtr)?;
            mtr.commit()?;
        }
        insert_cleanup(trx)?;
    }
    Ok(())
}

/// Undo everything `trx` wrote, then end it
pub fn rollback(trx: &Transaction, trx_no: TrxId) -> Result<()> {
    let bound = trx.undo_bindings();
    {
        let mut g = trx.lock_undo();
        for handle in [bound.insert, bound.update].into_iter().flatten() {
            truncate_end(&mut g, handle, 0)?;
        }
    }
    commit(trx, trx_no)
}

/// Page bytes, or a zero page if it was never touched
pub fn page_bytes(pool: &MemBufferPool, id: PageId) -> Vec<u8> {
    pool.snapshot(id)
        .unwrap_or_else(|| vec![0u8; flint_undo::storage::base::UNIV_PAGE_SIZE])
}

/// Assert that every page either pool has is identical in both
pub fn assert_pools_equal(expected: &MemBufferPool, actual: &MemBufferPool) {
    let mut ids = expected.page_ids();
    ids.extend(actual.page_ids());
    ids.sort();
    ids.dedup();
    for id in ids {
        assert!(
            page_bytes(expected, id) == page_bytes(actual, id),
            "page {} differs after replay",
            id
        );
    }
}
