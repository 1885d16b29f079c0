use std::process::ExitCode;
use std::sync::Arc;

use flint_undo::recv;
use flint_undo::storage::{MemBufferPool, MemFileSpace, MemLog, PageNo, SpaceId};
use flint_undo::undo::UndoList;
use flint_undo::{Config, RollbackSegment, UndoSys};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn parse_rseg(arg: &str) -> Option<(SpaceId, PageNo)> {
    let (space, page_no) = arg.split_once(':')?;
    Some((space.parse().ok()?, page_no.parse().ok()?))
}

fn run(config: Config, redo_path: &str, rseg_at: Option<(SpaceId, PageNo)>) -> flint_undo::Result<()> {
    let pool = Arc::new(MemBufferPool::new());
    let stats = recv::recover_wal(redo_path, pool.as_ref())?;
    println!(
        "replayed {} groups: {} records applied, {} skipped, end lsn {}{}",
        stats.groups,
        stats.applied,
        stats.skipped,
        stats.end_lsn,
        if stats.truncated { " (log truncated)" } else { "" }
    );

    let Some((space, page_no)) = rseg_at else {
        return Ok(());
    };
    let sys = UndoSys::new(pool, Arc::new(MemLog::new()), Arc::new(MemFileSpace::new()), config);
    let rseg = RollbackSegment::open(Arc::new(sys), space, page_no)?;
    println!("rollback segment {}:{}", space, page_no);
    println!("  max size      {}", rseg.max_size());
    println!("  current size  {}", rseg.curr_size());
    println!("  history size  {}", rseg.history_size()?);
    for list in [
        UndoList::ActiveInsert,
        UndoList::ActiveUpdate,
        UndoList::CachedInsert,
        UndoList::CachedUpdate,
    ] {
        println!("  {:<14}{}", format!("{:?}", list), rseg.list_len(list));
    }
    Ok(())
}

fn main() -> ExitCode {
    let config = Config::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_filter()))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(redo_path) = args.get(1) else {
        eprintln!("usage: flint-undo <redo-file> [<space>:<rseg-page>]");
        return ExitCode::FAILURE;
    };
    let rseg_at = match args.get(2) {
        Some(arg) => match parse_rseg(arg) {
            Some(at) => Some(at),
            None => {
                eprintln!("bad rollback segment address {:?}, expected <space>:<page>", arg);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    match run(config, redo_path, rseg_at) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "flint-undo failed");
            ExitCode::FAILURE
        }
    }
}
